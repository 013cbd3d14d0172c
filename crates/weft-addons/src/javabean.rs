//! Accessor and mutator generation.
//!
//! For every non-static, non-transient field the provider generates a getter
//! and, unless the field is final, a fluent setter. Members the governor
//! already declares are left alone. The marker attributes
//! `gettersByDefault` and `settersByDefault` (`"false"`) switch either kind
//! off.
//!
//! The payload lists the accessor and mutator name of every eligible field,
//! hand-written or generated, for other providers to reference. It is
//! computed even when the marker is absent, in which case no fragments are
//! emitted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use weft_core::{method_signature, Identifier, ItemDraft, Marker, MarkerSet, ProviderKind};
use weft_engine::{ComputeContext, Computed, MetadataProvider, ProviderError};

use crate::members::{accessor_name, is_instance_state, mutator_name};

pub const KIND: &str = "JavaBean";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JavaBeanPayload {
    /// Field name to accessor method name.
    pub accessors: BTreeMap<String, String>,
    /// Field name to mutator method name.
    pub mutators: BTreeMap<String, String>,
}

impl JavaBeanPayload {
    pub fn accessor(&self, field: &str) -> Option<&str> {
        self.accessors.get(field).map(String::as_str)
    }

    pub fn mutator(&self, field: &str) -> Option<&str> {
        self.mutators.get(field).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JavaBeanProvider;

impl JavaBeanProvider {
    pub fn triggers() -> MarkerSet {
        MarkerSet::from([Marker::JavaBean])
    }
}

impl MetadataProvider for JavaBeanProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::new(KIND)
    }

    fn compute(
        &self,
        id: &Identifier,
        ctx: &mut ComputeContext<'_>,
    ) -> Result<Computed, ProviderError> {
        let decl = ctx.declaration()?;
        let emit = decl.has_marker(Marker::JavaBean);
        let getters = decl.marker_attr(Marker::JavaBean, "gettersByDefault") != Some("false");
        let setters = decl.marker_attr(Marker::JavaBean, "settersByDefault") != Some("false");
        let target = decl.entity.simple_name();

        let mut draft = ItemDraft::new(id);
        let mut payload = JavaBeanPayload::default();

        for field in decl.fields.iter().filter(|f| is_instance_state(f)) {
            if getters {
                let name = accessor_name(field);
                let signature = method_signature::<&str>(&name, &[]);
                if emit && !decl.declares_method(&signature) {
                    draft.method(
                        signature,
                        format!(
                            "public {} {}() {{ return this.{}; }}",
                            field.ty, name, field.name
                        ),
                    );
                }
                payload.accessors.insert(field.name.clone(), name);
            }
            // Final fields get no setter.
            if setters && !field.modifiers.is_final {
                let name = mutator_name(field);
                let signature = method_signature(&name, &[field.ty.as_str()]);
                if emit && !decl.declares_method(&signature) {
                    draft.method(
                        signature,
                        format!(
                            "public {target} {name}({ty} {field}) {{ this.{field} = {field}; return this; }}",
                            ty = field.ty,
                            field = field.name,
                        ),
                    );
                }
                payload.mutators.insert(field.name.clone(), name);
            }
        }

        let payload = serde_json::to_value(&payload).map_err(|e| ProviderError::payload(id, e))?;
        draft.set_payload(payload);
        Ok(Computed::Ready(draft))
    }
}

#[cfg(test)]
mod tests {
    use weft_core::{FieldDecl, FragmentKind, MethodDecl, Modifiers};

    use super::*;
    use crate::testing::{engine, id_of, person};

    #[test]
    fn generates_getters_and_setters() {
        let mut engine = engine();
        engine.submit(person()).unwrap();

        let view = engine.governor_view(&"com.example.Person".into());
        assert_eq!(
            view.method_signatures(),
            vec!["getId()", "setId(Long)", "getName()", "setName(String)"]
        );
        let setter = view.find(FragmentKind::Method, "setName(String)").unwrap();
        assert_eq!(
            setter.body,
            "public Person setName(String name) { this.name = name; return this; }"
        );
    }

    #[test]
    fn respects_modifiers_and_declared_members() {
        let mut engine = engine();
        let decl = person()
            .with_field(FieldDecl::new("created", "Instant").with_modifiers(Modifiers {
                is_final: true,
                ..Modifiers::default()
            }))
            .with_field(FieldDecl::new("COUNT", "int").with_modifiers(Modifiers {
                is_static: true,
                ..Modifiers::default()
            }))
            .with_field(FieldDecl::new("cache", "Map").with_modifiers(Modifiers {
                is_transient: true,
                ..Modifiers::default()
            }))
            .with_method(MethodDecl::new("getName", vec![], "String", "return name.trim();"));
        engine.submit(decl).unwrap();

        let view = engine.governor_view(&"com.example.Person".into());
        let methods = view.method_signatures();
        assert!(methods.contains(&"getCreated()"));
        assert!(!methods.contains(&"setCreated(Instant)"));
        assert!(!methods.iter().any(|m| m.contains("COUNT") || m.contains("Cache")));
        assert_eq!(
            view.find(FragmentKind::Method, "getName()").unwrap().body,
            "return name.trim();"
        );
        assert!(view.collisions.is_empty());

        let bean = engine.item(&id_of(&engine, KIND, "com.example.Person")).unwrap();
        let payload: JavaBeanPayload = bean.payload_as().unwrap();
        assert_eq!(payload.accessor("name"), Some("getName"));
        assert_eq!(payload.mutator("created"), None);
        assert_eq!(bean.fragments_of(FragmentKind::Method).count(), 4);
    }

    #[test]
    fn setters_can_be_switched_off() {
        let mut engine = engine();
        let decl = person().with_marker_attr(Marker::JavaBean, "settersByDefault", "false");
        engine.submit(decl).unwrap();
        let view = engine.governor_view(&"com.example.Person".into());
        assert_eq!(view.method_signatures(), vec!["getId()", "getName()"]);
    }
}
