//! Web controller generation.
//!
//! A `Controller`-marked class scaffolds the entity named by its
//! `formBackingObject` attribute. The request mapping path comes from the
//! `path` attribute, defaulting to the entity's lower-cased plural name.
//! Operations listed in `disallowedOperations` (`create`, `update`,
//! `delete`) are left out.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use weft_core::{EntityRef, Identifier, ItemDraft, Marker, MarkerSet, ProviderKind};
use weft_engine::{ComputeContext, Computed, MetadataProvider, ProviderError};

use crate::entity;

pub const KIND: &str = "Controller";

const OPERATIONS: [&str; 3] = ["create", "update", "delete"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerPayload {
    pub form_backing_object: EntityRef,
    /// Mapping path without the leading slash.
    pub path: String,
    /// Generated handler signatures.
    pub handlers: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerProvider;

impl ControllerProvider {
    pub fn triggers() -> MarkerSet {
        MarkerSet::from([Marker::Controller])
    }
}

/// Lower-cased simple name with an `s` appended.
fn default_path(entity: &EntityRef) -> String {
    format!("{}s", entity.simple_name().to_lowercase())
}

impl MetadataProvider for ControllerProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::new(KIND)
    }

    fn compute(
        &self,
        id: &Identifier,
        ctx: &mut ComputeContext<'_>,
    ) -> Result<Computed, ProviderError> {
        let decl = ctx.declaration()?;
        if !decl.has_marker(Marker::Controller) {
            return Ok(Computed::Ready(ItemDraft::new(id)));
        }
        let Some(backing) = decl.marker_attr(Marker::Controller, "formBackingObject") else {
            return Err(ProviderError::invalid(
                id,
                format!("controller '{}' doesn't name a form backing object", decl.entity),
            ));
        };
        let backing = EntityRef::new(backing.trim());

        let path = match decl.marker_attr(Marker::Controller, "path") {
            Some(path) => path.trim().trim_start_matches('/').to_string(),
            None => default_path(&backing),
        };
        if path.is_empty() {
            return Err(ProviderError::invalid(id, "controller base path required"));
        }

        let disallowed: BTreeSet<String> = decl
            .marker_attr(Marker::Controller, "disallowedOperations")
            .map(|list| {
                list.split(',')
                    .map(|op| op.trim().to_lowercase())
                    .filter(|op| !op.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if let Some(unknown) = disallowed.iter().find(|op| !OPERATIONS.contains(&op.as_str())) {
            return Err(ProviderError::invalid(
                id,
                format!("unknown controller operation '{unknown}'"),
            ));
        }

        let Some(payload) = entity::require_entity(ctx, id, &backing)? else {
            tracing::debug!(%id, entity = %backing, "entity metadata not available yet");
            return Ok(Computed::Deferred);
        };

        let simple = backing.simple_name();
        let id_type = payload.identifier_type.as_str();
        let mut handlers = vec![
            (
                None,
                "list()".to_string(),
                format!("@GetMapping public List<{simple}> list() {{ return service.findAll(); }}"),
            ),
            (
                None,
                format!("show({id_type})"),
                format!(
                    "@GetMapping(\"/{{id}}\") public {simple} show(@PathVariable {id_type} id) {{ return service.findOne(id); }}"
                ),
            ),
        ];
        handlers.push((
            Some("create"),
            format!("create({simple})"),
            format!(
                "@PostMapping public {simple} create(@RequestBody {simple} entity) {{ return service.save(entity); }}"
            ),
        ));
        handlers.push((
            Some("update"),
            format!("update({simple})"),
            format!(
                "@PutMapping public {simple} update(@RequestBody {simple} entity) {{ return service.save(entity); }}"
            ),
        ));
        handlers.push((
            Some("delete"),
            format!("delete({id_type})"),
            format!(
                "@DeleteMapping(\"/{{id}}\") public void delete(@PathVariable {id_type} id) {{ service.delete(id); }}"
            ),
        ));

        let mut draft = ItemDraft::new(id);
        draft.annotation("@Controller", "@Controller");
        draft.annotation("@RequestMapping", format!("@RequestMapping(\"/{path}\")"));

        let mut signatures = Vec::new();
        for (operation, signature, body) in handlers {
            if operation.is_some_and(|op| disallowed.contains(op)) {
                continue;
            }
            if decl.declares_method(&signature) {
                continue;
            }
            draft.method(signature.clone(), body);
            signatures.push(signature);
        }

        let payload = ControllerPayload {
            form_backing_object: backing.clone(),
            path,
            handlers: signatures,
        };
        let payload = serde_json::to_value(&payload).map_err(|e| ProviderError::payload(id, e))?;
        draft.set_payload(payload);
        Ok(Computed::Ready(draft))
    }
}
