//! Generated-content fragments and the explicit declarations they are woven
//! into.
//!
//! A [`Fragment`] is one unit of generated content: a field, a method or a
//! type-level annotation. Every fragment carries the [`Identifier`] of the
//! item that produced it.
//!
//! # Signatures
//!
//! Conflicts are resolved on `(kind, signature)`, so signatures follow one
//! convention across all producers:
//! - fields: the field name (`name`)
//! - methods: name plus parameter types (`setName(String)`, `hashCode()`)
//! - annotations: `@` plus the annotation name (`@Entity`)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::{EntityRef, Identifier, LocationTag, Marker, MarkerSet};

/// What kind of member a fragment contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FragmentKind {
    Field,
    Method,
    TypeAnnotation,
}

/// One generated member, attributable to the item that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fragment {
    pub kind: FragmentKind,
    pub signature: String,
    /// Identifier of the producing item.
    pub source: Identifier,
    /// Opaque content handed to the renderer.
    pub body: String,
}

impl Fragment {
    pub fn new(
        kind: FragmentKind,
        signature: impl Into<String>,
        source: Identifier,
        body: impl Into<String>,
    ) -> Self {
        Fragment {
            kind,
            signature: signature.into(),
            source,
            body: body.into(),
        }
    }

    /// The conflict key.
    pub fn key(&self) -> (FragmentKind, &str) {
        (self.kind, self.signature.as_str())
    }
}

/// Builds the method signature for `name` taking `params`.
pub fn method_signature<S: AsRef<str>>(name: &str, params: &[S]) -> String {
    let params: Vec<&str> = params.iter().map(|p| p.as_ref()).collect();
    format!("{}({})", name, params.join(","))
}

/// Member modifiers relevant to generation decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub is_transient: bool,
}

/// A field as written in the entity's declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: String,
    #[serde(default)]
    pub modifiers: Modifiers,
    /// Annotation names without the leading `@`.
    #[serde(default)]
    pub annotations: Vec<String>,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        FieldDecl {
            name: name.into(),
            ty: ty.into(),
            modifiers: Modifiers::default(),
            annotations: Vec::new(),
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn annotated(mut self, annotation: impl Into<String>) -> Self {
        self.annotations.push(annotation.into());
        self
    }

    pub fn has_annotation(&self, annotation: &str) -> bool {
        self.annotations.iter().any(|a| a == annotation)
    }
}

/// A method as written in the entity's declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodDecl {
    pub name: String,
    /// Parameter types in declaration order.
    #[serde(default)]
    pub params: Vec<String>,
    pub return_type: String,
    #[serde(default)]
    pub body: String,
}

impl MethodDecl {
    pub fn new(
        name: impl Into<String>,
        params: Vec<String>,
        return_type: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        MethodDecl {
            name: name.into(),
            params,
            return_type: return_type.into(),
            body: body.into(),
        }
    }

    pub fn signature(&self) -> String {
        method_signature(&self.name, &self.params)
    }
}

/// An entity's own, hand-written declaration: the governor's explicit
/// members plus the markers placed on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub entity: EntityRef,
    #[serde(default)]
    pub location: LocationTag,
    /// Markers with their attribute values.
    #[serde(default)]
    pub markers: BTreeMap<Marker, BTreeMap<String, String>>,
    /// Type-level annotation names without the leading `@`.
    #[serde(default)]
    pub annotations: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
}

impl Declaration {
    pub fn new(entity: EntityRef) -> Self {
        Declaration {
            entity,
            location: LocationTag::default(),
            markers: BTreeMap::new(),
            annotations: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn at(mut self, location: LocationTag) -> Self {
        self.location = location;
        self
    }

    pub fn with_marker(mut self, marker: Marker) -> Self {
        self.markers.entry(marker).or_default();
        self
    }

    pub fn with_marker_attr(
        mut self,
        marker: Marker,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.markers
            .entry(marker)
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotations.push(annotation.into());
        self
    }

    pub fn with_field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_method(mut self, method: MethodDecl) -> Self {
        self.methods.push(method);
        self
    }

    /// The identifier under which this declaration is stored.
    pub fn identifier(&self) -> Identifier {
        Identifier::declaration(self.entity.clone(), self.location.clone())
    }

    pub fn marker_set(&self) -> MarkerSet {
        self.markers.keys().copied().collect()
    }

    pub fn has_marker(&self, marker: Marker) -> bool {
        self.markers.contains_key(&marker)
    }

    pub fn marker_attr(&self, marker: Marker, key: &str) -> Option<&str> {
        self.markers
            .get(&marker)
            .and_then(|attrs| attrs.get(key))
            .map(String::as_str)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields carrying `annotation`, in declaration order.
    pub fn fields_with_annotation<'a>(
        &'a self,
        annotation: &'a str,
    ) -> impl Iterator<Item = &'a FieldDecl> + 'a {
        self.fields.iter().filter(move |f| f.has_annotation(annotation))
    }

    pub fn declares_method(&self, signature: &str) -> bool {
        self.methods.iter().any(|m| m.signature() == signature)
    }

    /// The declaration's own members as fragments, attributed to the
    /// declaration identifier: annotations, then fields, then methods.
    pub fn explicit_fragments(&self) -> Vec<Fragment> {
        let source = self.identifier();
        let annotations = self.annotations.iter().map(|a| {
            Fragment::new(
                FragmentKind::TypeAnnotation,
                format!("@{a}"),
                source.clone(),
                format!("@{a}"),
            )
        });
        let fields = self.fields.iter().map(|f| {
            Fragment::new(
                FragmentKind::Field,
                f.name.clone(),
                source.clone(),
                format!("{} {};", f.ty, f.name),
            )
        });
        let methods = self.methods.iter().map(|m| {
            Fragment::new(
                FragmentKind::Method,
                m.signature(),
                source.clone(),
                m.body.clone(),
            )
        });
        annotations.chain(fields).chain(methods).collect()
    }
}
