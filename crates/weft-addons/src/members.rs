//! Member naming and field selection shared by the providers.

use std::collections::BTreeSet;

use weft_core::{Declaration, FieldDecl, Marker};

/// Upper-cases the first character of `name`.
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `isX` for primitive booleans, `getX` otherwise.
pub fn accessor_name(field: &FieldDecl) -> String {
    let prefix = if field.ty == "boolean" { "is" } else { "get" };
    format!("{prefix}{}", capitalize(&field.name))
}

pub fn mutator_name(field: &FieldDecl) -> String {
    format!("set{}", capitalize(&field.name))
}

/// Non-static, non-transient fields: the ones that make up an instance's
/// state.
pub fn is_instance_state(field: &FieldDecl) -> bool {
    !field.modifiers.is_static && !field.modifiers.is_transient
}

/// Field names listed in the marker's comma-separated `excludeFields`
/// attribute.
pub fn excluded_fields(decl: &Declaration, marker: Marker) -> BTreeSet<String> {
    decl.marker_attr(marker, "excludeFields")
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}
