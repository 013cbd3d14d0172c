//! `toString()` generation over the entity's non-static fields.

use serde::{Deserialize, Serialize};

use weft_core::{Identifier, ItemDraft, Marker, MarkerSet, ProviderKind};
use weft_engine::{ComputeContext, Computed, MetadataProvider, ProviderError};

use crate::members::excluded_fields;

pub const KIND: &str = "ToString";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToStringPayload {
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ToStringProvider;

impl ToStringProvider {
    pub fn triggers() -> MarkerSet {
        MarkerSet::from([Marker::ToString])
    }
}

impl MetadataProvider for ToStringProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::new(KIND)
    }

    fn compute(
        &self,
        id: &Identifier,
        ctx: &mut ComputeContext<'_>,
    ) -> Result<Computed, ProviderError> {
        let decl = ctx.declaration()?;
        if !decl.has_marker(Marker::ToString) {
            return Ok(Computed::Ready(ItemDraft::new(id)));
        }

        let excluded = excluded_fields(&decl, Marker::ToString);
        let fields: Vec<String> = decl
            .fields
            .iter()
            .filter(|f| !f.modifiers.is_static && !excluded.contains(&f.name))
            .map(|f| f.name.clone())
            .collect();

        let parts = fields
            .iter()
            .map(|f| format!("\"{f}=\" + {f}"))
            .collect::<Vec<_>>()
            .join(" + \", \" + ");
        let body = if parts.is_empty() {
            format!(
                "public String toString() {{ return \"{}[]\"; }}",
                decl.entity.simple_name()
            )
        } else {
            format!(
                "public String toString() {{ return \"{}[\" + {} + \"]\"; }}",
                decl.entity.simple_name(),
                parts
            )
        };

        let mut draft = ItemDraft::new(id);
        draft.method("toString()", body);
        let payload = serde_json::to_value(ToStringPayload { fields })
            .map_err(|e| ProviderError::payload(id, e))?;
        draft.set_payload(payload);
        Ok(Computed::Ready(draft))
    }
}
