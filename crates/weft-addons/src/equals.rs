//! `equals(Object)` and `hashCode()` generation.
//!
//! Compares the entity's instance-state fields minus any listed in the
//! marker's `excludeFields` attribute. For persistent entities the identifier
//! field is excluded as well; it is learned through a soft read of the
//! entity item, so when that item is not available the comparison falls back
//! to all fields.

use serde::{Deserialize, Serialize};

use weft_core::{Identifier, ItemDraft, Marker, MarkerSet, ProviderKind};
use weft_engine::{ComputeContext, Computed, Lookup, MetadataProvider, ProviderError};

use crate::entity::{self, EntityPayload};
use crate::members::{excluded_fields, is_instance_state};

pub const KIND: &str = "Equals";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EqualsPayload {
    /// Compared fields in declaration order.
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EqualsProvider;

impl EqualsProvider {
    pub fn triggers() -> MarkerSet {
        MarkerSet::from([Marker::Equals])
    }
}

impl MetadataProvider for EqualsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::new(KIND)
    }

    fn compute(
        &self,
        id: &Identifier,
        ctx: &mut ComputeContext<'_>,
    ) -> Result<Computed, ProviderError> {
        let decl = ctx.declaration()?;
        if !decl.has_marker(Marker::Equals) {
            return Ok(Computed::Ready(ItemDraft::new(id)));
        }

        let mut excluded = excluded_fields(&decl, Marker::Equals);
        if decl.has_marker(Marker::Entity) {
            let entity_id = id.sibling(ProviderKind::new(entity::KIND));
            match ctx.read(&entity_id) {
                Ok(Lookup::Ready(item)) => {
                    if let Ok(payload) = item.payload_as::<EntityPayload>() {
                        excluded.insert(payload.identifier_field);
                    }
                }
                Ok(Lookup::Deferred) => {
                    tracing::debug!(%id, "entity metadata deferred, comparing all fields");
                }
                Err(ProviderError::UpstreamFailed { .. } | ProviderError::NoProvider { .. }) => {
                    tracing::debug!(%id, "entity metadata unavailable, comparing all fields");
                }
                Err(err) => return Err(err),
            }
        }

        let fields: Vec<&str> = decl
            .fields
            .iter()
            .filter(|f| is_instance_state(f) && !excluded.contains(&f.name))
            .map(|f| f.name.as_str())
            .collect();
        let target = decl.entity.simple_name();

        let comparison = if fields.is_empty() {
            "true".to_string()
        } else {
            fields
                .iter()
                .map(|f| format!("Objects.equals({f}, rhs.{f})"))
                .collect::<Vec<_>>()
                .join(" && ")
        };
        let mut draft = ItemDraft::new(id);
        draft.method(
            "equals(Object)",
            format!(
                "public boolean equals(Object obj) {{ if (this == obj) return true; \
                 if (!(obj instanceof {target})) return false; \
                 {target} rhs = ({target}) obj; return {comparison}; }}"
            ),
        );
        draft.method(
            "hashCode()",
            format!("public int hashCode() {{ return Objects.hash({}); }}", fields.join(", ")),
        );

        let payload = EqualsPayload {
            fields: fields.iter().map(|f| f.to_string()).collect(),
        };
        let payload = serde_json::to_value(&payload).map_err(|e| ProviderError::payload(id, e))?;
        draft.set_payload(payload);
        Ok(Computed::Ready(draft))
    }
}
