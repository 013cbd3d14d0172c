//! Service layer generation.
//!
//! A `Service`-marked class names the entity it serves through the marker's
//! `entity` attribute. The served entity's persistence item is a hard
//! dependency, so edits to that entity (its identifier type in particular)
//! propagate across entities to the service.

use serde::{Deserialize, Serialize};

use weft_core::{EntityRef, Identifier, ItemDraft, Marker, MarkerSet, ProviderKind};
use weft_engine::{ComputeContext, Computed, MetadataProvider, ProviderError};

use crate::entity;

pub const KIND: &str = "Service";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePayload {
    pub entity: EntityRef,
    pub identifier_type: String,
    /// Generated method signatures.
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceProvider;

impl ServiceProvider {
    pub fn triggers() -> MarkerSet {
        MarkerSet::from([Marker::Service])
    }
}

impl MetadataProvider for ServiceProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::new(KIND)
    }

    fn compute(
        &self,
        id: &Identifier,
        ctx: &mut ComputeContext<'_>,
    ) -> Result<Computed, ProviderError> {
        let decl = ctx.declaration()?;
        if !decl.has_marker(Marker::Service) {
            return Ok(Computed::Ready(ItemDraft::new(id)));
        }
        let Some(served) = decl.marker_attr(Marker::Service, "entity") else {
            return Err(ProviderError::invalid(
                id,
                format!("service '{}' doesn't name an entity", decl.entity),
            ));
        };
        let served = EntityRef::new(served.trim());

        let Some(payload) = entity::require_entity(ctx, id, &served)? else {
            tracing::debug!(%id, entity = %served, "entity metadata not available yet");
            return Ok(Computed::Deferred);
        };

        let simple = served.simple_name();
        let id_type = payload.identifier_type.as_str();
        let methods = [
            (
                "findAll()".to_string(),
                format!("public List<{simple}> findAll() {{ return repository.findAll(); }}"),
            ),
            (
                format!("findOne({id_type})"),
                format!(
                    "public {simple} findOne({id_type} id) {{ return repository.findOne(id); }}"
                ),
            ),
            (
                format!("save({simple})"),
                format!(
                    "public {simple} save({simple} entity) {{ return repository.save(entity); }}"
                ),
            ),
            (
                format!("delete({id_type})"),
                format!("public void delete({id_type} id) {{ repository.delete(id); }}"),
            ),
        ];

        let mut draft = ItemDraft::new(id);
        let mut signatures = Vec::with_capacity(methods.len());
        for (signature, body) in methods {
            if decl.declares_method(&signature) {
                continue;
            }
            draft.method(signature.clone(), body);
            signatures.push(signature);
        }

        let payload = ServicePayload {
            entity: served,
            identifier_type: payload.identifier_type,
            methods: signatures,
        };
        let payload = serde_json::to_value(&payload).map_err(|e| ProviderError::payload(id, e))?;
        draft.set_payload(payload);
        Ok(Computed::Ready(draft))
    }
}
