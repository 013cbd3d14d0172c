//! Persistence identity for entities.
//!
//! Requires the entity's JavaBean item (deferring until it exists) so that
//! identifier and version accessors can be named. The identifier field is the
//! first field annotated `@Id`, or failing that `@EmbeddedId`; an entity
//! without either is an error. The first `@Version` field, if any, is the
//! version field.

use serde::{Deserialize, Serialize};

use weft_core::{EntityRef, Identifier, ItemDraft, Marker, MarkerSet, ProviderKind};
use weft_engine::{ComputeContext, Computed, Lookup, MetadataProvider, ProviderError};

use crate::javabean::{self, JavaBeanPayload};

pub const KIND: &str = "JpaEntity";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityPayload {
    pub identifier_field: String,
    pub identifier_type: String,
    pub embedded_identifier: bool,
    pub identifier_accessor: Option<String>,
    pub version_field: Option<String>,
    pub version_type: Option<String>,
    pub version_accessor: Option<String>,
    pub table: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EntityProvider;

impl EntityProvider {
    pub fn triggers() -> MarkerSet {
        MarkerSet::from([Marker::Entity])
    }
}

impl MetadataProvider for EntityProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::new(KIND)
    }

    fn compute(
        &self,
        id: &Identifier,
        ctx: &mut ComputeContext<'_>,
    ) -> Result<Computed, ProviderError> {
        let decl = ctx.declaration()?;
        if !decl.has_marker(Marker::Entity) {
            return Ok(Computed::Ready(ItemDraft::new(id)));
        }

        let bean_id = id.sibling(ProviderKind::new(javabean::KIND));
        let bean = match ctx.require(&bean_id)? {
            Lookup::Ready(item) => item,
            Lookup::Deferred => {
                tracing::debug!(%id, "JavaBean metadata not available yet");
                return Ok(Computed::Deferred);
            }
        };
        let bean: JavaBeanPayload = bean
            .payload_as()
            .map_err(|e| ProviderError::payload(&bean_id, e))?;

        let (identifier, embedded) = match decl.fields_with_annotation("Id").next() {
            Some(field) => (field, false),
            None => match decl.fields_with_annotation("EmbeddedId").next() {
                Some(field) => (field, true),
                None => {
                    return Err(ProviderError::invalid(
                        id,
                        format!("entity '{}' doesn't contain any identifier field", decl.entity),
                    ))
                }
            },
        };
        let version = decl.fields_with_annotation("Version").next();
        let table = decl
            .marker_attr(Marker::Entity, "table")
            .map(str::to_owned);

        let mut draft = ItemDraft::new(id);
        draft.annotation("@Entity", "@Entity");
        if let Some(table) = &table {
            draft.annotation("@Table", format!("@Table(name = \"{table}\")"));
        }

        let payload = EntityPayload {
            identifier_field: identifier.name.clone(),
            identifier_type: identifier.ty.clone(),
            embedded_identifier: embedded,
            identifier_accessor: bean.accessor(&identifier.name).map(str::to_owned),
            version_field: version.map(|f| f.name.clone()),
            version_type: version.map(|f| f.ty.clone()),
            version_accessor: version
                .and_then(|f| bean.accessor(&f.name))
                .map(str::to_owned),
            table,
        };
        let payload = serde_json::to_value(&payload).map_err(|e| ProviderError::payload(id, e))?;
        draft.set_payload(payload);
        Ok(Computed::Ready(draft))
    }
}

/// Hard read of `entity`'s persistence item, at the location of `reader`.
///
/// `None` while that item is not available yet. An item without a payload
/// means `entity` carries no entity marker, which is an error for `reader`.
pub(crate) fn require_entity(
    ctx: &mut ComputeContext<'_>,
    reader: &Identifier,
    entity: &EntityRef,
) -> Result<Option<EntityPayload>, ProviderError> {
    let entity_id = Identifier::new(
        ProviderKind::new(KIND),
        entity.clone(),
        reader.location().clone(),
    );
    let item = match ctx.require(&entity_id)? {
        Lookup::Ready(item) => item,
        Lookup::Deferred => return Ok(None),
    };
    if item.payload.is_null() {
        return Err(ProviderError::invalid(
            reader,
            format!("'{entity}' is not an entity"),
        ));
    }
    item.payload_as()
        .map(Some)
        .map_err(|e| ProviderError::payload(&entity_id, e))
}
