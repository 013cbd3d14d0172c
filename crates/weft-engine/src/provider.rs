//! The [`MetadataProvider`] plug-in contract and the [`ComputeContext`]
//! through which providers read their dependencies.
//!
//! Providers never see the item store directly. Every read goes through the
//! context, which records it; the recorded reads become the committed item's
//! upstream set and its incoming dependency edges. A provider therefore
//! cannot forget to declare a dependency, nor declare one it never used.
//!
//! # Reads
//!
//! - [`ComputeContext::require`] is a **hard** read: the provider cannot run
//!   without the answer. The edge is registered immediately and refused if
//!   it would close a cycle of hard edges.
//! - [`ComputeContext::read`] is a **soft** read: the provider tolerates a
//!   deferred answer and falls back to something conservative.
//!
//! Both return [`Lookup::Deferred`] when the target is still being computed
//! in this pass, or has not been computed yet. In the latter case the engine
//! schedules the target and retries the reader once it completes.

use std::collections::BTreeSet;
use std::sync::Arc;

use smallvec::SmallVec;

use weft_core::{
    Declaration, DependencyGraph, EdgeKind, EntityRef, Identifier, ItemDraft, ItemState,
    MetadataItem, ProviderKind,
};

use crate::error::ProviderError;
use crate::registry::ProviderRegistry;
use crate::store::ItemStore;

/// Result of a provider computation that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Computed {
    Ready(ItemDraft),
    /// Cannot produce an answer yet; retry after prerequisites complete.
    Deferred,
}

/// Result of a dependency read.
#[derive(Debug, Clone)]
pub enum Lookup {
    Ready(Arc<MetadataItem>),
    Deferred,
}

impl Lookup {
    pub fn ready(self) -> Option<Arc<MetadataItem>> {
        match self {
            Lookup::Ready(item) => Some(item),
            Lookup::Deferred => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Lookup::Deferred)
    }
}

/// A pluggable unit of computation deriving one kind of metadata item.
///
/// Implementations must be pure functions of what they read through the
/// context.
pub trait MetadataProvider: Send + Sync {
    /// The kind of identifier this provider computes.
    fn kind(&self) -> ProviderKind;

    /// Computes the item for `id`.
    fn compute(&self, id: &Identifier, ctx: &mut ComputeContext<'_>)
        -> Result<Computed, ProviderError>;
}

/// What a finished computation read, for the engine to act on.
#[derive(Debug, Default)]
pub(crate) struct ReadLog {
    /// Every distinct identifier read, with the strongest read kind.
    pub reads: Vec<(Identifier, EdgeKind)>,
    /// Targets that had no valid item and must be scheduled.
    pub demanded: Vec<Identifier>,
    /// Targets whose completion should wake the reader.
    pub blocked_on: BTreeSet<Identifier>,
}

/// Dependency-reading handle passed to [`MetadataProvider::compute`].
pub struct ComputeContext<'a> {
    id: &'a Identifier,
    store: &'a ItemStore,
    graph: &'a mut DependencyGraph,
    registry: &'a ProviderRegistry,
    reads: SmallVec<[(Identifier, EdgeKind); 8]>,
    demanded: Vec<Identifier>,
    blocked_on: BTreeSet<Identifier>,
}

impl<'a> ComputeContext<'a> {
    pub(crate) fn new(
        id: &'a Identifier,
        store: &'a ItemStore,
        graph: &'a mut DependencyGraph,
        registry: &'a ProviderRegistry,
    ) -> Self {
        ComputeContext {
            id,
            store,
            graph,
            registry,
            reads: SmallVec::new(),
            demanded: Vec::new(),
            blocked_on: BTreeSet::new(),
        }
    }

    /// The identifier being computed.
    pub fn id(&self) -> &Identifier {
        self.id
    }

    /// Hard read of `target`.
    pub fn require(&mut self, target: &Identifier) -> Result<Lookup, ProviderError> {
        self.lookup(target, EdgeKind::Hard)
    }

    /// Soft read of `target`.
    pub fn read(&mut self, target: &Identifier) -> Result<Lookup, ProviderError> {
        self.lookup(target, EdgeKind::Soft)
    }

    /// Hard read of the declaration of the entity being computed.
    pub fn declaration(&mut self) -> Result<Declaration, ProviderError> {
        let target = self.id.declaration_of();
        self.declaration_at(&target)
    }

    /// Hard read of another entity's declaration at the current location.
    pub fn declaration_of(&mut self, entity: &EntityRef) -> Result<Declaration, ProviderError> {
        let target = Identifier::declaration(entity.clone(), self.id.location().clone());
        self.declaration_at(&target)
    }

    fn declaration_at(&mut self, target: &Identifier) -> Result<Declaration, ProviderError> {
        match self.require(target)? {
            Lookup::Ready(item) => item
                .payload_as::<Declaration>()
                .map_err(|e| ProviderError::payload(target, e)),
            // Declarations are never computed, so a deferral cannot happen;
            // treat it like an absent declaration.
            Lookup::Deferred => Err(ProviderError::MissingDeclaration {
                entity: target.entity().clone(),
            }),
        }
    }

    fn record(&mut self, target: &Identifier, kind: EdgeKind) {
        match self.reads.iter_mut().find(|(id, _)| id == target) {
            Some((_, existing)) => {
                if kind == EdgeKind::Hard {
                    *existing = EdgeKind::Hard;
                }
            }
            None => self.reads.push((target.clone(), kind)),
        }
    }

    fn lookup(&mut self, target: &Identifier, kind: EdgeKind) -> Result<Lookup, ProviderError> {
        tracing::trace!(reader = %self.id, target = %target, ?kind, "dependency read");

        if kind == EdgeKind::Hard {
            if let Err(err) = self.graph.register_edge(target, self.id, EdgeKind::Hard) {
                // Re-checked once the target completes; its recomputation
                // may drop the edges that close the cycle.
                if target != self.id {
                    self.record(target, EdgeKind::Soft);
                    self.blocked_on.insert(target.clone());
                }
                return Err(err.into());
            }
        }
        if target == self.id {
            // Reading oneself mid-computation: only a soft read gets here.
            return Ok(Lookup::Deferred);
        }
        self.record(target, kind);

        match self.store.state(target) {
            ItemState::Valid => match self.store.item(target) {
                Some(item) => Ok(Lookup::Ready(item)),
                None => Ok(Lookup::Deferred),
            },
            ItemState::Computing => {
                self.blocked_on.insert(target.clone());
                Ok(Lookup::Deferred)
            }
            ItemState::Invalid if self.store.failure(target).is_some() => {
                Err(ProviderError::UpstreamFailed {
                    upstream: target.clone(),
                })
            }
            ItemState::Unknown | ItemState::Invalid | ItemState::Deferred => {
                if target.is_declaration() {
                    return Err(ProviderError::MissingDeclaration {
                        entity: target.entity().clone(),
                    });
                }
                if !self.registry.contains(target.kind()) {
                    return Err(ProviderError::NoProvider {
                        kind: target.kind().clone(),
                        id: target.clone(),
                    });
                }
                if !self.demanded.contains(target) {
                    self.demanded.push(target.clone());
                }
                self.blocked_on.insert(target.clone());
                Ok(Lookup::Deferred)
            }
        }
    }

    pub(crate) fn finish(self) -> ReadLog {
        ReadLog {
            reads: self.reads.into_vec(),
            demanded: self.demanded,
            blocked_on: self.blocked_on,
        }
    }
}
