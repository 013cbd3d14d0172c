//! The catalog of installed providers and marker-based dispatch.
//!
//! Each registration records the provider, the markers that trigger it and a
//! registration sequence number. The sequence number fixes dispatch order and
//! the precedence used when merging fragments, so output is reproducible for
//! a fixed registration order.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;

use weft_core::{EntityRef, Identifier, LocationTag, Marker, MarkerSet, ProviderKind};

use crate::error::EngineError;
use crate::provider::MetadataProvider;

/// One installed provider.
#[derive(Clone)]
pub struct Registration {
    sequence: u64,
    kind: ProviderKind,
    provider: Arc<dyn MetadataProvider>,
    triggers: MarkerSet,
}

impl Registration {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn kind(&self) -> &ProviderKind {
        &self.kind
    }

    pub fn provider(&self) -> &Arc<dyn MetadataProvider> {
        &self.provider
    }

    pub fn triggers(&self) -> &MarkerSet {
        &self.triggers
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("sequence", &self.sequence)
            .field("kind", &self.kind)
            .field("triggers", &self.triggers)
            .finish_non_exhaustive()
    }
}

/// Installed providers, in registration order.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    registrations: Vec<Registration>,
    next_sequence: u64,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `provider`, triggered by `triggers`. Returns its
    /// registration sequence number.
    pub fn register(
        &mut self,
        provider: Arc<dyn MetadataProvider>,
        triggers: MarkerSet,
    ) -> Result<u64, EngineError> {
        let kind = provider.kind();
        if self.contains(&kind) {
            return Err(EngineError::DuplicateProvider { kind });
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        tracing::debug!(%kind, sequence, ?triggers, "provider registered");
        self.registrations.push(Registration {
            sequence,
            kind,
            provider,
            triggers,
        });
        Ok(sequence)
    }

    /// Removes the provider of `kind`.
    pub fn unregister(&mut self, kind: &ProviderKind) -> Result<Registration, EngineError> {
        let pos = self
            .registrations
            .iter()
            .position(|r| &r.kind == kind)
            .ok_or_else(|| EngineError::UnknownProvider { kind: kind.clone() })?;
        tracing::debug!(%kind, "provider unregistered");
        Ok(self.registrations.remove(pos))
    }

    pub fn contains(&self, kind: &ProviderKind) -> bool {
        self.registration(kind).is_some()
    }

    pub fn registration(&self, kind: &ProviderKind) -> Option<&Registration> {
        self.registrations.iter().find(|r| &r.kind == kind)
    }

    pub fn provider(&self, kind: &ProviderKind) -> Option<&Arc<dyn MetadataProvider>> {
        self.registration(kind).map(|r| &r.provider)
    }

    /// Registration sequence of `kind`; lower means earlier.
    pub fn precedence(&self, kind: &ProviderKind) -> Option<u64> {
        self.registration(kind).map(|r| r.sequence)
    }

    /// Registered kinds in registration order.
    pub fn kinds(&self) -> impl Iterator<Item = &ProviderKind> + '_ {
        self.registrations.iter().map(|r| &r.kind)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Seed identifiers for a declaration change: one per provider whose
    /// trigger set intersects `changed`, in registration order.
    pub fn on_declaration_changed(
        &self,
        entity: &EntityRef,
        location: &LocationTag,
        changed: &MarkerSet,
    ) -> IndexSet<Identifier> {
        let seeds: IndexSet<Identifier> = self
            .registrations
            .iter()
            .filter(|r| r.triggers.intersects(changed))
            .map(|r| Identifier::new(r.kind.clone(), entity.clone(), location.clone()))
            .collect();
        if seeds.is_empty() {
            tracing::debug!(%entity, ?changed, "no provider triggered");
        }
        seeds
    }

    /// Like [`on_declaration_changed`](Self::on_declaration_changed) but
    /// taking raw marker names. Names outside the marker domain trigger
    /// nothing.
    pub fn on_marker_names_changed<'n>(
        &self,
        entity: &EntityRef,
        location: &LocationTag,
        names: impl IntoIterator<Item = &'n str>,
    ) -> IndexSet<Identifier> {
        let names: Vec<&str> = names.into_iter().collect();
        let unknown = unknown_names(&names);
        if !unknown.is_empty() {
            tracing::debug!(%entity, ?unknown, "ignoring unknown marker names");
        }
        let changed = MarkerSet::from_names(names.iter().copied());
        self.on_declaration_changed(entity, location, &changed)
    }
}

/// Names outside the marker domain, in input order.
fn unknown_names<'n>(names: &[&'n str]) -> Vec<&'n str> {
    names
        .iter()
        .copied()
        .filter(|name| Marker::from_name(name).is_none())
        .collect()
}
