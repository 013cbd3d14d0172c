//! Metadata items: the cached result of one provider computation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::fragment::{Fragment, FragmentKind};
use crate::id::Identifier;

/// Lifecycle state of one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemState {
    /// Never computed, or evicted.
    Unknown,
    /// The provider is running (or waiting to be retried) in the current pass.
    Computing,
    Valid,
    /// Invalidated, or the last computation failed.
    Invalid,
    /// The provider reported it cannot produce an answer yet.
    Deferred,
}

/// Provider output before the engine commits it.
///
/// Providers never set upstream dependencies themselves; the engine fills
/// them in from the reads it observed during the computation.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDraft {
    id: Identifier,
    fragments: Vec<Fragment>,
    payload: Value,
}

impl ItemDraft {
    pub fn new(id: &Identifier) -> Self {
        ItemDraft {
            id: id.clone(),
            fragments: Vec::new(),
            payload: Value::Null,
        }
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn push(&mut self, kind: FragmentKind, signature: impl Into<String>, body: impl Into<String>) {
        self.fragments
            .push(Fragment::new(kind, signature, self.id.clone(), body));
    }

    pub fn field(&mut self, signature: impl Into<String>, body: impl Into<String>) {
        self.push(FragmentKind::Field, signature, body);
    }

    pub fn method(&mut self, signature: impl Into<String>, body: impl Into<String>) {
        self.push(FragmentKind::Method, signature, body);
    }

    pub fn annotation(&mut self, signature: impl Into<String>, body: impl Into<String>) {
        self.push(FragmentKind::TypeAnnotation, signature, body);
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn set_payload(&mut self, payload: Value) {
        self.payload = payload;
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }
}

/// A committed metadata item. Immutable: recomputation produces a new item
/// that replaces this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub id: Identifier,
    pub valid: bool,
    /// Exactly the identifiers read while computing this item.
    pub upstream: BTreeSet<Identifier>,
    pub fragments: Vec<Fragment>,
    pub payload: Value,
}

impl MetadataItem {
    /// Commits a draft for `id` with the observed upstream set.
    ///
    /// Fails if the draft was built for another identifier.
    pub fn commit(
        id: &Identifier,
        draft: ItemDraft,
        upstream: BTreeSet<Identifier>,
    ) -> Result<Self, CoreError> {
        if &draft.id != id {
            return Err(CoreError::IdentifierMismatch {
                expected: id.clone(),
                actual: draft.id,
            });
        }
        Ok(MetadataItem {
            id: draft.id,
            valid: true,
            upstream,
            fragments: draft.fragments,
            payload: draft.payload,
        })
    }

    /// Typed view of the payload.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    pub fn fragments_of(&self, kind: FragmentKind) -> impl Iterator<Item = &Fragment> + '_ {
        self.fragments.iter().filter(move |f| f.kind == kind)
    }
}
