//! The metadata item store and its concurrent read handle.
//!
//! [`ItemStore`] is owned by the engine and mutated only between (or during)
//! passes on the engine's thread. Valid items are additionally published to a
//! shared [`DashMap`] so that any number of [`ItemReader`] handles can read
//! them from other threads while a pass runs. A reader observes either the
//! previous committed item or the new one, never a half-built item: items are
//! immutable and replaced whole.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;

use weft_core::{EntityRef, Identifier, ItemState, MetadataItem, ProviderKind};

use crate::error::ProviderError;
use crate::hash::Fingerprint;

#[derive(Debug, Clone)]
struct Entry {
    state: ItemState,
    item: Option<Arc<MetadataItem>>,
    fingerprint: Option<Fingerprint>,
    failure: Option<ProviderError>,
}

impl Entry {
    fn unknown() -> Self {
        Entry {
            state: ItemState::Unknown,
            item: None,
            fingerprint: None,
            failure: None,
        }
    }
}

/// State and committed item for every identifier the engine has seen.
#[derive(Debug, Default)]
pub struct ItemStore {
    entries: BTreeMap<Identifier, Entry>,
    published: Arc<DashMap<Identifier, Arc<MetadataItem>>>,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifecycle state; identifiers never seen are [`ItemState::Unknown`].
    pub fn state(&self, id: &Identifier) -> ItemState {
        self.entries
            .get(id)
            .map(|e| e.state)
            .unwrap_or(ItemState::Unknown)
    }

    /// The committed item, only while it is valid.
    pub fn item(&self, id: &Identifier) -> Option<Arc<MetadataItem>> {
        let entry = self.entries.get(id)?;
        match entry.state {
            ItemState::Valid => entry.item.clone(),
            _ => None,
        }
    }

    /// The error recorded by the last failed computation of `id`.
    pub fn failure(&self, id: &Identifier) -> Option<&ProviderError> {
        self.entries.get(id).and_then(|e| e.failure.as_ref())
    }

    pub fn fingerprint(&self, id: &Identifier) -> Option<Fingerprint> {
        self.entries.get(id).and_then(|e| e.fingerprint)
    }

    /// Every known identifier of `entity`, whatever its state.
    pub fn ids_for_entity(&self, entity: &EntityRef) -> Vec<Identifier> {
        self.entries
            .keys()
            .filter(|id| id.entity() == entity)
            .cloned()
            .collect()
    }

    pub fn ids_of_kind(&self, kind: &ProviderKind) -> Vec<Identifier> {
        self.entries
            .keys()
            .filter(|id| id.kind() == kind)
            .cloned()
            .collect()
    }

    /// Valid items of `entity`, ordered by identifier.
    pub fn valid_items_for(&self, entity: &EntityRef) -> Vec<Arc<MetadataItem>> {
        self.entries
            .iter()
            .filter(|(id, e)| id.entity() == entity && e.state == ItemState::Valid)
            .filter_map(|(_, e)| e.item.clone())
            .collect()
    }

    /// Identifiers currently in `state`.
    pub fn ids_in_state(&self, state: ItemState) -> BTreeSet<Identifier> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state == state)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A cloneable handle for reading valid items from other threads.
    pub fn reader(&self) -> ItemReader {
        ItemReader {
            published: Arc::clone(&self.published),
        }
    }

    // -----------------------------------------------------------------------
    // Engine-side mutation
    // -----------------------------------------------------------------------

    /// Stores `item` as the valid result for its identifier.
    pub(crate) fn commit(&mut self, item: MetadataItem, fingerprint: Fingerprint) -> Arc<MetadataItem> {
        let item = Arc::new(item);
        let id = item.id.clone();
        self.published.insert(id.clone(), Arc::clone(&item));
        self.entries.insert(
            id,
            Entry {
                state: ItemState::Valid,
                item: Some(Arc::clone(&item)),
                fingerprint: Some(fingerprint),
                failure: None,
            },
        );
        item
    }

    /// Marks `id` invalid with `error`, dropping its item.
    pub(crate) fn fail(&mut self, id: &Identifier, error: ProviderError) {
        self.published.remove(id);
        let entry = self.entries.entry(id.clone()).or_insert_with(Entry::unknown);
        entry.state = ItemState::Invalid;
        entry.item = None;
        entry.fingerprint = None;
        entry.failure = Some(error);
    }

    /// Moves `id` to `state` without touching a failure record.
    ///
    /// While `Computing` the previous item stays visible to readers so they
    /// keep seeing the last committed value. `Deferred`, `Invalid` and
    /// `Unknown` withdraw it.
    pub(crate) fn set_state(&mut self, id: &Identifier, state: ItemState) {
        let entry = self.entries.entry(id.clone()).or_insert_with(Entry::unknown);
        entry.state = state;
        match state {
            ItemState::Computing | ItemState::Valid => {}
            ItemState::Deferred | ItemState::Invalid | ItemState::Unknown => {
                self.published.remove(id);
                entry.item = None;
                entry.fingerprint = None;
            }
        }
    }

    /// Forgets `id` entirely. Returns whether it was known.
    pub(crate) fn evict(&mut self, id: &Identifier) -> bool {
        self.published.remove(id);
        self.entries.remove(id).is_some()
    }
}

/// Read-only, thread-safe view of the valid items.
#[derive(Debug, Clone)]
pub struct ItemReader {
    published: Arc<DashMap<Identifier, Arc<MetadataItem>>>,
}

impl ItemReader {
    pub fn get(&self, id: &Identifier) -> Option<Arc<MetadataItem>> {
        self.published.get(id).map(|item| Arc::clone(item.value()))
    }

    /// Valid items of `entity`, ordered by identifier.
    pub fn items_for(&self, entity: &EntityRef) -> Vec<Arc<MetadataItem>> {
        let mut items: Vec<Arc<MetadataItem>> = self
            .published
            .iter()
            .filter(|entry| entry.key().entity() == entity)
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    /// Copy of everything currently published.
    pub fn snapshot(&self) -> BTreeMap<Identifier, Arc<MetadataItem>> {
        self.published
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.published.len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.is_empty()
    }
}
