//! The recomputation engine.
//!
//! [`Engine`] owns the provider registry, the dependency graph and the item
//! store, and runs one serialized *pass* per change notification. A pass
//! recomputes exactly the identifiers whose inputs changed, in dependency
//! order, and reports what it did in a [`PassReport`].
//!
//! # Pass algorithm
//!
//! 1. The changed roots (declaration items, evicted items) are marked
//!    *changed*. Seed identifiers from provider dispatch are queued first,
//!    followed by everything reachable downstream of the roots in
//!    topological order.
//! 2. A dequeued identifier is recomputed only if it is forced, is not
//!    currently valid, or one of its upstreams is marked changed in this
//!    pass. Otherwise it is skipped.
//! 3. A computation that commits output with a new fingerprint marks the
//!    identifier changed and queues its downstream closure. Equal output
//!    stops propagation there.
//! 4. Reads of identifiers without a valid item schedule them (demand) and
//!    return DEFERRED. The reader is woken and recomputed when the target
//!    completes, whether it deferred or fell back to a default.
//! 5. When the queue drains while identifiers are still deferred, all of
//!    them are retried. Every identifier may be entered at most
//!    `retry_ceiling + 1` times per pass; exceeding that aborts the pass
//!    with [`EngineError::DeferralCeilingExceeded`]. Items committed before
//!    the abort stay valid.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::{Serialize, Serializer};

use weft_core::{
    Declaration, DependencyGraph, EntityRef, Identifier, ItemDraft, ItemState, LocationTag,
    MarkerSet, MetadataItem, ProviderKind,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, ProviderError};
use crate::hash::item_fingerprint;
use crate::merge::GovernorView;
use crate::provider::{ComputeContext, Computed, MetadataProvider, ReadLog};
use crate::registry::ProviderRegistry;
use crate::store::{ItemReader, ItemStore};

/// A provider failure recorded during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComputeFailure {
    pub id: Identifier,
    #[serde(serialize_with = "serialize_display")]
    pub error: ProviderError,
}

fn serialize_display<S: Serializer>(error: &ProviderError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// Summary of one recomputation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Changed declarations and dispatched seeds that started the pass.
    pub roots: Vec<Identifier>,
    /// Identifiers whose provider was invoked, in first-invocation order.
    pub recomputed: Vec<Identifier>,
    /// Identifiers whose public output changed (including becoming invalid).
    pub changed: Vec<Identifier>,
    /// Reachable identifiers left untouched. Only filled when
    /// [`EngineConfig::report_unchanged`] is set.
    pub skipped: Vec<Identifier>,
    /// Identifiers whose last computation in this pass failed.
    pub failures: Vec<ComputeFailure>,
    /// Identifiers removed from the store before the pass.
    pub evicted: Vec<Identifier>,
    /// Total provider invocations, retries included.
    pub invocations: u32,
}

impl PassReport {
    pub fn is_noop(&self) -> bool {
        self.invocations == 0 && self.changed.is_empty() && self.evicted.is_empty()
    }

    pub fn failure(&self, id: &Identifier) -> Option<&ProviderError> {
        self.failures.iter().find(|f| &f.id == id).map(|f| &f.error)
    }
}

/// What a pass starts from.
#[derive(Debug, Default)]
struct PassPlan {
    /// Already-updated identifiers whose consumers must be checked.
    changed: Vec<Identifier>,
    /// Identifiers to evaluate first, in order.
    seeds: Vec<Identifier>,
    /// Identifiers recomputed even if valid and unaffected.
    forced: HashSet<Identifier>,
    /// Further identifiers to evaluate after the changed roots' closure.
    extra: Vec<Identifier>,
    evicted: Vec<Identifier>,
}

#[derive(Debug, Default)]
struct Pass {
    queue: VecDeque<Identifier>,
    queued: HashSet<Identifier>,
    forced: HashSet<Identifier>,
    attempts: HashMap<Identifier, u32>,
    /// target -> readers to recompute once the target completes.
    waiting: HashMap<Identifier, BTreeSet<Identifier>>,
    /// Identifiers whose latest computation deferred.
    parked: BTreeSet<Identifier>,
    changed: HashSet<Identifier>,
    changed_order: IndexSet<Identifier>,
    recomputed: IndexSet<Identifier>,
    skipped: IndexSet<Identifier>,
    failures: IndexMap<Identifier, ProviderError>,
    invocations: u32,
}

impl Pass {
    fn enqueue(&mut self, id: Identifier) {
        if self.queued.insert(id.clone()) {
            self.queue.push_back(id);
        }
    }

    fn force(&mut self, id: Identifier) {
        self.forced.insert(id.clone());
        self.enqueue(id);
    }

    fn implicated(&self, current: &Identifier) -> Vec<Identifier> {
        let mut ids: BTreeSet<Identifier> = self.parked.clone();
        ids.insert(current.clone());
        ids.into_iter().collect()
    }
}

/// The incremental metadata engine.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    registry: ProviderRegistry,
    graph: DependencyGraph,
    store: ItemStore,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(ProviderRegistry::new(), EngineConfig::default())
    }
}

impl Engine {
    pub fn new(registry: ProviderRegistry, config: EngineConfig) -> Self {
        Engine {
            config,
            registry,
            graph: DependencyGraph::new(),
            store: ItemStore::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn store(&self) -> &ItemStore {
        &self.store
    }

    /// Read-only handle on valid items, usable from other threads.
    pub fn reader(&self) -> ItemReader {
        self.store.reader()
    }

    pub fn item(&self, id: &Identifier) -> Option<Arc<MetadataItem>> {
        self.store.item(id)
    }

    pub fn state(&self, id: &Identifier) -> ItemState {
        self.store.state(id)
    }

    pub fn failure(&self, id: &Identifier) -> Option<&ProviderError> {
        self.store.failure(id)
    }

    /// Identifier of `kind` for `entity` at the configured default location.
    pub fn identifier_for(&self, kind: ProviderKind, entity: EntityRef) -> Identifier {
        Identifier::new(kind, entity, self.config.default_location.clone())
    }

    /// The stored declaration of `entity` at `location`.
    pub fn declaration(&self, entity: &EntityRef, location: &LocationTag) -> Option<Declaration> {
        let id = Identifier::declaration(entity.clone(), location.clone());
        self.store.item(&id)?.payload_as().ok()
    }

    /// The merged member set of `entity`, built from the current valid items.
    pub fn governor_view(&self, entity: &EntityRef) -> GovernorView {
        let items = self.store.valid_items_for(entity);
        GovernorView::from_items(entity, &items, |kind| self.registry.precedence(kind))
    }

    // -----------------------------------------------------------------------
    // Change notifications
    // -----------------------------------------------------------------------

    /// Stores `declaration` and recomputes what its change affects.
    ///
    /// The changed markers are derived from the previous declaration: every
    /// marker when the entity is new or its members changed, otherwise only
    /// the markers that were added, removed or had their attributes edited.
    pub fn submit(&mut self, declaration: Declaration) -> Result<PassReport, EngineError> {
        let previous = self.declaration(&declaration.entity, &declaration.location);
        let changed = changed_markers(previous.as_ref(), &declaration);
        self.on_declaration_changed(declaration, &changed)
    }

    /// Stores `declaration` and dispatches `changed` markers to the
    /// interested providers.
    ///
    /// Dispatched seeds are forced to recompute when the declaration's
    /// content changed; an identical declaration only computes seeds that
    /// were never computed. Failed or deferred seeds wait for a real change.
    pub fn on_declaration_changed(
        &mut self,
        declaration: Declaration,
        changed: &MarkerSet,
    ) -> Result<PassReport, EngineError> {
        let id = declaration.identifier();
        let content_changed = self.store_declaration(&declaration)?;
        let seeds: Vec<Identifier> = self
            .registry
            .on_declaration_changed(&declaration.entity, &declaration.location, changed)
            .into_iter()
            .collect();

        let mut plan = PassPlan::default();
        if content_changed {
            plan.changed.push(id);
            plan.forced = seeds.iter().cloned().collect();
            plan.seeds = seeds;
        } else {
            plan.seeds = seeds
                .into_iter()
                .filter(|seed| self.store.state(seed) == ItemState::Unknown)
                .collect();
        }
        self.run_pass(plan)
    }

    /// Removes every item of `entity`, its declarations included, and
    /// recomputes their former consumers.
    pub fn remove_declaration(&mut self, entity: &EntityRef) -> Result<PassReport, EngineError> {
        let mut ids: BTreeSet<Identifier> = self.store.ids_for_entity(entity).into_iter().collect();
        ids.extend(self.graph.ids().filter(|id| id.entity() == entity).cloned());
        tracing::debug!(%entity, items = ids.len(), "removing declaration");
        let plan = self.evict(ids);
        self.run_pass(plan)
    }

    /// Installs a provider and computes its items for every stored
    /// declaration carrying one of its trigger markers. Items that failed
    /// for lack of this provider are recomputed.
    pub fn register_provider(
        &mut self,
        provider: Arc<dyn MetadataProvider>,
        triggers: MarkerSet,
    ) -> Result<PassReport, EngineError> {
        let kind = provider.kind();
        self.registry.register(provider, triggers.clone())?;

        let mut plan = PassPlan::default();
        for decl_id in self.store.ids_of_kind(&ProviderKind::declaration()) {
            let Some(item) = self.store.item(&decl_id) else {
                continue;
            };
            let Ok(declaration) = item.payload_as::<Declaration>() else {
                continue;
            };
            if declaration.marker_set().intersects(&triggers) {
                plan.seeds.push(decl_id.sibling(kind.clone()));
            }
        }
        for id in self.store.ids_in_state(ItemState::Invalid) {
            let missing = matches!(
                self.store.failure(&id),
                Some(ProviderError::NoProvider { kind: k, .. }) if *k == kind
            );
            if missing {
                plan.forced.insert(id.clone());
                plan.seeds.push(id);
            }
        }
        self.run_pass(plan)
    }

    /// Uninstalls the provider of `kind`, evicting its items and
    /// recomputing their consumers.
    pub fn unregister_provider(&mut self, kind: &ProviderKind) -> Result<PassReport, EngineError> {
        self.registry.unregister(kind)?;
        let mut ids: BTreeSet<Identifier> = self.store.ids_of_kind(kind).into_iter().collect();
        ids.extend(self.graph.ids().filter(|id| id.kind() == kind).cloned());
        let plan = self.evict(ids);
        self.run_pass(plan)
    }

    /// Forces `id` to be recomputed along with whatever its change affects.
    /// For a declaration identifier its direct consumers are forced instead.
    pub fn recompute(&mut self, id: &Identifier) -> Result<PassReport, EngineError> {
        let mut plan = PassPlan::default();
        if id.is_declaration() {
            plan.forced = self.graph.downstream_of(id).into_iter().collect();
            plan.extra = self.graph.affected_order([id]);
        } else {
            if !self.registry.contains(id.kind()) {
                return Err(EngineError::UnknownProvider {
                    kind: id.kind().clone(),
                });
            }
            plan.forced.insert(id.clone());
            plan.seeds.push(id.clone());
        }
        self.run_pass(plan)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Commits the declaration item. Returns whether its content changed.
    fn store_declaration(&mut self, declaration: &Declaration) -> Result<bool, EngineError> {
        let item = MetadataItem {
            id: declaration.identifier(),
            valid: true,
            upstream: BTreeSet::new(),
            fragments: declaration.explicit_fragments(),
            payload: serde_json::to_value(declaration)?,
        };
        let fingerprint = item_fingerprint(&item)?;
        if self.store.state(&item.id) == ItemState::Valid
            && self.store.fingerprint(&item.id) == Some(fingerprint)
        {
            tracing::debug!(id = %item.id, "declaration unchanged");
            return Ok(false);
        }
        tracing::debug!(id = %item.id, "declaration stored");
        self.store.commit(item, fingerprint);
        Ok(true)
    }

    /// Drops `ids` from the graph and the store, planning a pass over their
    /// former consumers.
    fn evict(&mut self, ids: BTreeSet<Identifier>) -> PassPlan {
        let mut plan = PassPlan::default();
        plan.extra = self
            .graph
            .affected_order(ids.iter())
            .into_iter()
            .filter(|id| !ids.contains(id))
            .collect();
        plan.forced = ids
            .iter()
            .flat_map(|id| self.graph.downstream_of(id))
            .filter(|id| !ids.contains(id))
            .collect();
        for id in &ids {
            self.graph.deregister_all_for(id);
            if self.store.evict(id) {
                plan.evicted.push(id.clone());
            }
        }
        plan
    }

    fn run_pass(&mut self, plan: PassPlan) -> Result<PassReport, EngineError> {
        let mut pass = Pass::default();
        let mut roots: IndexSet<Identifier> = IndexSet::new();
        for id in &plan.changed {
            pass.changed.insert(id.clone());
            roots.insert(id.clone());
        }
        for id in &plan.seeds {
            roots.insert(id.clone());
            pass.enqueue(id.clone());
        }
        for id in self.graph.affected_order(plan.changed.iter()) {
            pass.enqueue(id);
        }
        for id in plan.extra {
            pass.enqueue(id);
        }
        let forced: BTreeSet<Identifier> = plan.forced.into_iter().collect();
        for id in forced {
            pass.force(id);
        }

        tracing::debug!(
            roots = roots.len(),
            queued = pass.queue.len(),
            evicted = plan.evicted.len(),
            "pass started"
        );

        loop {
            let Some(id) = pass.queue.pop_front() else {
                if pass.parked.is_empty() {
                    break;
                }
                let stalled = std::mem::take(&mut pass.parked);
                tracing::debug!(count = stalled.len(), "retrying deferred identifiers");
                for id in stalled {
                    pass.force(id);
                }
                continue;
            };
            pass.queued.remove(&id);
            if id.is_declaration() {
                continue;
            }

            let forced = pass.forced.remove(&id);
            if !forced && !self.is_affected(&id, &pass) {
                tracing::debug!(%id, "unaffected, skipped");
                if self.config.report_unchanged {
                    pass.skipped.insert(id);
                }
                continue;
            }

            let attempts = pass.attempts.entry(id.clone()).or_insert(0);
            *attempts += 1;
            if *attempts > self.config.max_invocations() {
                let implicated = pass.implicated(&id);
                tracing::warn!(
                    ceiling = self.config.retry_ceiling,
                    implicated = ?implicated.iter().map(|i| i.to_string()).collect::<Vec<_>>(),
                    "deferral ceiling exceeded, pass aborted"
                );
                return Err(EngineError::DeferralCeilingExceeded {
                    ceiling: self.config.retry_ceiling,
                    implicated,
                });
            }
            let attempt = *attempts;
            self.compute_one(&id, attempt, &mut pass);
        }

        let report = PassReport {
            roots: roots.into_iter().collect(),
            recomputed: pass.recomputed.into_iter().collect(),
            changed: pass.changed_order.into_iter().collect(),
            skipped: pass.skipped.into_iter().collect(),
            failures: pass
                .failures
                .into_iter()
                .map(|(id, error)| ComputeFailure { id, error })
                .collect(),
            evicted: plan.evicted,
            invocations: pass.invocations,
        };
        tracing::debug!(
            invocations = report.invocations,
            changed = report.changed.len(),
            failures = report.failures.len(),
            "pass finished"
        );
        Ok(report)
    }

    fn is_affected(&self, id: &Identifier, pass: &Pass) -> bool {
        self.store.state(id) != ItemState::Valid
            || self
                .graph
                .upstream_of(id)
                .iter()
                .any(|upstream| pass.changed.contains(upstream))
    }

    fn compute_one(&mut self, id: &Identifier, attempt: u32, pass: &mut Pass) {
        let previous_state = self.store.state(id);
        let previous_failure = self.store.failure(id).cloned();

        let Some(provider) = self.registry.provider(id.kind()).cloned() else {
            let error = ProviderError::NoProvider {
                kind: id.kind().clone(),
                id: id.clone(),
            };
            self.record_failure(id, error, previous_state, previous_failure, pass);
            return;
        };

        tracing::debug!(%id, attempt, "recomputing");
        self.store.set_state(id, ItemState::Computing);
        pass.invocations += 1;
        pass.recomputed.insert(id.clone());

        let mut ctx = ComputeContext::new(id, &self.store, &mut self.graph, &self.registry);
        let outcome = provider.compute(id, &mut ctx);
        let log = ctx.finish();

        for target in &log.demanded {
            pass.enqueue(target.clone());
        }
        for target in &log.blocked_on {
            pass.waiting
                .entry(target.clone())
                .or_default()
                .insert(id.clone());
        }

        match outcome {
            Ok(Computed::Ready(draft)) => {
                self.commit(id, draft, &log, previous_state, previous_failure, pass)
            }
            Ok(Computed::Deferred) => {
                tracing::debug!(%id, blocked_on = log.blocked_on.len(), "deferred");
                self.store.set_state(id, ItemState::Deferred);
                pass.parked.insert(id.clone());
            }
            Err(error) => {
                if let Err(err) = self.graph.replace_upstream(id, &log.reads) {
                    tracing::warn!(%id, error = %err, "could not record reads of failed item");
                }
                self.record_failure(id, error, previous_state, previous_failure, pass);
            }
        }
    }

    fn commit(
        &mut self,
        id: &Identifier,
        draft: ItemDraft,
        log: &ReadLog,
        previous_state: ItemState,
        previous_failure: Option<ProviderError>,
        pass: &mut Pass,
    ) {
        let upstream: BTreeSet<Identifier> = log.reads.iter().map(|(up, _)| up.clone()).collect();
        let item = match MetadataItem::commit(id, draft, upstream) {
            Ok(item) => item,
            Err(err) => {
                return self.record_failure(id, err.into(), previous_state, previous_failure, pass)
            }
        };
        if let Err(err) = self.graph.replace_upstream(id, &log.reads) {
            tracing::warn!(%id, error = %err, "rejected hard edge");
            return self.record_failure(id, err.into(), previous_state, previous_failure, pass);
        }
        let fingerprint = match item_fingerprint(&item) {
            Ok(fingerprint) => fingerprint,
            Err(err) => {
                let error = ProviderError::payload(id, err);
                return self.record_failure(id, error, previous_state, previous_failure, pass);
            }
        };

        let changed = self.store.fingerprint(id) != Some(fingerprint);
        self.store.commit(item, fingerprint);
        pass.parked.remove(id);
        pass.failures.shift_remove(id);
        if changed {
            tracing::debug!(%id, "committed, output changed");
            self.mark_changed(id, pass);
        } else {
            tracing::debug!(%id, "committed, output unchanged");
        }
        self.wake(id, pass);
    }

    fn record_failure(
        &mut self,
        id: &Identifier,
        error: ProviderError,
        previous_state: ItemState,
        previous_failure: Option<ProviderError>,
        pass: &mut Pass,
    ) {
        tracing::warn!(%id, %error, "provider failed");
        let changed =
            previous_state == ItemState::Valid || previous_failure.as_ref() != Some(&error);
        self.store.fail(id, error.clone());
        pass.parked.remove(id);
        pass.failures.insert(id.clone(), error);
        if changed {
            self.mark_changed(id, pass);
        }
        self.wake(id, pass);
    }

    fn mark_changed(&self, id: &Identifier, pass: &mut Pass) {
        pass.changed.insert(id.clone());
        pass.changed_order.insert(id.clone());
        for downstream in self.graph.affected_order([id]) {
            pass.enqueue(downstream);
        }
    }

    fn wake(&self, id: &Identifier, pass: &mut Pass) {
        if let Some(readers) = pass.waiting.remove(id) {
            for reader in readers {
                tracing::debug!(%reader, target = %id, "waking reader");
                pass.force(reader);
            }
        }
    }
}

/// Markers whose providers must react to `current` replacing `previous`.
fn changed_markers(previous: Option<&Declaration>, current: &Declaration) -> MarkerSet {
    let Some(previous) = previous else {
        return current.marker_set();
    };
    let members_changed = previous.annotations != current.annotations
        || previous.fields != current.fields
        || previous.methods != current.methods;
    if members_changed {
        return previous
            .marker_set()
            .iter()
            .chain(current.marker_set().iter())
            .collect();
    }
    previous
        .markers
        .keys()
        .chain(current.markers.keys())
        .filter(|marker| previous.markers.get(*marker) != current.markers.get(*marker))
        .copied()
        .collect()
}
