//! Integration tests for recomputation passes: incrementality, deferral,
//! cycles, failures, retraction and weaving.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::json;

use weft_core::{
    Declaration, EdgeKind, FieldDecl, FragmentKind, Identifier, ItemDraft, ItemState, Marker,
    MarkerSet, MethodDecl, ProviderKind,
};
use weft_engine::{
    ComputeContext, Computed, Engine, EngineConfig, EngineError, Lookup, MetadataProvider,
    ProviderError, ProviderRegistry,
};

type Body = dyn Fn(&Identifier, &mut ComputeContext<'_>) -> Result<Computed, ProviderError>
    + Send
    + Sync;

struct Scripted {
    kind: &'static str,
    calls: Arc<AtomicU32>,
    body: Box<Body>,
}

impl MetadataProvider for Scripted {
    fn kind(&self) -> ProviderKind {
        ProviderKind::new(self.kind)
    }

    fn compute(
        &self,
        id: &Identifier,
        ctx: &mut ComputeContext<'_>,
    ) -> Result<Computed, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.body)(id, ctx)
    }
}

fn scripted<F>(kind: &'static str, body: F) -> (Arc<Scripted>, Arc<AtomicU32>)
where
    F: Fn(&Identifier, &mut ComputeContext<'_>) -> Result<Computed, ProviderError>
        + Send
        + Sync
        + 'static,
{
    let calls = Arc::new(AtomicU32::new(0));
    let provider = Arc::new(Scripted {
        kind,
        calls: Arc::clone(&calls),
        body: Box::new(body),
    });
    (provider, calls)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn engine_with(providers: Vec<(Arc<Scripted>, MarkerSet)>, config: EngineConfig) -> Engine {
    init_tracing();
    let mut registry = ProviderRegistry::new();
    for (provider, triggers) in providers {
        registry.register(provider, triggers).unwrap();
    }
    Engine::new(registry, config)
}

fn person() -> Declaration {
    Declaration::new("com.example.Person".into())
        .with_marker(Marker::JavaBean)
        .with_field(FieldDecl::new("id", "Long").annotated("Id"))
        .with_field(FieldDecl::new("name", "String"))
}

fn id_of(engine: &Engine, kind: &str) -> Identifier {
    engine.identifier_for(kind.into(), "com.example.Person".into())
}

/// Emits a getter per declared field.
fn bean() -> (Arc<Scripted>, Arc<AtomicU32>) {
    scripted("Bean", |id, ctx| {
        let decl = ctx.declaration()?;
        let mut draft = ItemDraft::new(id);
        for field in &decl.fields {
            draft.method(format!("get_{}()", field.name), format!("return {};", field.name));
        }
        Ok(Computed::Ready(draft))
    })
}

/// Requires the Bean item and counts its methods.
fn summary() -> (Arc<Scripted>, Arc<AtomicU32>) {
    scripted("Summary", |id, ctx| {
        let bean = id.sibling("Bean".into());
        match ctx.require(&bean)? {
            Lookup::Ready(item) => {
                let count = item.fragments_of(FragmentKind::Method).count();
                Ok(Computed::Ready(
                    ItemDraft::new(id).with_payload(json!({ "methods": count })),
                ))
            }
            Lookup::Deferred => Ok(Computed::Deferred),
        }
    })
}

#[test]
fn identical_resubmission_recomputes_nothing() {
    let (bean, bean_calls) = bean();
    let (summary, summary_calls) = summary();
    let mut engine = engine_with(
        vec![
            (bean, MarkerSet::from([Marker::JavaBean])),
            (summary, MarkerSet::from([Marker::JavaBean])),
        ],
        EngineConfig::default(),
    );

    let first = engine.submit(person()).unwrap();
    assert_eq!(first.recomputed.len(), 2);
    assert_eq!(bean_calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary_calls.load(Ordering::SeqCst), 1);

    let second = engine.submit(person()).unwrap();
    assert_eq!(second.invocations, 0);
    assert!(second.is_noop());
    assert_eq!(bean_calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary_calls.load(Ordering::SeqCst), 1);

    let summary_id = id_of(&engine, "Summary");
    let item = engine.item(&summary_id).unwrap();
    assert_eq!(item.payload, json!({ "methods": 2 }));
    assert_eq!(
        item.upstream.iter().cloned().collect::<Vec<_>>(),
        vec![id_of(&engine, "Bean")]
    );
}

#[test]
fn repeated_notification_does_not_retry_failed_seeds() {
    let (failing, calls) = scripted("Failing", |id, _ctx| {
        Err(ProviderError::invalid(id, "always fails"))
    });
    let mut engine = engine_with(
        vec![(failing, MarkerSet::from([Marker::JavaBean]))],
        EngineConfig::default(),
    );
    let markers = MarkerSet::from([Marker::JavaBean]);

    let first = engine.on_declaration_changed(person(), &markers).unwrap();
    assert_eq!(first.invocations, 1);
    assert_eq!(first.failures.len(), 1);

    let second = engine.on_declaration_changed(person(), &markers).unwrap();
    assert_eq!(second.invocations, 0);
    assert!(second.is_noop());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.state(&id_of(&engine, "Failing")), ItemState::Invalid);
}

#[test]
fn changing_one_marker_leaves_unrelated_provider_alone() {
    let (a, a_calls) = scripted("A", |id, _ctx| {
        let mut draft = ItemDraft::new(id);
        draft.method("a()", "");
        Ok(Computed::Ready(draft))
    });
    let (b, b_calls) = scripted("B", |id, ctx| {
        let a = id.sibling("A".into());
        match ctx.require(&a)? {
            Lookup::Ready(item) => {
                let mut draft = ItemDraft::new(id);
                draft.method("b()", item.fragments[0].signature.clone());
                Ok(Computed::Ready(draft))
            }
            Lookup::Deferred => Ok(Computed::Deferred),
        }
    });
    let mut engine = engine_with(
        vec![
            (a, MarkerSet::from([Marker::Equals])),
            (b, MarkerSet::from([Marker::ToString])),
        ],
        EngineConfig::default(),
    );

    let decl = person().with_marker(Marker::Equals).with_marker(Marker::ToString);
    engine.submit(decl.clone()).unwrap();
    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(b_calls.load(Ordering::SeqCst), 1);

    let edited = decl.with_field(FieldDecl::new("age", "int"));
    let report = engine
        .on_declaration_changed(edited, &MarkerSet::from([Marker::ToString]))
        .unwrap();
    assert_eq!(report.recomputed, vec![id_of(&engine, "B")]);
    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(b_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn only_the_true_fan_out_is_recomputed() {
    let (bean, bean_calls) = bean();
    let (summary, summary_calls) = summary();
    let config = EngineConfig {
        report_unchanged: true,
        ..EngineConfig::default()
    };
    let mut engine = engine_with(
        vec![
            (bean, MarkerSet::from([Marker::JavaBean])),
            (summary, MarkerSet::from([Marker::JavaBean])),
        ],
        config,
    );
    engine.submit(person()).unwrap();

    // A new hand-written method changes the declaration but not Bean's output.
    let edited = person().with_method(MethodDecl::new("helper", vec![], "void", ""));
    let report = engine.on_declaration_changed(edited, &MarkerSet::new()).unwrap();

    assert_eq!(report.recomputed, vec![id_of(&engine, "Bean")]);
    assert!(report.changed.is_empty());
    assert_eq!(report.skipped, vec![id_of(&engine, "Summary")]);
    assert_eq!(bean_calls.load(Ordering::SeqCst), 2);
    assert_eq!(summary_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn output_change_propagates_downstream() {
    let (bean, _) = bean();
    let (summary, summary_calls) = summary();
    let mut engine = engine_with(
        vec![
            (bean, MarkerSet::from([Marker::JavaBean])),
            (summary, MarkerSet::from([Marker::Equals])),
        ],
        EngineConfig::default(),
    );
    engine.submit(person().with_marker(Marker::Equals)).unwrap();

    let edited = person()
        .with_marker(Marker::Equals)
        .with_field(FieldDecl::new("age", "int"));
    let report = engine
        .on_declaration_changed(edited, &MarkerSet::from([Marker::JavaBean]))
        .unwrap();

    let summary_id = id_of(&engine, "Summary");
    assert!(report.changed.contains(&summary_id));
    assert_eq!(summary_calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        engine.item(&summary_id).unwrap().payload,
        json!({ "methods": 3 })
    );
}

#[test]
fn demanded_prerequisite_is_computed_in_the_same_pass() {
    let (bean, bean_calls) = bean();
    let (summary, _) = summary();
    // Only Summary is triggered; Bean is computed on demand.
    let mut engine = engine_with(
        vec![
            (summary, MarkerSet::from([Marker::Equals])),
            (bean, MarkerSet::from([Marker::Controller])),
        ],
        EngineConfig::default(),
    );
    let report = engine.submit(person().with_marker(Marker::Equals)).unwrap();

    assert_eq!(bean_calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.state(&id_of(&engine, "Bean")), ItemState::Valid);
    assert_eq!(engine.state(&id_of(&engine, "Summary")), ItemState::Valid);
    assert_eq!(
        report.recomputed,
        vec![id_of(&engine, "Summary"), id_of(&engine, "Bean")]
    );
    assert_eq!(
        engine.graph().edge_kind(&id_of(&engine, "Bean"), &id_of(&engine, "Summary")),
        Some(EdgeKind::Hard)
    );
}

#[test]
fn mutual_hard_requirement_is_a_configuration_error() {
    let (a, _) = scripted("A", |id, ctx| match ctx.require(&id.sibling("B".into()))? {
        Lookup::Ready(_) => Ok(Computed::Ready(ItemDraft::new(id))),
        Lookup::Deferred => Ok(Computed::Deferred),
    });
    let (b, _) = scripted("B", |id, ctx| match ctx.require(&id.sibling("A".into()))? {
        Lookup::Ready(_) => Ok(Computed::Ready(ItemDraft::new(id))),
        Lookup::Deferred => Ok(Computed::Deferred),
    });
    let mut engine = engine_with(
        vec![
            (a, MarkerSet::from([Marker::JavaBean])),
            (b, MarkerSet::from([Marker::JavaBean])),
        ],
        EngineConfig::default(),
    );

    let report = engine.submit(person()).unwrap();
    let a_id = id_of(&engine, "A");
    let b_id = id_of(&engine, "B");

    assert!(matches!(
        report.failure(&b_id),
        Some(ProviderError::Core(weft_core::CoreError::HardCycle { .. }))
    ));
    assert_eq!(
        report.failure(&a_id),
        Some(&ProviderError::UpstreamFailed {
            upstream: b_id.clone()
        })
    );
    assert_eq!(engine.state(&a_id), ItemState::Invalid);
    assert_eq!(engine.state(&b_id), ItemState::Invalid);
    // The rejected hard edge is kept only as a soft one.
    assert_eq!(engine.graph().edge_kind(&b_id, &a_id), Some(EdgeKind::Hard));
    assert_eq!(engine.graph().edge_kind(&a_id, &b_id), Some(EdgeKind::Soft));
}

/// Requires `other` only while the JavaBean marker carries `flag = "true"`.
fn needs(kind: &'static str, other: &'static str, flag: &'static str) -> (Arc<Scripted>, Arc<AtomicU32>) {
    scripted(kind, move |id, ctx| {
        let decl = ctx.declaration()?;
        if decl.marker_attr(Marker::JavaBean, flag) == Some("true") {
            if let Lookup::Deferred = ctx.require(&id.sibling(other.into()))? {
                return Ok(Computed::Deferred);
            }
        }
        Ok(Computed::Ready(ItemDraft::new(id)))
    })
}

fn flipping_engine() -> Engine {
    let (b, _) = needs("B", "A", "needA");
    let (a, _) = needs("A", "B", "needB");
    engine_with(
        vec![
            (b, MarkerSet::from([Marker::JavaBean])),
            (a, MarkerSet::from([Marker::JavaBean])),
        ],
        EngineConfig::default(),
    )
}

#[test]
fn reversed_hard_requirement_recovers_in_the_same_pass() {
    let mut engine = flipping_engine();
    engine
        .submit(person().with_marker_attr(Marker::JavaBean, "needB", "true"))
        .unwrap();

    // B now requires A while A's edge from B is still in the graph; A drops
    // that edge when it recomputes later in the pass.
    let flipped = person().with_marker_attr(Marker::JavaBean, "needA", "true");
    let report = engine.submit(flipped.clone()).unwrap();

    let a_id = id_of(&engine, "A");
    let b_id = id_of(&engine, "B");
    assert!(report.failures.is_empty());
    assert_eq!(engine.state(&b_id), ItemState::Valid);
    assert_eq!(engine.state(&a_id), ItemState::Valid);
    assert_eq!(engine.graph().edge_kind(&a_id, &b_id), Some(EdgeKind::Hard));
    assert_eq!(engine.graph().edge_kind(&b_id, &a_id), None);

    let mut fresh = flipping_engine();
    fresh.submit(flipped).unwrap();
    assert_eq!(fresh.state(&b_id), engine.state(&b_id));
    assert_eq!(fresh.graph().edges(), engine.graph().edges());
}

/// Soft-reads `other` and records whether it was ready.
fn watcher(kind: &'static str, other: &'static str, defer: bool) -> (Arc<Scripted>, Arc<AtomicU32>) {
    scripted(kind, move |id, ctx| {
        let saw = match ctx.read(&id.sibling(other.into()))? {
            Lookup::Ready(_) => true,
            Lookup::Deferred if defer => return Ok(Computed::Deferred),
            Lookup::Deferred => false,
        };
        Ok(Computed::Ready(
            ItemDraft::new(id).with_payload(json!({ "saw": saw })),
        ))
    })
}

#[test]
fn soft_cycle_with_fallback_converges() {
    let (p, _) = watcher("P", "Q", false);
    let (q, _) = watcher("Q", "P", false);
    let mut engine = engine_with(
        vec![
            (p, MarkerSet::from([Marker::JavaBean])),
            (q, MarkerSet::from([Marker::JavaBean])),
        ],
        EngineConfig::default(),
    );

    let report = engine.submit(person()).unwrap();
    assert!(report.failures.is_empty());
    for kind in ["P", "Q"] {
        let item = engine.item(&id_of(&engine, kind)).unwrap();
        assert_eq!(item.payload, json!({ "saw": true }));
    }
    assert_eq!(
        engine.graph().edge_kind(&id_of(&engine, "P"), &id_of(&engine, "Q")),
        Some(EdgeKind::Soft)
    );

    // Converged: nothing left to do.
    assert!(engine.submit(person()).unwrap().is_noop());
}

#[test]
fn mutual_deferral_exceeds_the_ceiling() {
    let (r, _) = scripted("R", |id, _ctx| Ok(Computed::Ready(ItemDraft::new(id))));
    let (p, p_calls) = watcher("P", "Q", true);
    let (q, _) = watcher("Q", "P", true);
    let config = EngineConfig {
        retry_ceiling: 3,
        ..EngineConfig::default()
    };
    let mut engine = engine_with(
        vec![
            (r, MarkerSet::from([Marker::JavaBean])),
            (p, MarkerSet::from([Marker::JavaBean])),
            (q, MarkerSet::from([Marker::JavaBean])),
        ],
        config,
    );

    let err = engine.submit(person()).unwrap_err();
    match err {
        EngineError::DeferralCeilingExceeded {
            ceiling,
            implicated,
        } => {
            assert_eq!(ceiling, 3);
            assert_eq!(implicated, vec![id_of(&engine, "P"), id_of(&engine, "Q")]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(p_calls.load(Ordering::SeqCst), 4);
    assert_eq!(engine.state(&id_of(&engine, "R")), ItemState::Valid);
    assert_eq!(engine.state(&id_of(&engine, "P")), ItemState::Deferred);
    assert!(engine.reader().get(&id_of(&engine, "P")).is_none());
}

#[test]
fn failure_marks_strict_dependents_invalid_and_recovers() {
    let (strict, _) = scripted("Strict", |id, ctx| {
        let decl = ctx.declaration()?;
        if decl.field("version").is_none() {
            return Err(ProviderError::invalid(id, "no version field"));
        }
        Ok(Computed::Ready(ItemDraft::new(id)))
    });
    let (reader, _) = scripted("Reader", |id, ctx| {
        match ctx.require(&id.sibling("Strict".into()))? {
            Lookup::Ready(_) => Ok(Computed::Ready(ItemDraft::new(id))),
            Lookup::Deferred => Ok(Computed::Deferred),
        }
    });
    let (bean, _) = bean();
    let mut engine = engine_with(
        vec![
            (strict, MarkerSet::from([Marker::Entity])),
            (reader, MarkerSet::from([Marker::Entity])),
            (bean, MarkerSet::from([Marker::JavaBean])),
        ],
        EngineConfig::default(),
    );

    let decl = person().with_marker(Marker::Entity);
    let report = engine.submit(decl.clone()).unwrap();
    let strict_id = id_of(&engine, "Strict");
    let reader_id = id_of(&engine, "Reader");
    assert!(matches!(
        report.failure(&strict_id),
        Some(ProviderError::Invalid { .. })
    ));
    assert_eq!(
        report.failure(&reader_id),
        Some(&ProviderError::UpstreamFailed {
            upstream: strict_id.clone()
        })
    );
    // Unrelated subgraph unaffected.
    assert_eq!(engine.state(&id_of(&engine, "Bean")), ItemState::Valid);

    let fixed = decl.with_field(FieldDecl::new("version", "Integer").annotated("Version"));
    let report = engine.submit(fixed).unwrap();
    assert!(report.failures.is_empty());
    assert_eq!(engine.state(&strict_id), ItemState::Valid);
    assert_eq!(engine.state(&reader_id), ItemState::Valid);
    assert!(engine.failure(&reader_id).is_none());
}

#[test]
fn hand_written_member_beats_generated() {
    let (generated, _) = scripted("Gen", |id, _ctx| {
        let mut draft = ItemDraft::new(id);
        draft.method("foo()", "return generated();");
        draft.method("extra()", "");
        Ok(Computed::Ready(draft))
    });
    let mut engine = engine_with(
        vec![(generated, MarkerSet::from([Marker::JavaBean]))],
        EngineConfig::default(),
    );
    let decl = person().with_method(MethodDecl::new("foo", vec![], "void", "return mine();"));
    engine.submit(decl).unwrap();

    let view = engine.governor_view(&"com.example.Person".into());
    let foo = view.find(FragmentKind::Method, "foo()").unwrap();
    assert_eq!(foo.body, "return mine();");
    assert!(view.collisions.is_empty());
    assert_eq!(view.method_signatures(), vec!["foo()", "extra()"]);
}

fn emit_bar(
    body: &'static str,
) -> impl Fn(&Identifier, &mut ComputeContext<'_>) -> Result<Computed, ProviderError> + Send + Sync + 'static
{
    move |id, _ctx| {
        let mut draft = ItemDraft::new(id);
        draft.method("bar()", body);
        Ok(Computed::Ready(draft))
    }
}

#[test]
fn generated_collision_names_the_later_provider() {
    let (x, _) = scripted("X", emit_bar("x"));
    let (y, _) = scripted("Y", emit_bar("y"));
    let mut engine = engine_with(
        vec![
            (y, MarkerSet::from([Marker::JavaBean])),
            (x, MarkerSet::from([Marker::JavaBean])),
        ],
        EngineConfig::default(),
    );
    engine.submit(person()).unwrap();

    // Y was registered first here, so Y wins and X is named.
    let view = engine.governor_view(&"com.example.Person".into());
    assert_eq!(view.find(FragmentKind::Method, "bar()").unwrap().body, "y");
    assert_eq!(view.collisions.len(), 1);
    assert_eq!(view.collisions[0].dropped, id_of(&engine, "X"));
    assert_eq!(view.collisions[0].kept, id_of(&engine, "Y"));
}

#[test]
fn unregistering_retracts_and_reregistering_restores() {
    let (bean, _) = bean();
    let (summary, _) = summary();
    let mut engine = engine_with(
        vec![
            (bean, MarkerSet::from([Marker::JavaBean])),
            (summary, MarkerSet::from([Marker::JavaBean])),
        ],
        EngineConfig::default(),
    );
    engine.submit(person()).unwrap();
    let bean_id = id_of(&engine, "Bean");
    let summary_id = id_of(&engine, "Summary");

    let report = engine.unregister_provider(&"Bean".into()).unwrap();
    assert_eq!(report.evicted, vec![bean_id.clone()]);
    assert_eq!(engine.state(&bean_id), ItemState::Unknown);
    assert!(matches!(
        engine.failure(&summary_id),
        Some(ProviderError::NoProvider { .. })
    ));
    let view = engine.governor_view(&"com.example.Person".into());
    assert!(view.method_signatures().iter().all(|s| !s.starts_with("get_")));

    let (bean_again, _) = self::bean();
    let report = engine
        .register_provider(bean_again, MarkerSet::from([Marker::JavaBean]))
        .unwrap();
    assert!(report.failures.is_empty());
    assert_eq!(engine.state(&bean_id), ItemState::Valid);
    assert_eq!(engine.state(&summary_id), ItemState::Valid);
    // Re-registered providers rank last.
    assert_eq!(engine.registry().precedence(&"Bean".into()), Some(2));
}

#[test]
fn removing_a_declaration_retracts_its_items() {
    let (bean, _) = bean();
    let mut engine = engine_with(
        vec![(bean, MarkerSet::from([Marker::JavaBean]))],
        EngineConfig::default(),
    );
    let reader = engine.reader();
    engine.submit(person()).unwrap();
    assert_eq!(reader.len(), 2);

    let report = engine.remove_declaration(&"com.example.Person".into()).unwrap();
    assert_eq!(report.evicted.len(), 2);
    assert!(reader.is_empty());
    assert!(engine.governor_view(&"com.example.Person".into()).fragments.is_empty());
    assert_eq!(engine.graph().node_count(), 0);
}

#[test]
fn explicit_recompute_runs_one_provider() {
    let (bean, bean_calls) = bean();
    let (summary, summary_calls) = summary();
    let mut engine = engine_with(
        vec![
            (bean, MarkerSet::from([Marker::JavaBean])),
            (summary, MarkerSet::from([Marker::JavaBean])),
        ],
        EngineConfig::default(),
    );
    engine.submit(person()).unwrap();

    let report = engine.recompute(&id_of(&engine, "Bean")).unwrap();
    assert_eq!(report.invocations, 1);
    assert!(report.changed.is_empty());
    assert_eq!(bean_calls.load(Ordering::SeqCst), 2);
    assert_eq!(summary_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn readers_see_valid_items_from_other_threads() {
    let (bean, _) = bean();
    let mut engine = engine_with(
        vec![(bean, MarkerSet::from([Marker::JavaBean]))],
        EngineConfig::default(),
    );
    let reader = engine.reader();
    engine.submit(person()).unwrap();
    let bean_id = id_of(&engine, "Bean");

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reader = reader.clone();
                let bean_id = bean_id.clone();
                scope.spawn(move || reader.get(&bean_id).map(|item| item.fragments.len()))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some(2));
        }
    });
}
