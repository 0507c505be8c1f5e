//! End-to-end reload scenarios across the engine crates.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use lutra_bytecode::{SymbolRef, SymbolTable};
use lutra_runtime::{
    ApplyContext, Behavior, CodeKind, CompiledFunction, Instance, LiveInstanceSet, OverrideSlot,
};
use lutra_reload::{
    ArtifactInfo, ArtifactKey, ChannelDispatcher, CompileError, CompiledDocument, Dispatcher,
    DocumentCompiler, HotReloadContext, InlineDispatcher, ReloadConfig, ReloadCoordinator,
    ReloadError, ReloadEvent, ReloadObserver, ReloadOutcome,
};

const APPLY_SYMBOL: &str = "apply_document";

// ---------------------------------------------------------------------------
// Test collaborators
// ---------------------------------------------------------------------------

/// Compiles `key = value` documents into behaviors that write the value into
/// the instance property bag. A document starting with `fail` is rejected.
struct TestCompiler;

struct TestDocument {
    text: String,
}

impl CompiledDocument for TestDocument {
    fn bind(&self, _template: Option<&Arc<Instance>>) -> Result<Behavior, CompileError> {
        let text = self.text.clone();
        Ok(Arc::new(move |_ctx, inst: &Arc<Instance>| {
            inst.set_property("text", text.clone());
            Ok(())
        }))
    }
}

impl DocumentCompiler for TestCompiler {
    fn compile(
        &self,
        source: &str,
        _artifact: &ArtifactKey,
    ) -> Result<Arc<dyn CompiledDocument>, CompileError> {
        let text = source.trim();
        if text.starts_with("fail") {
            return Err(CompileError::new(format!("unexpected token `{text}`")));
        }
        Ok(Arc::new(TestDocument {
            text: text.to_string(),
        }))
    }
}

/// Compiler that parks inside `compile` until the test releases a permit,
/// so supersession ordering becomes deterministic.
struct GatedCompiler {
    entered: crossbeam_channel::Sender<()>,
    permit: crossbeam_channel::Receiver<()>,
}

impl DocumentCompiler for GatedCompiler {
    fn compile(
        &self,
        source: &str,
        artifact: &ArtifactKey,
    ) -> Result<Arc<dyn CompiledDocument>, CompileError> {
        let _ = self.entered.send(());
        let _ = self.permit.recv();
        TestCompiler.compile(source, artifact)
    }
}

#[derive(Default)]
struct CollectingObserver {
    events: Mutex<Vec<ReloadEvent>>,
}

impl CollectingObserver {
    fn compile_failures(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, ReloadEvent::CompileFailure { .. }))
            .count()
    }

    fn degraded(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, ReloadEvent::Degraded { .. }))
            .count()
    }

    fn unsupported(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, ReloadEvent::UnsupportedPlatform { .. }))
            .count()
    }
}

impl ReloadObserver for CollectingObserver {
    fn event(&self, event: &ReloadEvent) {
        self.events.lock().push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Fixture {
    context: Arc<HotReloadContext>,
    observer: Arc<CollectingObserver>,
    apply_fn: Arc<CompiledFunction>,
    source_path: PathBuf,
    _dir: tempfile::TempDir,
}

fn apply_symbols() -> Arc<SymbolTable> {
    let mut table = SymbolTable::new();
    table
        .insert(SymbolRef {
            token: 0xA1,
            name: APPLY_SYMBOL.into(),
            arity: 2,
        })
        .expect("unique token");
    Arc::new(table)
}

/// Build-function body: `LoadSelf; CallSym apply_document; Ret`.
fn build_body() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.push(0x01);
    bytes.push(0x30);
    bytes.extend_from_slice(&0xA1u32.to_le_bytes());
    bytes.push(0x32);
    bytes
}

/// Apply-function body with a relocatable entry long enough to hook.
fn patchable_apply_body() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.push(0x02); // LoadConst
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.push(0x11); // SetProp
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.push(0x32); // Ret
    bytes
}

fn baseline_behavior() -> Behavior {
    Arc::new(|_ctx, inst: &Arc<Instance>| {
        inst.set_property("text", "baseline");
        Ok(())
    })
}

enum TargetShape {
    /// Patchable portable code
    Direct,
    /// Native thunk with a weaver-provisioned override slot
    NativeWithSlot,
    /// Native thunk, no slot (style/resource-only artifact)
    NativeNoSlot,
}

fn fixture(shape: TargetShape) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let source_path = dir.path().join("view.lml");
    std::fs::write(&source_path, "baseline").expect("seed source");

    let context = HotReloadContext::new(ReloadConfig::default());
    let observer = Arc::new(CollectingObserver::default());
    let instances = Arc::new(LiveInstanceSet::new());
    let key = ArtifactKey::new("view.lml");

    let (kind, baseline) = match shape {
        TargetShape::Direct => (CodeKind::Portable, baseline_behavior()),
        TargetShape::NativeWithSlot => {
            let slot = context.override_slots().register(key.as_str());
            (
                CodeKind::Native,
                OverrideSlot::weave(slot, baseline_behavior()),
            )
        }
        TargetShape::NativeNoSlot => (CodeKind::Native, baseline_behavior()),
    };

    let apply_fn = CompiledFunction::builder()
        .name(APPLY_SYMBOL)
        .kind(kind)
        .symbols(apply_symbols())
        .baseline(baseline)
        .installed(patchable_apply_body())
        .live_set(Arc::clone(&instances))
        .build();
    let build_fn = CompiledFunction::builder()
        .name("build_document")
        .symbols(apply_symbols())
        .installed(build_body())
        .build();

    context.register_artifact(ArtifactInfo::new(
        key,
        &source_path,
        build_fn,
        Arc::clone(&apply_fn),
        APPLY_SYMBOL,
        instances,
    ));

    Fixture {
        context,
        observer,
        apply_fn,
        source_path,
        _dir: dir,
    }
}

impl Fixture {
    fn coordinator(&self, dispatcher: Arc<dyn Dispatcher>) -> Arc<ReloadCoordinator> {
        ReloadCoordinator::new(
            Arc::clone(&self.context),
            Arc::new(TestCompiler),
            dispatcher,
            Arc::clone(&self.observer) as Arc<dyn ReloadObserver>,
        )
    }

    fn spawn_instances(&self, count: usize) -> Vec<Arc<Instance>> {
        (0..count)
            .map(|_| {
                let inst = Instance::new("panel");
                self.apply_fn
                    .invoke(&ApplyContext::new("view.lml", 0), &inst)
                    .expect("baseline apply");
                inst
            })
            .collect()
    }

    fn write_source(&self, text: &str) {
        std::fs::write(&self.source_path, text).expect("write source");
    }
}

fn texts(instances: &[Arc<Instance>]) -> Vec<String> {
    instances
        .iter()
        .map(|inst| inst.property("text").unwrap_or_default())
        .collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reload_updates_every_live_instance() {
    let fx = fixture(TargetShape::Direct);
    let coordinator = fx.coordinator(Arc::new(InlineDispatcher));
    let instances = fx.spawn_instances(3);
    assert_eq!(texts(&instances), vec!["baseline"; 3]);

    fx.write_source("text = v2");
    let outcome = coordinator.reload_now(&fx.source_path).await.unwrap();

    assert_eq!(
        outcome,
        ReloadOutcome::Applied {
            instances_updated: 3
        }
    );
    assert_eq!(texts(&instances), vec!["text = v2"; 3]);

    let stats = fx.context.stats();
    assert_eq!(stats.sessions_applied, 1);
    assert_eq!(stats.instances_updated, 3);
}

#[tokio::test]
async fn compile_failure_keeps_previous_behavior() {
    let fx = fixture(TargetShape::Direct);
    let coordinator = fx.coordinator(Arc::new(InlineDispatcher));
    let instances = fx.spawn_instances(3);

    fx.write_source("text = good");
    coordinator.reload_now(&fx.source_path).await.unwrap();
    assert_eq!(texts(&instances), vec!["text = good"; 3]);

    fx.write_source("fail here");
    let err = coordinator.reload_now(&fx.source_path).await.unwrap_err();
    assert!(matches!(err, ReloadError::Compile(_)));

    // Prior behavior is retained, both for the snapshot and for dispatch.
    assert_eq!(texts(&instances), vec!["text = good"; 3]);
    let fresh = Instance::new("panel");
    fx.apply_fn
        .invoke(&ApplyContext::new("view.lml", 0), &fresh)
        .unwrap();
    assert_eq!(fresh.property("text").as_deref(), Some("text = good"));

    assert_eq!(fx.observer.compile_failures(), 1);
    assert_eq!(fx.context.stats().compile_failures, 1);
}

#[tokio::test]
async fn empty_snapshot_still_installs_for_future_instances() {
    let fx = fixture(TargetShape::Direct);
    let coordinator = fx.coordinator(Arc::new(InlineDispatcher));

    fx.write_source("text = future");
    let outcome = coordinator.reload_now(&fx.source_path).await.unwrap();
    assert_eq!(
        outcome,
        ReloadOutcome::Applied {
            instances_updated: 0
        }
    );

    let inst = Instance::new("panel");
    fx.apply_fn
        .invoke(&ApplyContext::new("view.lml", 1), &inst)
        .unwrap();
    assert_eq!(inst.property("text").as_deref(), Some("text = future"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rapid_double_edit_installs_only_the_second() {
    let fx = fixture(TargetShape::Direct);
    let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
    let (permit_tx, permit_rx) = crossbeam_channel::unbounded();
    let coordinator = ReloadCoordinator::new(
        Arc::clone(&fx.context),
        Arc::new(GatedCompiler {
            entered: entered_tx,
            permit: permit_rx,
        }),
        Arc::new(ChannelDispatcher::new()),
        Arc::clone(&fx.observer) as Arc<dyn ReloadObserver>,
    );
    let instances = fx.spawn_instances(2);

    fx.write_source("first");
    let first_coordinator = Arc::clone(&coordinator);
    let first_path = fx.source_path.clone();
    let first = tokio::spawn(async move { first_coordinator.reload_now(&first_path).await });
    entered_rx
        .recv_timeout(std::time::Duration::from_secs(5))
        .expect("first session reaches the compiler");

    // Second edit lands while the first session is still compiling.
    fx.write_source("second");
    let second_coordinator = Arc::clone(&coordinator);
    let second_path = fx.source_path.clone();
    let second = tokio::spawn(async move { second_coordinator.reload_now(&second_path).await });
    entered_rx
        .recv_timeout(std::time::Duration::from_secs(5))
        .expect("second session reaches the compiler");

    permit_tx.send(()).unwrap();
    permit_tx.send(()).unwrap();

    let first_outcome = first.await.unwrap().unwrap();
    let second_outcome = second.await.unwrap().unwrap();

    assert_eq!(first_outcome, ReloadOutcome::Superseded);
    assert_eq!(
        second_outcome,
        ReloadOutcome::Applied {
            instances_updated: 2
        }
    );
    assert_eq!(texts(&instances), vec!["second"; 2]);
    assert_eq!(fx.context.stats().sessions_superseded, 1);
}

#[tokio::test]
async fn native_target_with_slot_takes_the_fallback_channel() {
    let fx = fixture(TargetShape::NativeWithSlot);
    let coordinator = fx.coordinator(Arc::new(InlineDispatcher));
    let instances = fx.spawn_instances(2);

    fx.write_source("via slot");
    let outcome = coordinator.reload_now(&fx.source_path).await.unwrap();
    assert_eq!(
        outcome,
        ReloadOutcome::Applied {
            instances_updated: 2
        }
    );
    assert_eq!(texts(&instances), vec!["via slot"; 2]);

    // Direct patching was reported unavailable, then the slot carried it.
    assert_eq!(fx.observer.unsupported(), 1);
    assert_eq!(fx.observer.degraded(), 0);

    let state = fx
        .context
        .artifact_for_source(&fx.source_path)
        .expect("registered");
    assert!(!state.is_degraded());

    // The installed bytes were never touched on this path.
    assert_eq!(fx.apply_fn.body().bytes(), patchable_apply_body().as_slice());

    let slot = fx
        .context
        .override_slots()
        .lookup("view.lml")
        .expect("slot provisioned");
    assert!(slot.is_set());
}

#[tokio::test]
async fn no_slot_on_unsupported_target_degrades_once() {
    let fx = fixture(TargetShape::NativeNoSlot);
    let coordinator = fx.coordinator(Arc::new(InlineDispatcher));
    let instances = fx.spawn_instances(2);

    fx.write_source("never lands");
    let outcome = coordinator.reload_now(&fx.source_path).await.unwrap();
    assert_eq!(outcome, ReloadOutcome::Degraded);

    // Baseline keeps running indefinitely.
    assert_eq!(texts(&instances), vec!["baseline"; 2]);
    let fresh = Instance::new("panel");
    fx.apply_fn
        .invoke(&ApplyContext::new("view.lml", 0), &fresh)
        .unwrap();
    assert_eq!(fresh.property("text").as_deref(), Some("baseline"));

    assert_eq!(fx.observer.degraded(), 1);
    let state = fx
        .context
        .artifact_for_source(&fx.source_path)
        .expect("registered");
    assert!(state.is_degraded());

    // Later edits are dropped silently; degraded is logged exactly once.
    fx.write_source("still never");
    let outcome = coordinator.reload_now(&fx.source_path).await.unwrap();
    assert_eq!(outcome, ReloadOutcome::Degraded);
    assert_eq!(fx.observer.degraded(), 1);
    assert_eq!(fx.context.stats().degraded_artifacts, 1);
}

#[tokio::test]
async fn teardown_restores_baseline_dispatch() {
    let fx = fixture(TargetShape::Direct);
    let coordinator = fx.coordinator(Arc::new(InlineDispatcher));
    let instances = fx.spawn_instances(1);

    fx.write_source("patched");
    coordinator.reload_now(&fx.source_path).await.unwrap();
    assert_eq!(texts(&instances), vec!["patched"]);

    fx.context.teardown();

    let inst = Instance::new("panel");
    fx.apply_fn
        .invoke(&ApplyContext::new("view.lml", 0), &inst)
        .unwrap();
    assert_eq!(inst.property("text").as_deref(), Some("baseline"));
    assert_eq!(fx.apply_fn.body().bytes(), patchable_apply_body().as_slice());
}

#[tokio::test]
async fn change_event_for_unknown_source_is_rejected() {
    let fx = fixture(TargetShape::Direct);
    let coordinator = fx.coordinator(Arc::new(InlineDispatcher));
    let err = coordinator
        .reload_now(std::path::Path::new("/no/such/file.lml"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReloadError::UnknownSource(_)));
}
