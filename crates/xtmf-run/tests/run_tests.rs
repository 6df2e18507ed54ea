//! Tests for xtmf-run: the run lifecycle, RunResults and the Scheduler

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};
use xtmf_core::{OutboundCommand, RunId};
use xtmf_model::modules::{fail, status};
use xtmf_model::*;
use xtmf_run::*;

/// Runs change the process working directory; tests that execute one hold this.
static CWD_LOCK: Mutex<()> = Mutex::new(());

fn cwd_lock() -> MutexGuard<'static, ()> {
    CWD_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

struct Panic;

impl Module for Panic {
    fn invoke(&self) -> anyhow::Result<()> {
        panic!("oh no");
    }
}

struct PanicOnValidate;

impl Module for PanicOnValidate {
    fn runtime_validation(&self) -> Result<(), String> {
        panic!("validation blew up");
    }
}

/// Records the working directory seen while invoked.
struct CwdRecorder {
    seen: Arc<Mutex<Option<PathBuf>>>,
}

impl Module for CwdRecorder {
    fn invoke(&self) -> anyhow::Result<()> {
        *self.seen.lock().unwrap() = Some(std::env::current_dir()?);
        Ok(())
    }
}

fn runtime_recording_cwd(seen: Arc<Mutex<Option<PathBuf>>>) -> Arc<XtmfRuntime> {
    let mut registry = default_registry();
    registry.register(ModuleDescriptor::builder("Test.Panic", |_| Panic).build());
    registry.register(
        ModuleDescriptor::builder("Test.PanicOnValidate", |_| PanicOnValidate).build(),
    );
    registry.register(
        ModuleDescriptor::builder("Test.PanicInFactory", |_| -> Panic {
            panic!("factory blew up")
        })
        .build(),
    );
    registry.register(
        ModuleDescriptor::builder("Test.CwdRecorder", move |_| CwdRecorder { seen: seen.clone() })
            .build(),
    );
    Arc::new(XtmfRuntime::new(Arc::new(registry)))
}

fn runtime() -> Arc<XtmfRuntime> {
    runtime_recording_cwd(Arc::default())
}

fn id(n: usize) -> StructureId {
    StructureId(n)
}

/// `start1` wired straight to `action`.
fn start_to(action: ModelSystemStructure) -> ModelSystem {
    let target = action.id;
    ModelSystem::new(
        "ms",
        Boundary::new("global")
            .with_structure(ModelSystemStructure::start(id(0), "start1"))
            .with_structure(action)
            .with_link(Link::single(id(0), "ToExecute", target)),
    )
}

fn hello() -> ModelSystem {
    start_to(
        ModelSystemStructure::module(id(1), "hello", status::STATUS_MESSAGE_TYPE)
            .with_parameter("hi"),
    )
}

fn bytes_of(ms: &ModelSystem) -> Bytes {
    Bytes::from(format::save(ms).unwrap())
}

fn context(
    run: &str,
    ms: &ModelSystem,
    dir: &Path,
    start: &str,
    runtime: Arc<XtmfRuntime>,
) -> RunContext {
    RunContext::new(RunId::new(run), bytes_of(ms), dir, start, runtime)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundCommand>) -> Vec<OutboundCommand> {
    let mut out = Vec::new();
    while let Ok(command) = rx.try_recv() {
        out.push(command);
    }
    out
}

/// Execute a run with a channel reporter, returning the outcome, the final
/// state and every message the run reported.
fn execute(context: RunContext) -> (RunOutcome, RunState, Vec<OutboundCommand>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let reporter = Arc::new(ChannelReporter::new(context.id().clone(), tx));
    let mut run = Run::new(context).with_reporter(reporter);
    assert_eq!(run.state(), RunState::Created);
    let outcome = run.execute();
    (outcome, run.state(), drain(&mut rx))
}

// ===========================================================================
// RunResults
// ===========================================================================

#[test]
fn completed_results_round_trip() {
    let dir = TempDir::new().unwrap();
    RunResults::completed().save(dir.path()).unwrap();
    let loaded = RunResults::load(dir.path()).unwrap().unwrap();
    assert!(loaded.completed);
    assert!(!loaded.has_error());
}

#[test]
fn message_only_error_has_error() {
    let dir = TempDir::new().unwrap();
    let results = RunResults {
        error_message: Some("bad".into()),
        ..Default::default()
    };
    results.save(dir.path()).unwrap();
    let loaded = RunResults::load(dir.path()).unwrap().unwrap();
    assert!(loaded.has_error());
    assert!(!loaded.completed);
    assert_eq!(loaded.error_stack_trace, None);
}

#[test]
fn absent_results_are_none_and_corrupt_results_fail() {
    let dir = TempDir::new().unwrap();
    assert_eq!(RunResults::load(dir.path()).unwrap(), None);
    std::fs::write(RunResults::path(dir.path()), "{ nope").unwrap();
    assert!(RunResults::load(dir.path()).is_err());
}

#[test]
fn results_file_name_is_fixed() {
    let dir = Path::new("/tmp/run");
    assert_eq!(RunResults::path(dir), dir.join("XTMF.RunResults.json"));
}

// ===========================================================================
// Run lifecycle
// ===========================================================================

#[test]
fn completed_run_reports_status_and_writes_results() {
    let _cwd = cwd_lock();
    let dir = TempDir::new().unwrap();
    let (outcome, state, events) =
        execute(context("r1", &hello(), dir.path(), "start1", runtime()));
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(state, RunState::Completed);
    assert!(state.is_terminal());
    assert_eq!(
        events,
        vec![OutboundCommand::StatusUpdate {
            run_id: RunId::new("r1"),
            message: "hi".into()
        }]
    );
    assert_eq!(
        outcome.to_command(&RunId::new("r1")),
        OutboundCommand::FinishedRun {
            run_id: RunId::new("r1")
        }
    );
    let results = RunResults::load(dir.path()).unwrap().unwrap();
    assert!(results.completed && !results.has_error());
}

#[test]
fn missing_required_hook_fails_validation_before_any_module_runs() {
    let _cwd = cwd_lock();
    let dir = TempDir::new().unwrap();
    let ms = ModelSystem::new(
        "ms",
        Boundary::new("global")
            .with_structure(ModelSystemStructure::start(id(0), "start1"))
            .with_structure(
                ModelSystemStructure::module(id(1), "hello", status::STATUS_MESSAGE_TYPE)
                    .with_parameter("hi"),
            ),
    );
    let (outcome, state, events) = execute(context("r1", &ms, dir.path(), "start1", runtime()));
    assert_eq!(state, RunState::ValidationFailed);
    assert!(events.is_empty());
    match &outcome {
        RunOutcome::ValidationError { message, module } => {
            assert!(message.contains("ToExecute"), "{message}");
            assert_eq!(module.as_deref(), Some("start1"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(matches!(
        outcome.to_command(&RunId::new("r1")),
        OutboundCommand::RunValidationError { .. }
    ));

    let results = RunResults::load(dir.path()).unwrap().unwrap();
    assert!(!results.completed);
    assert_eq!(results.error_module_name.as_deref(), Some("start1"));
    assert_eq!(results.error_stack_trace, None);
}

#[test]
fn runtime_validation_failure_is_reported_as_validation_error() {
    let _cwd = cwd_lock();
    let dir = TempDir::new().unwrap();
    let ms = start_to(
        ModelSystemStructure::module(id(1), "bad", status::PROGRESS_TYPE).with_parameter("1.5"),
    );
    let (outcome, state, events) = execute(context("r1", &ms, dir.path(), "start1", runtime()));
    assert_eq!(state, RunState::RuntimeValidationFailed);
    assert!(events.is_empty());
    assert!(matches!(&outcome, RunOutcome::ValidationError { module: Some(m), .. } if m == "bad"));
    assert!(matches!(
        outcome.to_command(&RunId::new("r1")),
        OutboundCommand::RunValidationError { .. }
    ));
    let results = RunResults::load(dir.path()).unwrap().unwrap();
    assert_eq!(results.error_module_name.as_deref(), Some("bad"));
}

#[test]
fn unresolved_start_path_names_segment_and_parent() {
    let _cwd = cwd_lock();
    let dir = TempDir::new().unwrap();
    let mut ms = hello();
    ms.global.boundaries.push(Boundary::new("A"));
    let (outcome, state, _) = execute(context("r1", &ms, dir.path(), "A.B.start1", runtime()));
    assert_eq!(state, RunState::ValidationFailed);
    match outcome {
        RunOutcome::ValidationError { message, module } => {
            assert!(message.contains("'B'"), "{message}");
            assert!(message.contains("'A'"), "{message}");
            assert_eq!(module, None);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn unconvertible_model_system_data_is_a_validation_error() {
    let _cwd = cwd_lock();
    let dir = TempDir::new().unwrap();
    let context = RunContext::new(
        RunId::new("r1"),
        Bytes::from_static(b"\x41"),
        dir.path(),
        "start1",
        runtime(),
    );
    let (outcome, _, _) = execute(context);
    assert!(
        matches!(
            &outcome,
            RunOutcome::ValidationError { message, .. }
                if message.contains("unable to convert model system data")
        ),
        "{outcome:?}"
    );
}

#[test]
fn module_error_is_a_runtime_failure_with_module_name() {
    let _cwd = cwd_lock();
    let dir = TempDir::new().unwrap();
    let ms = start_to(
        ModelSystemStructure::module(id(1), "boom", fail::FAIL_TYPE).with_parameter("kaput"),
    );
    let (outcome, state, _) = execute(context("r1", &ms, dir.path(), "start1", runtime()));
    assert_eq!(state, RunState::RuntimeFailed);
    match &outcome {
        RunOutcome::RuntimeError { message, stack, module } => {
            assert_eq!(message, "kaput");
            assert!(stack.contains("kaput"), "{stack}");
            assert_eq!(module.as_deref(), Some("boom"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(matches!(
        outcome.to_command(&RunId::new("r1")),
        OutboundCommand::RunFailed { ref message, .. } if message == "kaput"
    ));
    let results = RunResults::load(dir.path()).unwrap().unwrap();
    assert!(results.has_error());
    assert!(results.error_stack_trace.is_some());
    assert_eq!(results.error_module_name.as_deref(), Some("boom"));
}

#[test]
fn panicking_module_is_a_runtime_failure() {
    let _cwd = cwd_lock();
    let dir = TempDir::new().unwrap();
    let ms = start_to(ModelSystemStructure::module(id(1), "panics", "Test.Panic"));
    let (outcome, state, _) = execute(context("r1", &ms, dir.path(), "start1", runtime()));
    assert_eq!(state, RunState::RuntimeFailed);
    assert!(
        matches!(&outcome, RunOutcome::RuntimeError { message, .. } if message == "oh no"),
        "{outcome:?}"
    );
}

#[test]
fn panic_in_runtime_validation_is_a_validation_error_naming_the_module() {
    let _cwd = cwd_lock();
    let dir = TempDir::new().unwrap();
    let ms = start_to(ModelSystemStructure::module(id(1), "shaky", "Test.PanicOnValidate"));
    let (outcome, state, events) = execute(context("r1", &ms, dir.path(), "start1", runtime()));
    assert_eq!(state, RunState::RuntimeValidationFailed);
    assert!(state.is_terminal());
    assert!(events.is_empty());
    match &outcome {
        RunOutcome::ValidationError { message, module } => {
            assert!(message.contains("validation blew up"), "{message}");
            assert_eq!(module.as_deref(), Some("shaky"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    let results = RunResults::load(dir.path()).unwrap().unwrap();
    assert!(!results.completed);
    assert_eq!(results.error_module_name.as_deref(), Some("shaky"));
}

#[test]
fn panic_while_constructing_is_a_validation_error_and_persisted() {
    let _cwd = cwd_lock();
    let dir = TempDir::new().unwrap();
    let ms = start_to(ModelSystemStructure::module(id(1), "factory", "Test.PanicInFactory"));
    let (outcome, state, _) = execute(context("r1", &ms, dir.path(), "start1", runtime()));
    assert_eq!(state, RunState::ValidationFailed);
    assert!(
        matches!(
            &outcome,
            RunOutcome::ValidationError { message, .. } if message.contains("factory blew up")
        ),
        "{outcome:?}"
    );
    let results = RunResults::load(dir.path()).unwrap().unwrap();
    assert!(!results.completed);
    assert!(results.error_message.unwrap().contains("factory blew up"));
}

#[test]
fn innermost_cause_is_reported() {
    let error =
        anyhow::Error::new(ModuleError::new("inner module", "root cause")).context("outer context");
    match RunOutcome::from_error(&error) {
        RunOutcome::RuntimeError { message, stack, module } => {
            assert_eq!(message, "root cause");
            assert!(stack.contains("outer context"), "{stack}");
            assert_eq!(module.as_deref(), Some("inner module"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn working_directory_is_entered_created_and_restored() {
    let _cwd = cwd_lock();
    let before = std::env::current_dir().unwrap();
    let root = TempDir::new().unwrap();
    let dir = root.path().join("nested").join("run");
    let seen = Arc::new(Mutex::new(None));
    let ms = start_to(ModelSystemStructure::module(id(1), "cwd", "Test.CwdRecorder"));
    let runtime = runtime_recording_cwd(seen.clone());
    let (outcome, _, _) = execute(context("r1", &ms, &dir, "start1", runtime));
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(std::env::current_dir().unwrap(), before);

    let seen = seen.lock().unwrap().clone().unwrap();
    assert_eq!(seen.canonicalize().unwrap(), dir.canonicalize().unwrap());
    assert!(RunResults::load(&dir).unwrap().unwrap().completed);
}

#[test]
fn working_directory_is_restored_after_failure() {
    let _cwd = cwd_lock();
    let before = std::env::current_dir().unwrap();
    let dir = TempDir::new().unwrap();
    let ms = start_to(ModelSystemStructure::module(id(1), "panics", "Test.Panic"));
    let (outcome, _, _) = execute(context("r1", &ms, dir.path(), "start1", runtime()));
    assert!(!outcome.is_completed());
    assert_eq!(std::env::current_dir().unwrap(), before);
}

#[test]
fn context_converts_to_and_from_request() {
    let dir = TempDir::new().unwrap();
    let ctx = context("r9", &hello(), dir.path(), "start1", runtime());
    let request = ctx.to_request();
    assert_eq!(request.id, RunId::new("r9"));
    assert_eq!(request.start_path, "start1");
    let back = RunContext::from_request(request, runtime());
    assert_eq!(back.working_directory(), dir.path());
    assert_eq!(back.model_system(), ctx.model_system());
}

// ===========================================================================
// Scheduler
// ===========================================================================

#[derive(Default)]
struct Timeline {
    spans: Mutex<Vec<(String, Instant, Instant)>>,
}

/// Sleeps per run and records when each run started and ended.
struct SlowExecutor {
    timeline: Arc<Timeline>,
    delay: Duration,
}

#[async_trait]
impl RunExecutor for SlowExecutor {
    async fn execute(&self, context: RunContext, events: RunEvents) -> anyhow::Result<()> {
        let started = Instant::now();
        tokio::time::sleep(self.delay).await;
        match context.id().as_str() {
            "error" => anyhow::bail!("executor broke"),
            "panic" => panic!("executor panicked"),
            _ => {}
        }
        self.timeline
            .spans
            .lock()
            .unwrap()
            .push((context.id().to_string(), started, Instant::now()));
        let _ = events.send(OutboundCommand::FinishedRun {
            run_id: context.id().clone(),
        });
        Ok(())
    }
}

fn slow_scheduler(
    delay_ms: u64,
) -> (
    Scheduler,
    Arc<Timeline>,
    mpsc::UnboundedReceiver<OutboundCommand>,
) {
    let timeline = Arc::new(Timeline::default());
    let (tx, rx) = mpsc::unbounded_channel();
    let executor = Arc::new(SlowExecutor {
        timeline: timeline.clone(),
        delay: Duration::from_millis(delay_ms),
    });
    (Scheduler::new(executor, tx), timeline, rx)
}

fn queued(run: &str) -> RunContext {
    RunContext::new(RunId::new(run), Bytes::new(), "unused", "start1", runtime())
}

async fn terminal(
    rx: &mut mpsc::UnboundedReceiver<OutboundCommand>,
    count: usize,
) -> Vec<OutboundCommand> {
    let mut out = Vec::new();
    while out.len() < count {
        let command = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for run messages")
            .expect("event channel closed");
        if command.is_terminal() {
            out.push(command);
        }
    }
    out
}

#[tokio::test]
async fn scheduler_runs_one_at_a_time_in_order() {
    let (scheduler, timeline, mut rx) = slow_scheduler(50);
    scheduler.run(queued("r1"));
    scheduler.run(queued("r2"));
    terminal(&mut rx, 2).await;

    let spans = timeline.spans.lock().unwrap().clone();
    assert_eq!(spans.len(), 2);
    assert_eq!(spans[0].0, "r1");
    assert_eq!(spans[1].0, "r2");
    assert!(spans[1].1 >= spans[0].2, "r2 started before r1 completed");
    scheduler.shutdown().await;
}

#[tokio::test]
async fn failing_run_is_reported_and_next_run_still_executes() {
    let (scheduler, timeline, mut rx) = slow_scheduler(1);
    scheduler.run(queued("error"));
    scheduler.run(queued("panic"));
    scheduler.run(queued("ok"));
    let messages = terminal(&mut rx, 3).await;

    assert!(matches!(
        &messages[0],
        OutboundCommand::RunFailed { run_id, message, .. }
            if run_id.as_str() == "error" && message == "executor broke"
    ));
    assert!(matches!(
        &messages[1],
        OutboundCommand::RunFailed { run_id, message, .. }
            if run_id.as_str() == "panic" && message == "executor panicked"
    ));
    assert_eq!(messages[2], OutboundCommand::FinishedRun { run_id: RunId::new("ok") });
    assert_eq!(timeline.spans.lock().unwrap().len(), 1);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn cancelled_queued_run_never_starts() {
    let (scheduler, timeline, mut rx) = slow_scheduler(20);
    scheduler.run(queued("r1"));
    scheduler.run(queued("r2"));
    scheduler.run(queued("r3"));
    assert_eq!(scheduler.pending(), 3);
    assert!(scheduler.cancel(&RunId::new("r2")));
    assert!(!scheduler.cancel(&RunId::new("unknown")));
    terminal(&mut rx, 2).await;
    scheduler.shutdown().await;

    let ran: Vec<String> = timeline.spans.lock().unwrap().iter().map(|s| s.0.clone()).collect();
    assert_eq!(ran, vec!["r1", "r3"]);
    assert!(drain(&mut rx).is_empty());
}

/// Blocks each run until released.
struct GateExecutor {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl RunExecutor for GateExecutor {
    async fn execute(&self, context: RunContext, events: RunEvents) -> anyhow::Result<()> {
        self.entered.notify_one();
        self.release.notified().await;
        let _ = events.send(OutboundCommand::FinishedRun {
            run_id: context.id().clone(),
        });
        Ok(())
    }
}

#[tokio::test]
async fn current_run_and_shutdown_wait_for_active_run() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = Arc::new(Scheduler::new(
        Arc::new(GateExecutor {
            entered: entered.clone(),
            release: release.clone(),
        }),
        tx,
    ));
    assert_eq!(scheduler.current_run(), None);
    scheduler.run(queued("r1"));
    scheduler.run(queued("r2"));
    entered.notified().await;
    assert_eq!(scheduler.current_run(), Some(RunId::new("r1")));

    let stopping = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!stopping.is_finished());
    release.notify_one();
    stopping.await.unwrap();

    // r1 finished; r2 never started
    assert_eq!(drain(&mut rx), vec![OutboundCommand::FinishedRun { run_id: RunId::new("r1") }]);
    assert_eq!(scheduler.current_run(), None);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn in_process_executor_reports_status_then_finished() {
    let dir = TempDir::new().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = Scheduler::new(Arc::new(InProcessExecutor), tx);
    let _cwd = cwd_lock();
    scheduler.run(context("r1", &hello(), dir.path(), "start1", runtime()));
    terminal(&mut rx, 1).await;
    scheduler.shutdown().await;
    drop(_cwd);

    assert!(RunResults::load(dir.path()).unwrap().unwrap().completed);
}

#[tokio::test]
async fn in_process_executor_message_order() {
    let dir = TempDir::new().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _cwd = cwd_lock();
    InProcessExecutor
        .execute(context("r1", &hello(), dir.path(), "start1", runtime()), tx)
        .await
        .unwrap();
    let messages = drain(&mut rx);
    drop(_cwd);
    assert_eq!(
        messages,
        vec![
            OutboundCommand::StatusUpdate {
                run_id: RunId::new("r1"),
                message: "hi".into()
            },
            OutboundCommand::FinishedRun { run_id: RunId::new("r1") },
        ]
    );
}
