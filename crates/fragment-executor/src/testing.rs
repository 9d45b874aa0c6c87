//! Fakes shared by the executor and manager tests.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::context::{ExecutorState, FragmentContext, LocalFragmentContext};
use crate::controls::ExecutionControls;
use crate::error::{FragmentFailure, OutOfMemory};
use crate::handle::{FragmentHandle, NodeEndpoint};
use crate::operator::{FragmentRoot, OperatorTreeBuilder, RootExec, StatusReporter};
use crate::state::FragmentState;

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fragment_executor=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub(crate) fn foreman() -> NodeEndpoint {
    NodeEndpoint::new("foreman", 31010, 31011, 31012)
}

pub(crate) fn local_config() -> ExecutorConfig {
    ExecutorConfig {
        local_endpoint: NodeEndpoint::new("worker-1", 31010, 31011, 31012),
        ..ExecutorConfig::default()
    }
}

pub(crate) fn fragment_root() -> FragmentRoot {
    FragmentRoot {
        operator: "screen".to_string(),
        plan: serde_json::Value::Null,
    }
}

/// Ordered record of events from several fakes.
pub(crate) type EventLog = Arc<Mutex<Vec<String>>>;

/// Something the reporter received.
#[derive(Debug)]
pub(crate) enum Report {
    State(FragmentState),
    Failed(FragmentFailure),
}

#[derive(Default)]
pub(crate) struct RecordingReporter {
    reports: Mutex<Vec<Report>>,
    log: Option<EventLog>,
}

impl RecordingReporter {
    pub(crate) fn logging(log: EventLog) -> Self {
        Self {
            log: Some(log),
            ..Self::default()
        }
    }

    fn log(&self, event: String) {
        if let Some(log) = &self.log {
            log.lock().push(event);
        }
    }

    pub(crate) fn states(&self) -> Vec<FragmentState> {
        self.reports
            .lock()
            .iter()
            .filter_map(|report| match report {
                Report::State(state) => Some(*state),
                Report::Failed(_) => None,
            })
            .collect()
    }

    pub(crate) fn failures(&self) -> Vec<FragmentFailure> {
        self.reports
            .lock()
            .iter()
            .filter_map(|report| match report {
                Report::Failed(failure) => Some(failure.clone()),
                Report::State(_) => None,
            })
            .collect()
    }

    /// Terminal states plus failures.
    pub(crate) fn final_reports(&self) -> usize {
        self.reports
            .lock()
            .iter()
            .filter(|report| match report {
                Report::State(state) => state.is_terminal(),
                Report::Failed(_) => true,
            })
            .count()
    }
}

impl StatusReporter for RecordingReporter {
    fn state_changed(&self, _handle: &FragmentHandle, state: FragmentState) {
        self.log(format!("report-{}", state));
        self.reports.lock().push(Report::State(state));
    }

    fn fail(&self, _handle: &FragmentHandle, failure: FragmentFailure) {
        self.log("report-failed".to_string());
        self.reports.lock().push(Report::Failed(failure));
    }
}

/// Local context that counts close calls.
pub(crate) struct CountingContext {
    inner: LocalFragmentContext,
    closes: AtomicUsize,
    close_delay: Duration,
    log: Option<EventLog>,
}

impl CountingContext {
    pub(crate) fn new() -> Self {
        Self::with_config(&local_config())
    }

    pub(crate) fn with_config(config: &ExecutorConfig) -> Self {
        Self {
            inner: LocalFragmentContext::new(
                FragmentHandle::new(Uuid::new_v4(), 1, 0),
                config,
                foreman(),
                "alice",
            ),
            closes: AtomicUsize::new(0),
            close_delay: Duration::ZERO,
            log: None,
        }
    }

    /// Context whose close takes `delay` and is bracketed in `log`.
    pub(crate) fn slow_close(log: EventLog, delay: Duration) -> Self {
        Self {
            close_delay: delay,
            log: Some(log),
            ..Self::new()
        }
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn executor_state(&self) -> Option<Arc<dyn ExecutorState>> {
        self.inner.executor_state()
    }

    pub(crate) fn record_stat(&self, key: &str, value: serde_json::Value) {
        self.inner.record_stat(key, value);
    }
}

impl FragmentContext for CountingContext {
    fn handle(&self) -> &FragmentHandle {
        self.inner.handle()
    }

    fn endpoint(&self) -> &NodeEndpoint {
        self.inner.endpoint()
    }

    fn foreman_endpoint(&self) -> &NodeEndpoint {
        self.inner.foreman_endpoint()
    }

    fn query_user(&self) -> &str {
        self.inner.query_user()
    }

    fn impersonation_enabled(&self) -> bool {
        self.inner.impersonation_enabled()
    }

    fn execution_controls(&self) -> &ExecutionControls {
        self.inner.execution_controls()
    }

    fn set_executor_state(&self, state: Arc<dyn ExecutorState>) {
        self.inner.set_executor_state(state);
    }

    fn operator_stats(&self) -> serde_json::Value {
        self.inner.operator_stats()
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().push("context-close-start".to_string());
        }
        thread::sleep(self.close_delay);
        self.inner.close();
        if let Some(log) = &self.log {
            log.lock().push("context-close-end".to_string());
        }
    }
}

/// One scripted call to `next`.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Advance,
    Error(String),
    OutOfMemory(OutOfMemory),
    Panic(String),
    /// Park until cancellation is requested.
    Block,
}

/// Operator tree that replays a script, then reports exhaustion.
#[derive(Default)]
pub(crate) struct ScriptedRoot {
    steps: Mutex<VecDeque<Step>>,
    close_error: Option<String>,
    sink: Mutex<Option<Arc<dyn ExecutorState>>>,
    advances: AtomicUsize,
    closes: AtomicUsize,
    blocked: AtomicUsize,
    finished_receivers: Mutex<Vec<FragmentHandle>>,
}

impl ScriptedRoot {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            ..Self::default()
        }
    }

    pub(crate) fn failing_close(steps: Vec<Step>, message: &str) -> Self {
        Self {
            close_error: Some(message.to_string()),
            ..Self::new(steps)
        }
    }

    pub(crate) fn advances(&self) -> usize {
        self.advances.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn finished_receivers(&self) -> Vec<FragmentHandle> {
        self.finished_receivers.lock().clone()
    }

    /// Wait until a `Block` step is parked.
    pub(crate) fn wait_until_blocked(&self) {
        while self.blocked.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn should_continue(&self) -> bool {
        self.sink
            .lock()
            .as_ref()
            .map(|sink| sink.should_continue())
            .unwrap_or(true)
    }
}

impl RootExec for ScriptedRoot {
    fn next(&self) -> anyhow::Result<bool> {
        let step = self.steps.lock().pop_front();
        let Some(step) = step else {
            return Ok(false);
        };

        match step {
            Step::Advance => {
                self.advances.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            Step::Error(message) => Err(anyhow::anyhow!(message)),
            Step::OutOfMemory(oom) => Err(oom.into()),
            Step::Panic(message) => panic!("{}", message),
            Step::Block => {
                self.blocked.fetch_add(1, Ordering::SeqCst);
                while self.should_continue() {
                    thread::park_timeout(Duration::from_secs(5));
                }
                Ok(true)
            }
        }
    }

    fn close(&self) -> anyhow::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        match &self.close_error {
            Some(message) => Err(anyhow::anyhow!(message.clone())),
            None => Ok(()),
        }
    }

    fn receiving_fragment_finished(&self, receiver: &FragmentHandle) {
        self.finished_receivers.lock().push(receiver.clone());
    }
}

/// Builder handing out a prepared tree, or failing.
pub(crate) struct ScriptedBuilder {
    root: Arc<ScriptedRoot>,
    context: Arc<CountingContext>,
    error: Option<String>,
    sink_failure: Option<String>,
    builds: AtomicUsize,
}

impl ScriptedBuilder {
    pub(crate) fn new(root: Arc<ScriptedRoot>, context: Arc<CountingContext>) -> Self {
        Self {
            root,
            context,
            error: None,
            sink_failure: None,
            builds: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(root: Arc<ScriptedRoot>, context: Arc<CountingContext>, message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::new(root, context)
        }
    }

    /// Reports `message` through the context's failure sink, then hands out
    /// the tree as if the build succeeded.
    pub(crate) fn failing_through_sink(
        root: Arc<ScriptedRoot>,
        context: Arc<CountingContext>,
        message: &str,
    ) -> Self {
        Self {
            sink_failure: Some(message.to_string()),
            ..Self::new(root, context)
        }
    }

    pub(crate) fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl OperatorTreeBuilder for ScriptedBuilder {
    fn build(
        &self,
        _context: &Arc<dyn FragmentContext>,
        _root: &FragmentRoot,
    ) -> anyhow::Result<Arc<dyn RootExec>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.error {
            anyhow::bail!("{}", message);
        }

        let sink = self.context.executor_state();
        if let (Some(sink), Some(message)) = (&sink, &self.sink_failure) {
            sink.fail(anyhow::anyhow!(message.clone()));
        }

        *self.root.sink.lock() = sink;
        Ok(self.root.clone())
    }
}
