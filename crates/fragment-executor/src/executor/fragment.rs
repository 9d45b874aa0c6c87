//! Fragment executor.
//!
//! Runs a single fragment on this node. [`FragmentExecutor::run`] is invoked
//! once, on a dedicated thread, and drives the operator tree to completion.
//! Every other entry point (`cancel`, `unpause`, `receiving_fragment_finished`,
//! `status`, membership events) may be called from other threads at any point
//! of the executor's life, including before `run` starts and after it ends.

use chrono::Utc;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::any::Any;
use std::fmt;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};

use crate::context::FragmentContext;
use crate::error::{ExecError, FragmentFailure, OutOfMemory};
use crate::executor::foreman::ForemanListener;
use crate::executor::lifecycle::{Lifecycle, LifecycleSink};
use crate::gate::EventGate;
use crate::handle::FragmentHandle;
use crate::membership::{ClusterMembership, ListenerId};
use crate::operator::{FragmentRoot, OperatorTreeBuilder, RootExec, StatusReporter};
use crate::principal;
use crate::state::{FragmentState, FragmentStatus};

/// Called when the process runs out of heap memory.
pub type FatalHandler = Arc<dyn Fn(&OutOfMemory) + Send + Sync>;

/// Fatal handler that flushes diagnostics and exits with `code`.
pub fn exit_process(code: i32) -> FatalHandler {
    Arc::new(move |oom: &OutOfMemory| {
        tracing::error!(error = %oom, "Node ran out of heap memory, exiting");
        let mut stderr = std::io::stderr();
        let _ = writeln!(stderr, "Node ran out of heap memory, exiting.");
        let _ = writeln!(stderr, "{}", oom);
        let _ = stderr.flush();
        std::process::exit(code);
    })
}

/// Pause site reached right before the run loop starts.
pub const EXECUTION_PAUSE_SITE: &str = "fragment-execution";

/// Runs one fragment and reports its terminal status exactly once.
pub struct FragmentExecutor {
    lifecycle: Arc<Lifecycle>,
    context: Arc<dyn FragmentContext>,
    fragment_root: FragmentRoot,
    builder: Arc<dyn OperatorTreeBuilder>,
    membership: Arc<ClusterMembership>,

    /// Operator tree; present between build and close.
    root: RwLock<Option<Arc<dyn RootExec>>>,

    /// Serializes building the tree against cancellation.
    setup: ReentrantMutex<()>,

    /// Opened once the tree is built or will never be.
    accept_external_events: EventGate,

    /// Held for the whole close; later callers wait for it to finish.
    resources_closed: Mutex<bool>,
    started: AtomicBool,

    /// Thread running the loop; only used to wake it on cancellation.
    worker: Mutex<Option<Thread>>,

    fatal_handler: FatalHandler,
}

impl FragmentExecutor {
    /// Create an executor in AwaitingAllocation and install its failure sink
    /// on the context.
    pub fn new(
        context: Arc<dyn FragmentContext>,
        fragment_root: FragmentRoot,
        builder: Arc<dyn OperatorTreeBuilder>,
        reporter: Arc<dyn StatusReporter>,
        membership: Arc<ClusterMembership>,
    ) -> Self {
        let lifecycle = Arc::new(Lifecycle::new(context.handle().clone(), reporter));
        context.set_executor_state(Arc::new(LifecycleSink::new(lifecycle.clone())));

        Self {
            lifecycle,
            context,
            fragment_root,
            builder,
            membership,
            root: RwLock::new(None),
            setup: ReentrantMutex::new(()),
            accept_external_events: EventGate::new(),
            resources_closed: Mutex::new(false),
            started: AtomicBool::new(false),
            worker: Mutex::new(None),
            fatal_handler: exit_process(-2),
        }
    }

    /// Replace the handler invoked on heap exhaustion.
    pub fn with_fatal_handler(mut self, handler: FatalHandler) -> Self {
        self.fatal_handler = handler;
        self
    }

    pub fn handle(&self) -> &FragmentHandle {
        self.context.handle()
    }

    pub fn context(&self) -> &Arc<dyn FragmentContext> {
        &self.context
    }

    pub fn state(&self) -> FragmentState {
        self.lifecycle.state()
    }

    /// Current status while Running; `None` otherwise, since a tree still
    /// being built has no consistent statistics.
    pub fn status(&self) -> Option<FragmentStatus> {
        if self.lifecycle.state() != FragmentState::Running {
            return None;
        }

        Some(FragmentStatus {
            handle: self.handle().clone(),
            state: FragmentState::Running,
            stats: self.context.operator_stats(),
            captured_at: Utc::now(),
        })
    }

    /// Cancel the fragment. Safe from any thread, any number of times.
    ///
    /// Before the tree is built there is nothing to wait for: resources are
    /// released right here, since `run` may never be called. Otherwise wait
    /// for the gate, request cancellation and wake the executor thread; the
    /// run loop performs the actual shutdown.
    pub fn cancel(&self) {
        let _setup = self.setup.lock();

        let built = self.root.read().is_some();
        if built {
            self.accept_external_events.wait();
        } else {
            self.close_out_resources();
        }

        if let Err(e) = self.lifecycle.update_state(FragmentState::CancellationRequested) {
            tracing::error!(fragment = %self.handle(), error = %e, "Cancellation rejected");
        }

        if let Some(worker) = self.worker.lock().as_ref() {
            worker.unpark();
        }
    }

    /// Resume every pause in the context. Idempotent.
    pub fn unpause(&self) {
        self.context.execution_controls().unpause_all();
    }

    /// A downstream fragment needs no more records from this one.
    ///
    /// Blocks until the tree is built or known never to be.
    pub fn receiving_fragment_finished(&self, receiver: &FragmentHandle) {
        self.accept_external_events.wait();

        let root = self.root.read().clone();
        match root {
            Some(root) => {
                tracing::info!(
                    sender = %self.handle().fragment_id(),
                    receiver = %receiver.fragment_id(),
                    "Applying request for early sender termination"
                );
                root.receiving_fragment_finished(receiver);
            }
            None => {
                tracing::warn!(
                    sender = %self.handle().fragment_id(),
                    receiver = %receiver.fragment_id(),
                    "Dropping request for early fragment termination, no root exec exists"
                );
            }
        }
    }

    /// Build and drive the operator tree, then close resources and send the
    /// final status. Runs at most once.
    pub fn run(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!(fragment = %self.handle(), "Fragment executor already ran");
            return;
        }

        *self.worker.lock() = Some(thread::current());
        let span = tracing::info_span!("fragment", id = %self.handle().query_identifier());
        let _entered = span.enter();

        let mut listener = None;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute(&mut listener)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.handle_failure(e),
            Err(payload) => self.lifecycle.fail(ExecError::Panicked(panic_message(&*payload)).into()),
        }

        // Waiters must never be stranded, whatever happened above.
        self.accept_external_events.open();
        self.close_out_resources();

        if let Some(id) = listener {
            self.membership.remove_listener(id);
        }

        self.send_final_state();
        *self.worker.lock() = None;
    }

    fn execute(self: &Arc<Self>, listener: &mut Option<ListenerId>) -> anyhow::Result<()> {
        {
            let _setup = self.setup.lock();

            // cancel() may already have run
            if self.lifecycle.should_continue() {
                let root = self.builder.build(&self.context, &self.fragment_root)?;
                *self.root.write() = Some(root);

                let foreman = ForemanListener::new(
                    Arc::downgrade(self),
                    self.context.foreman_endpoint().clone(),
                );
                *listener = Some(self.membership.add_listener(Arc::new(foreman)));

                self.lifecycle.update_state(FragmentState::Running)?;
                self.accept_external_events.open();

                let handle = self.handle();
                let endpoint = self.context.endpoint();
                tracing::debug!(
                    major = handle.major_fragment_id,
                    minor = handle.minor_fragment_id,
                    address = %endpoint.address,
                    port = endpoint.user_port,
                    "Starting fragment"
                );
            }
        }

        principal::run_as(self.context.principal(), || -> anyhow::Result<()> {
            self.context.execution_controls().pause_point(EXECUTION_PAUSE_SITE);

            let root = self.root.read().clone();
            if let Some(root) = root {
                while self.lifecycle.should_continue() && root.next()? {}
            }
            Ok(())
        })?;

        self.lifecycle.update_state(FragmentState::Finished)?;
        Ok(())
    }

    fn handle_failure(&self, error: anyhow::Error) {
        match error.downcast::<OutOfMemory>() {
            Ok(oom) if oom.kind.is_recoverable() => {
                self.lifecycle.fail(ExecError::Memory(oom).into());
            }
            Ok(oom) => {
                (self.fatal_handler)(&oom);
                // Only reached when the handler does not exit.
                self.lifecycle.fail(ExecError::Memory(oom).into());
            }
            Err(error) => self.lifecycle.fail(error),
        }
    }

    /// Close the operator tree, then the context. Runs once, from whichever
    /// path gets here first; any other caller returns only after that close
    /// has completed.
    fn close_out_resources(&self) {
        let mut closed = self.resources_closed.lock();
        if *closed {
            return;
        }
        *closed = true;

        let root = self.root.write().take();
        if let Some(root) = root {
            match panic::catch_unwind(AssertUnwindSafe(|| root.close())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.lifecycle.fail(e.context("Failed to close operator tree")),
                Err(payload) => {
                    self.lifecycle.fail(ExecError::Panicked(panic_message(&*payload)).into())
                }
            }
        }

        self.context.close();
    }

    /// Only the executor thread sends the final state, and only once.
    fn send_final_state(&self) {
        let handle = self.handle();
        let outcome = self.lifecycle.state();

        if outcome == FragmentState::Failed {
            let failures = &self.lifecycle.failures;
            if failures.is_empty() {
                failures.append(anyhow::anyhow!("Fragment failed without a recorded cause"));
            }
            if let Some(causes) = failures.drain() {
                let failure = FragmentFailure::new(causes, self.context.endpoint().clone(), handle);
                tracing::error!(
                    fragment = %handle,
                    error_id = %failure.error_id,
                    error = %failure.causes,
                    "Fragment failed"
                );
                self.lifecycle.reporter.fail(handle, failure);
            }
        } else {
            tracing::info!(fragment = %handle, state = %outcome, "Fragment completed");
            self.lifecycle.reporter.state_changed(handle, outcome);
        }
    }
}

impl fmt::Display for FragmentExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FragmentExecutor [fragment={}, state={}]",
            self.handle(),
            self.state()
        )
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
