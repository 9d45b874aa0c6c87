//! Fragment execution context.
//!
//! The context carries identity, location and pause controls for one fragment
//! and is exclusively owned by its executor for the duration of a run. In
//! return the executor hands it a narrow [`ExecutorState`] capability so that
//! operators can check for cancellation and report failures without seeing
//! the executor itself.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::ExecutorConfig;
use crate::controls::ExecutionControls;
use crate::deferred::Cause;
use crate::handle::{FragmentHandle, NodeEndpoint};
use crate::principal::Principal;

/// Failure sink and continuation check given to operators.
pub trait ExecutorState: Send + Sync {
    /// Whether execution may continue (not terminal, no cancellation requested).
    fn should_continue(&self) -> bool;

    /// Record a failure. The fragment moves to Failed; the status is reported
    /// later by the executor thread.
    fn fail(&self, cause: anyhow::Error);

    fn is_failed(&self) -> bool;

    /// First failure recorded so far.
    fn failure_cause(&self) -> Option<Cause>;
}

/// Execution context consumed by the executor.
pub trait FragmentContext: Send + Sync {
    fn handle(&self) -> &FragmentHandle;

    /// Node running the fragment.
    fn endpoint(&self) -> &NodeEndpoint;

    /// Node that submitted the query.
    fn foreman_endpoint(&self) -> &NodeEndpoint;

    fn query_user(&self) -> &str;

    fn impersonation_enabled(&self) -> bool;

    fn execution_controls(&self) -> &ExecutionControls;

    /// Install the executor's failure sink.
    fn set_executor_state(&self, state: Arc<dyn ExecutorState>);

    /// Snapshot of operator statistics.
    fn operator_stats(&self) -> serde_json::Value;

    /// Release the context's resources.
    fn close(&self);

    /// Principal the operator tree runs as.
    fn principal(&self) -> Principal {
        if self.impersonation_enabled() {
            Principal::Proxy(self.query_user().to_string())
        } else {
            Principal::ProcessUser
        }
    }
}

/// Context for fragments running on this node.
pub struct LocalFragmentContext {
    handle: FragmentHandle,
    endpoint: NodeEndpoint,
    foreman: NodeEndpoint,
    query_user: String,
    impersonation_enabled: bool,
    controls: ExecutionControls,
    executor_state: RwLock<Option<Arc<dyn ExecutorState>>>,
    stats: Mutex<serde_json::Map<String, serde_json::Value>>,
    closed: AtomicBool,
}

impl LocalFragmentContext {
    pub fn new(
        handle: FragmentHandle,
        config: &ExecutorConfig,
        foreman: NodeEndpoint,
        query_user: impl Into<String>,
    ) -> Self {
        Self {
            handle,
            endpoint: config.local_endpoint.clone(),
            foreman,
            query_user: query_user.into(),
            impersonation_enabled: config.impersonation_enabled,
            controls: ExecutionControls::new(),
            executor_state: RwLock::new(None),
            stats: Mutex::new(serde_json::Map::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Failure sink installed by the executor.
    pub fn executor_state(&self) -> Option<Arc<dyn ExecutorState>> {
        self.executor_state.read().clone()
    }

    /// Record an operator statistic.
    pub fn record_stat(&self, key: impl Into<String>, value: serde_json::Value) {
        self.stats.lock().insert(key.into(), value);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl FragmentContext for LocalFragmentContext {
    fn handle(&self) -> &FragmentHandle {
        &self.handle
    }

    fn endpoint(&self) -> &NodeEndpoint {
        &self.endpoint
    }

    fn foreman_endpoint(&self) -> &NodeEndpoint {
        &self.foreman
    }

    fn query_user(&self) -> &str {
        &self.query_user
    }

    fn impersonation_enabled(&self) -> bool {
        self.impersonation_enabled
    }

    fn execution_controls(&self) -> &ExecutionControls {
        &self.controls
    }

    fn set_executor_state(&self, state: Arc<dyn ExecutorState>) {
        *self.executor_state.write() = Some(state);
    }

    fn operator_stats(&self) -> serde_json::Value {
        serde_json::Value::Object(self.stats.lock().clone())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            tracing::warn!(fragment = %self.handle, "Fragment context already closed");
            return;
        }

        // Releasing the sink breaks the context -> executor association.
        self.executor_state.write().take();
        self.controls.unpause_all();
        tracing::debug!(fragment = %self.handle, "Fragment context closed");
    }
}
