//! Contracts of the collaborators the executor drives.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::context::FragmentContext;
use crate::error::FragmentFailure;
use crate::handle::FragmentHandle;
use crate::state::FragmentState;

/// Physical plan of a fragment, as shipped by the foreman.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentRoot {
    /// Root operator type (e.g. "screen", "single-sender").
    pub operator: String,

    /// Operator-specific plan.
    #[serde(default)]
    pub plan: serde_json::Value,
}

/// Executable operator tree.
///
/// `next` and `close` are driven by the executor thread. `close` and
/// `receiving_fragment_finished` may also arrive from other threads and
/// must be safe to call concurrently with `next`.
pub trait RootExec: Send + Sync {
    /// Advance the tree. `Ok(false)` means the input is exhausted.
    ///
    /// Implementations that block should park the calling thread and
    /// re-check `ExecutorState::should_continue` on wake-up; cancellation
    /// unparks the executor thread. This is the only call site required to
    /// observe cancellation.
    fn next(&self) -> anyhow::Result<bool>;

    fn close(&self) -> anyhow::Result<()>;

    /// A downstream receiver needs no more records from this fragment.
    fn receiving_fragment_finished(&self, receiver: &FragmentHandle);
}

/// Builds an operator tree from a fragment plan.
pub trait OperatorTreeBuilder: Send + Sync {
    fn build(
        &self,
        context: &Arc<dyn FragmentContext>,
        root: &FragmentRoot,
    ) -> anyhow::Result<Arc<dyn RootExec>>;
}

/// Receives fragment status updates.
pub trait StatusReporter: Send + Sync {
    fn state_changed(&self, handle: &FragmentHandle, state: FragmentState);

    fn fail(&self, handle: &FragmentHandle, failure: FragmentFailure);
}
