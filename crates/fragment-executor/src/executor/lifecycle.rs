//! Shared lifecycle state of one fragment.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::context::ExecutorState;
use crate::deferred::{Cause, DeferredFailures};
use crate::error::ExecError;
use crate::handle::FragmentHandle;
use crate::operator::StatusReporter;
use crate::state::{decide, FragmentState, Transition};

/// State, failures and reporter shared between the executor and the
/// failure sink handed to the context.
pub(crate) struct Lifecycle {
    handle: FragmentHandle,
    state: Mutex<FragmentState>,
    pub(crate) failures: DeferredFailures,
    pub(crate) reporter: Arc<dyn StatusReporter>,
}

impl Lifecycle {
    pub(crate) fn new(handle: FragmentHandle, reporter: Arc<dyn StatusReporter>) -> Self {
        Self {
            handle,
            state: Mutex::new(FragmentState::AwaitingAllocation),
            failures: DeferredFailures::new(),
            reporter,
        }
    }

    pub(crate) fn state(&self) -> FragmentState {
        *self.state.lock()
    }

    pub(crate) fn should_continue(&self) -> bool {
        let state = self.state();
        !state.is_terminal() && state != FragmentState::CancellationRequested
    }

    /// Request a transition. Returns whether the state changed.
    ///
    /// The decision is taken under the state lock; logging and listener
    /// notification happen after it is released.
    pub(crate) fn update_state(&self, target: FragmentState) -> Result<bool, ExecError> {
        let (current, transition) = {
            let mut state = self.state.lock();
            let current = *state;
            let transition = decide(current, target);
            if let Transition::Accept { state: next, .. } = transition {
                *state = next;
            }
            (current, transition)
        };

        tracing::info!(
            fragment = %self.handle,
            from = %current,
            to = %target,
            "State change requested"
        );

        match transition {
            Transition::Accept { state, notify } => {
                if notify {
                    self.reporter.state_changed(&self.handle, state);
                }
                Ok(true)
            }
            Transition::Ignore { warn } => {
                if warn {
                    tracing::warn!(
                        fragment = %self.handle,
                        from = %current,
                        to = %target,
                        "Ignoring unexpected state transition"
                    );
                }
                Ok(false)
            }
            Transition::Invalid => Err(ExecError::InvalidTransition {
                from: current,
                to: target,
            }),
        }
    }

    /// Record a failure and move to Failed. Does not report; only the
    /// executor thread sends the final status.
    pub(crate) fn fail(&self, cause: anyhow::Error) {
        tracing::debug!(fragment = %self.handle, error = %cause, "Recording fragment failure");
        self.failures.append(cause);

        if let Err(e) = self.update_state(FragmentState::Failed) {
            tracing::error!(fragment = %self.handle, error = %e, "Failed to record failure state");
        }
    }
}

/// Failure sink installed on the execution context.
pub(crate) struct LifecycleSink {
    lifecycle: Arc<Lifecycle>,
}

impl LifecycleSink {
    pub(crate) fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self { lifecycle }
    }
}

impl ExecutorState for LifecycleSink {
    fn should_continue(&self) -> bool {
        self.lifecycle.should_continue()
    }

    fn fail(&self, cause: anyhow::Error) {
        self.lifecycle.fail(cause);
    }

    fn is_failed(&self) -> bool {
        self.lifecycle.state() == FragmentState::Failed
    }

    fn failure_cause(&self) -> Option<Cause> {
        self.lifecycle.failures.primary()
    }
}
