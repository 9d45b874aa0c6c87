//! Fragment lifecycle states and the legal-transition table.
//!
//! [`decide`] is pure: it tells the caller what to store and whether to
//! notify, but never logs or notifies itself. The executor evaluates it under
//! its state lock and performs the side effects after releasing the lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::handle::FragmentHandle;

/// Lifecycle state of a fragment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FragmentState {
    /// Constructed, operator tree not built yet.
    #[default]
    AwaitingAllocation,
    /// Operator tree built and being driven.
    Running,
    /// Sending results downstream.
    Sending,
    /// Cancellation asked for; the run loop has not wound down yet.
    CancellationRequested,
    /// Terminal: cancelled.
    Cancelled,
    /// Terminal: ran to completion.
    Finished,
    /// Terminal: failed.
    Failed,
}

impl FragmentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Finished | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingAllocation => "AWAITING_ALLOCATION",
            Self::Running => "RUNNING",
            Self::Sending => "SENDING",
            Self::CancellationRequested => "CANCELLATION_REQUESTED",
            Self::Cancelled => "CANCELLED",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for FragmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of requesting a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Store `state`. Notify the status listener right away when `notify` is
    /// set; otherwise the final report carries it.
    Accept { state: FragmentState, notify: bool },

    /// Leave the current state untouched.
    Ignore { warn: bool },

    /// The request can never be legal.
    Invalid,
}

/// Evaluate a transition request from `current` to `target`.
pub fn decide(current: FragmentState, target: FragmentState) -> Transition {
    use FragmentState::*;

    match target {
        CancellationRequested => match current {
            AwaitingAllocation | Running | Sending => Transition::Accept {
                state: CancellationRequested,
                notify: true,
            },
            _ => Transition::Ignore { warn: true },
        },

        Finished | Failed => {
            // A cancelled run that winds down normally ends as Cancelled.
            let state = if target == Finished && current == CancellationRequested {
                Cancelled
            } else {
                target
            };

            if !current.is_terminal() {
                Transition::Accept {
                    state,
                    notify: false,
                }
            } else if current == Failed {
                // fail() may be called any number of times
                Transition::Ignore { warn: false }
            } else if current == Cancelled && target == Failed {
                Transition::Accept {
                    state: Failed,
                    notify: false,
                }
            } else {
                Transition::Ignore { warn: true }
            }
        }

        Running => match current {
            AwaitingAllocation => Transition::Accept {
                state: Running,
                notify: true,
            },
            _ => Transition::Invalid,
        },

        AwaitingAllocation | Sending | Cancelled => Transition::Invalid,
    }
}

/// Point-in-time status of a running fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentStatus {
    pub handle: FragmentHandle,
    pub state: FragmentState,

    /// Operator statistics reported by the execution context.
    pub stats: serde_json::Value,

    pub captured_at: DateTime<Utc>,
}
