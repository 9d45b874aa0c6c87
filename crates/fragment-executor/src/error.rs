//! Fragment execution error types.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::deferred::CompositeCause;
use crate::handle::{FragmentHandle, NodeEndpoint};
use crate::state::FragmentState;

/// Which memory pool was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Native (direct) buffer memory.
    DirectBuffer,
    /// Managed buffer allocator limit.
    Allocator,
    /// General process heap. Not recoverable.
    Heap,
}

impl MemoryKind {
    pub fn is_recoverable(self) -> bool {
        !matches!(self, Self::Heap)
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectBuffer => write!(f, "direct buffer"),
            Self::Allocator => write!(f, "allocator"),
            Self::Heap => write!(f, "heap"),
        }
    }
}

/// Resource exhaustion raised by operators.
#[derive(Debug, Clone, Error)]
#[error("Out of {kind} memory: {message}")]
pub struct OutOfMemory {
    pub kind: MemoryKind,
    pub message: String,
}

impl OutOfMemory {
    pub fn direct_buffer(message: impl Into<String>) -> Self {
        Self {
            kind: MemoryKind::DirectBuffer,
            message: message.into(),
        }
    }

    pub fn allocator(message: impl Into<String>) -> Self {
        Self {
            kind: MemoryKind::Allocator,
            message: message.into(),
        }
    }

    pub fn heap(message: impl Into<String>) -> Self {
        Self {
            kind: MemoryKind::Heap,
            message: message.into(),
        }
    }
}

/// Errors raised by the executor itself.
#[derive(Debug, Error)]
pub enum ExecError {
    /// A transition that can never be legal was requested.
    #[error("Invalid state transition {from} => {to}.")]
    InvalidTransition {
        from: FragmentState,
        to: FragmentState,
    },

    /// Recoverable memory exhaustion.
    #[error("One or more nodes ran out of memory while executing the query.")]
    Memory(#[source] OutOfMemory),

    /// The operator tree panicked (assertion failure).
    #[error("Fragment execution panicked: {0}")]
    Panicked(String),

    /// The fragment thread could not be started.
    #[error("Failed to spawn fragment thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Classification of the terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    System,
    Memory,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "SYSTEM ERROR"),
            Self::Memory => write!(f, "RESOURCE ERROR"),
        }
    }
}

/// Terminal failure reported once per fragment.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {causes}\n\nFragment {fragment}\n\n[Error Id: {error_id} on {identity}]")]
pub struct FragmentFailure {
    pub error_id: Uuid,
    pub kind: ErrorKind,

    /// Node that ran the fragment.
    pub identity: NodeEndpoint,

    /// `<major>:<minor>`
    pub fragment: String,

    pub causes: CompositeCause,
}

impl FragmentFailure {
    pub fn new(causes: CompositeCause, identity: NodeEndpoint, handle: &FragmentHandle) -> Self {
        let kind = match causes.primary().downcast_ref::<ExecError>() {
            Some(ExecError::Memory(_)) => ErrorKind::Memory,
            _ => ErrorKind::System,
        };

        Self {
            error_id: Uuid::new_v4(),
            kind,
            identity,
            fragment: handle.fragment_id(),
            causes,
        }
    }
}
