//! Fragment Executor
//!
//! Runs one fragment of a distributed query plan on a worker node.
//!
//! This crate provides:
//! - Lifecycle state machine with a legal-transition table
//! - Fragment executor driving the operator tree on a dedicated thread
//! - Cancellation, unpause and early-termination entry points safe from any thread
//! - Cluster membership listener cancelling fragments whose foreman departed
//! - Fragment manager hosting executors and routing control messages by handle

pub mod config;
pub mod context;
pub mod controls;
pub mod deferred;
pub mod error;
pub mod executor;
pub mod gate;
pub mod handle;
pub mod manager;
pub mod membership;
pub mod operator;
pub mod principal;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ExecutorConfig;
pub use error::{ExecError, FragmentFailure};
pub use executor::FragmentExecutor;
pub use handle::{FragmentHandle, NodeEndpoint};
pub use manager::FragmentManager;
pub use state::FragmentState;
