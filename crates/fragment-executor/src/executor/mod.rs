//! Fragment execution module.

mod foreman;
mod fragment;
mod lifecycle;


pub use fragment::{exit_process, FatalHandler, FragmentExecutor, EXECUTION_PAUSE_SITE};
