//! Fragment manager.
//!
//! Hosts the executors running on this node: each fragment gets a dedicated
//! named thread, bounded by a concurrency limit. Control messages from the
//! cluster (cancel, unpause, early termination, status polls) are routed to
//! the executor by fragment handle.

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use tokio::sync::{Notify, Semaphore};

use crate::config::ExecutorConfig;
use crate::context::FragmentContext;
use crate::error::ExecError;
use crate::executor::{exit_process, FragmentExecutor};
use crate::handle::FragmentHandle;
use crate::membership::ClusterMembership;
use crate::operator::{FragmentRoot, OperatorTreeBuilder, StatusReporter};
use crate::state::FragmentStatus;

type RunningFragments = Arc<Mutex<HashMap<FragmentHandle, Arc<FragmentExecutor>>>>;

/// Runs fragment executors and routes control messages to them.
pub struct FragmentManager {
    /// Executor configuration.
    config: ExecutorConfig,

    /// Cluster membership shared with every executor.
    membership: Arc<ClusterMembership>,

    /// Executors whose run has not finished yet.
    running: RunningFragments,

    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,

    /// Signalled whenever the last running fragment finishes.
    idle: Arc<Notify>,
}

impl FragmentManager {
    /// Create a new manager.
    pub fn new(config: ExecutorConfig, membership: Arc<ClusterMembership>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_fragments));

        Self {
            config,
            membership,
            running: Arc::new(Mutex::new(HashMap::new())),
            semaphore,
            idle: Arc::new(Notify::new()),
        }
    }

    pub fn membership(&self) -> &Arc<ClusterMembership> {
        &self.membership
    }

    /// Create an executor wired to this node's membership and fatal handler.
    pub fn create_executor(
        &self,
        context: Arc<dyn FragmentContext>,
        root: FragmentRoot,
        builder: Arc<dyn OperatorTreeBuilder>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Arc<FragmentExecutor> {
        let executor = FragmentExecutor::new(
            context,
            root,
            builder,
            reporter,
            self.membership.clone(),
        )
        .with_fatal_handler(exit_process(self.config.heap_oom_exit_code));

        Arc::new(executor)
    }

    /// Start running a fragment once a slot is free.
    pub async fn start_fragment(&self, executor: Arc<FragmentExecutor>) -> Result<()> {
        // Wait for available slot
        let permit = self.semaphore.clone().acquire_owned().await?;
        let handle = executor.handle().clone();

        {
            let mut running = self.running.lock();
            if running.contains_key(&handle) {
                anyhow::bail!("Fragment {} is already running", handle);
            }
            running.insert(handle.clone(), executor.clone());
        }

        tracing::debug!(fragment = %handle, "Starting fragment thread");

        let running = self.running.clone();
        let idle = self.idle.clone();
        let thread_executor = executor.clone();
        let thread_handle = handle.clone();

        let spawned = thread::Builder::new()
            .name(handle.executor_thread_name())
            .spawn(move || {
                // Keep permit until done
                let _permit = permit;

                thread_executor.run();

                let mut running = running.lock();
                running.remove(&thread_handle);
                if running.is_empty() {
                    idle.notify_waiters();
                }
            });

        if let Err(e) = spawned {
            tracing::error!(fragment = %handle, error = %e, "Failed to spawn fragment thread");
            self.running.lock().remove(&handle);
            // Releases the context; the fragment will never run.
            executor.cancel();
            return Err(ExecError::Spawn(e).into());
        }

        Ok(())
    }

    /// Handles of fragments currently running.
    pub fn running_fragments(&self) -> Vec<FragmentHandle> {
        self.running.lock().keys().cloned().collect()
    }

    fn executor(&self, handle: &FragmentHandle) -> Option<Arc<FragmentExecutor>> {
        let executor = self.running.lock().get(handle).cloned();
        if executor.is_none() {
            tracing::warn!(fragment = %handle, "No running fragment for handle");
        }
        executor
    }

    /// Returns whether the fragment was known.
    pub fn cancel_fragment(&self, handle: &FragmentHandle) -> bool {
        match self.executor(handle) {
            Some(executor) => {
                executor.cancel();
                true
            }
            None => false,
        }
    }

    /// Returns whether the fragment was known.
    pub fn unpause_fragment(&self, handle: &FragmentHandle) -> bool {
        match self.executor(handle) {
            Some(executor) => {
                executor.unpause();
                true
            }
            None => false,
        }
    }

    /// Forward early termination from `receiver` to the `sender` fragment.
    ///
    /// May block until the sender's operator tree is built.
    pub fn receiving_fragment_finished(
        &self,
        sender: &FragmentHandle,
        receiver: &FragmentHandle,
    ) -> bool {
        match self.executor(sender) {
            Some(executor) => {
                executor.receiving_fragment_finished(receiver);
                true
            }
            None => false,
        }
    }

    pub fn fragment_status(&self, handle: &FragmentHandle) -> Option<FragmentStatus> {
        self.running.lock().get(handle).and_then(|executor| executor.status())
    }

    /// Cancel every running fragment.
    pub fn cancel_all(&self) {
        let executors: Vec<_> = self.running.lock().values().cloned().collect();
        tracing::info!(count = executors.len(), "Cancelling all fragments");

        for executor in executors {
            executor.cancel();
        }
    }

    /// Wait until no fragment is running.
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.running.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }
}
