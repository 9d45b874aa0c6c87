//! Cancels a fragment when the node that submitted its query departs.

use std::collections::HashSet;
use std::sync::Weak;

use crate::executor::FragmentExecutor;
use crate::handle::NodeEndpoint;
use crate::membership::MembershipListener;

pub(crate) struct ForemanListener {
    executor: Weak<FragmentExecutor>,
    foreman: NodeEndpoint,
}

impl ForemanListener {
    pub(crate) fn new(executor: Weak<FragmentExecutor>, foreman: NodeEndpoint) -> Self {
        Self { executor, foreman }
    }
}

impl MembershipListener for ForemanListener {
    fn nodes_departed(&self, departed: &HashSet<NodeEndpoint>) {
        if !departed.contains(&self.foreman) {
            return;
        }

        if let Some(executor) = self.executor.upgrade() {
            tracing::warn!(
                foreman = %self.foreman,
                fragment = %executor.handle(),
                "Foreman no longer active, cancelling fragment"
            );
            executor.cancel();
        }
    }
}
