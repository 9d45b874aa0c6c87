//! Fragment and node identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one fragment instance of a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FragmentHandle {
    /// Query the fragment belongs to.
    pub query_id: Uuid,

    /// Major fragment (plan subdivision) id.
    pub major_fragment_id: u32,

    /// Minor fragment (parallel instance) id.
    pub minor_fragment_id: u32,
}

impl FragmentHandle {
    pub fn new(query_id: Uuid, major_fragment_id: u32, minor_fragment_id: u32) -> Self {
        Self {
            query_id,
            major_fragment_id,
            minor_fragment_id,
        }
    }

    /// `<major>:<minor>`
    pub fn fragment_id(&self) -> String {
        format!("{}:{}", self.major_fragment_id, self.minor_fragment_id)
    }

    /// `<query-id>:<major>:<minor>`
    pub fn query_identifier(&self) -> String {
        format!("{}:{}", self.query_id, self.fragment_id())
    }

    /// Name given to the thread running this fragment.
    pub fn executor_thread_name(&self) -> String {
        format!(
            "{}:frag:{}:{}",
            self.query_id, self.major_fragment_id, self.minor_fragment_id
        )
    }
}

impl fmt::Display for FragmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query_identifier())
    }
}

/// Network location of a cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeEndpoint {
    pub address: String,
    pub user_port: u16,
    pub control_port: u16,
    pub data_port: u16,
}

impl NodeEndpoint {
    pub fn new(address: impl Into<String>, user_port: u16, control_port: u16, data_port: u16) -> Self {
        Self {
            address: address.into(),
            user_port,
            control_port,
            data_port,
        }
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.user_port)
    }
}
