//! Executor configuration.

use anyhow::Result;

use crate::handle::NodeEndpoint;

/// Fragment executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Endpoint of the node running the fragments.
    pub local_endpoint: NodeEndpoint,

    /// Maximum fragments running at once in a manager.
    pub max_concurrent_fragments: usize,

    /// Exit code used when the process runs out of heap memory.
    pub heap_oom_exit_code: i32,

    /// Run fragments under a proxy principal for the query user.
    pub impersonation_enabled: bool,
}

impl ExecutorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let address = match std::env::var("FRAGMENT_NODE_ADDRESS") {
            Ok(address) => address,
            Err(_) => local_hostname(),
        };

        let user_port = parse_env("FRAGMENT_USER_PORT")?.unwrap_or(31010);
        let control_port = parse_env("FRAGMENT_CONTROL_PORT")?.unwrap_or(31011);
        let data_port = parse_env("FRAGMENT_DATA_PORT")?.unwrap_or(31012);

        let max_concurrent: usize = parse_env("FRAGMENT_MAX_CONCURRENT")?.unwrap_or(16);
        if max_concurrent == 0 {
            anyhow::bail!("FRAGMENT_MAX_CONCURRENT must be at least 1");
        }

        let heap_oom_exit_code = parse_env("FRAGMENT_HEAP_OOM_EXIT_CODE")?.unwrap_or(-2);

        let impersonation_enabled = std::env::var("FRAGMENT_IMPERSONATION")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            local_endpoint: NodeEndpoint::new(address, user_port, control_port, data_port),
            max_concurrent_fragments: max_concurrent,
            heap_oom_exit_code,
            impersonation_enabled,
        })
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            local_endpoint: NodeEndpoint::new(local_hostname(), 31010, 31011, 31012),
            max_concurrent_fragments: 16,
            heap_oom_exit_code: -2,
            impersonation_enabled: false,
        }
    }
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e)),
        Err(_) => Ok(None),
    }
}
