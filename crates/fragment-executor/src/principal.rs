//! Principal (impersonation identity) the fragment runs under.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;

/// Identity operator code acts as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principal {
    /// The user the worker process runs as.
    ProcessUser,
    /// Proxy for the user that submitted the query.
    Proxy(String),
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessUser => write!(f, "process user"),
            Self::Proxy(user) => write!(f, "proxy({})", user),
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Principal>> = const { RefCell::new(None) };
}

/// Principal installed on the current thread, if any.
pub fn current() -> Option<Principal> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Run `f` as `principal`, restoring the previous principal afterwards.
pub fn run_as<R>(principal: Principal, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT.with(|current| current.replace(Some(principal)));
    let _restore = Restore(previous);
    f()
}

// Restores on unwind as well.
struct Restore(Option<Principal>);

impl Drop for Restore {
    fn drop(&mut self) {
        let previous = self.0.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_as_restores_previous() {
        assert_eq!(current(), None);

        let inner = run_as(Principal::Proxy("alice".to_string()), || {
            let nested = run_as(Principal::ProcessUser, current);
            assert_eq!(nested, Some(Principal::ProcessUser));
            current()
        });

        assert_eq!(inner, Some(Principal::Proxy("alice".to_string())));
        assert_eq!(current(), None);
    }

    #[test]
    fn test_run_as_restores_on_panic() {
        let result = std::panic::catch_unwind(|| {
            run_as(Principal::Proxy("bob".to_string()), || panic!("operator failed"))
        });

        assert!(result.is_err());
        assert_eq!(current(), None);
    }
}
