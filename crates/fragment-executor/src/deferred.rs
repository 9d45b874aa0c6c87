//! Deferred failure collection.
//!
//! Failures can be reported from any thread while the fragment runs. They are
//! kept in arrival order and drained once into a [`CompositeCause`] when the
//! final status is sent.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Shared failure cause.
pub type Cause = Arc<anyhow::Error>;

/// Thread-safe, order-preserving collector of failure causes.
#[derive(Debug, Default)]
pub struct DeferredFailures {
    causes: Mutex<Vec<Cause>>,
}

impl DeferredFailures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, cause: anyhow::Error) {
        self.causes.lock().push(Arc::new(cause));
    }

    /// The first recorded cause, without draining.
    pub fn primary(&self) -> Option<Cause> {
        self.causes.lock().first().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.causes.lock().is_empty()
    }

    /// Take every recorded cause as one composite. `None` when nothing was
    /// recorded or the causes were already drained.
    pub fn drain(&self) -> Option<CompositeCause> {
        let causes = std::mem::take(&mut *self.causes.lock());
        let mut causes = causes.into_iter();
        let primary = causes.next()?;

        Some(CompositeCause {
            primary,
            suppressed: causes.collect(),
        })
    }
}

/// All causes recorded for a fragment; the first one is primary.
#[derive(Debug, Clone)]
pub struct CompositeCause {
    primary: Cause,
    suppressed: Vec<Cause>,
}

impl CompositeCause {
    pub fn primary(&self) -> &anyhow::Error {
        &self.primary
    }

    pub fn suppressed(&self) -> &[Cause] {
        &self.suppressed
    }

    /// Every cause in arrival order.
    pub fn causes(&self) -> impl Iterator<Item = &anyhow::Error> {
        std::iter::once(&*self.primary).chain(self.suppressed.iter().map(|c| &**c))
    }

    pub fn count(&self) -> usize {
        1 + self.suppressed.len()
    }
}

impl fmt::Display for CompositeCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.primary)?;
        for cause in &self.suppressed {
            write!(f, "\n  suppressed: {:#}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompositeCause {}
