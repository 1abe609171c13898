//! Named seam between a guarded task and whatever ultimately runs it.
//!
//! [`crate::guard::schedule_guarded`] takes a `Runtime: TaskRuntime<Fut>`
//! instead of a bare closure so tests can bind a recording double against
//! it, rather than asserting only on side effects of an opaque function.

use std::future::Future;

/// Accepts the future for one task invocation and hands it off to
/// whatever runs tasks: a distributed queue, a thread pool, or, for the
/// ambient default, nothing at all.
pub trait TaskRuntime<Fut: Future>: Send + Sync {
    type Output;

    fn submit(&self, fut: Fut) -> Self::Output;
}

/// Runs the task inline: returns the future unchanged. Stands in for "no
/// dedicated task-queue wired up yet".
#[derive(Debug, Default, Clone, Copy)]
pub struct AmbientRuntime;

impl<Fut: Future> TaskRuntime<Fut> for AmbientRuntime {
    type Output = Fut;

    fn submit(&self, fut: Fut) -> Fut {
        fut
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts `submit` calls, then runs the future inline. Used to assert
    /// a guarded task actually reached the runtime seam, without a real
    /// task-queue to dispatch to.
    #[derive(Clone, Default)]
    pub struct CountingRuntime {
        pub calls: Arc<AtomicUsize>,
    }

    impl<Fut: Future> TaskRuntime<Fut> for CountingRuntime {
        type Output = Fut;

        fn submit(&self, fut: Fut) -> Fut {
            self.calls.fetch_add(1, Ordering::SeqCst);
            fut
        }
    }
}
