//! Deferred destruction queue
//!
//! The registry runs destroy callbacks on whichever thread releases the
//! last strong handle. Payloads that must be torn down on a particular
//! thread (GPU objects on the render thread, for instance) use a destroy
//! callback that only enqueues the teardown here; the owning thread then
//! calls [`DeferredQueue::drain`] once per frame.
//!
//! # Example
//!
//! ```ignore
//! let queue = DeferredQueue::new();
//! let handle = registry.register(buffer, queue.destroy_with(|buffer| buffer.destroy()))?;
//!
//! // Render thread, once per frame
//! queue.drain();
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

type Job = Box<dyn FnOnce() + Send>;

/// Thread-safe queue of teardown work.
///
/// Work pushed while a drain is in progress runs on the next drain.
pub struct DeferredQueue {
    pending: Mutex<Vec<Job>>,
}

impl DeferredQueue {
    /// Default initial capacity of the queue.
    const DEFAULT_CAPACITY: usize = 64;

    /// Create a new shared queue
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(Vec::with_capacity(Self::DEFAULT_CAPACITY)),
        })
    }

    /// Queue a piece of work for the next drain
    pub fn defer(&self, job: impl FnOnce() + Send + 'static) {
        self.pending.lock().push(Box::new(job));
    }

    /// Build a destroy callback that queues `teardown` instead of running it.
    pub fn destroy_with<T, F>(self: &Arc<Self>, teardown: F) -> impl FnOnce(T) + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        let queue = Arc::clone(self);
        move |payload| queue.defer(move || teardown(payload))
    }

    /// Run every queued job on the calling thread.
    ///
    /// Returns the number of jobs run.
    pub fn drain(&self) -> usize {
        let jobs = std::mem::take(&mut *self.pending.lock());
        let count = jobs.len();
        for job in jobs {
            job();
        }

        if count > 0 {
            log::trace!("Ran {count} deferred teardown jobs");
        }
        count
    }

    /// Number of jobs waiting for the next drain
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

impl fmt::Debug for DeferredQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredQueue")
            .field("pending", &self.pending())
            .finish()
    }
}
