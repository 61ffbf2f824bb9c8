//! FIFO mutex for cooperative task concurrency.
//!
//! Provides exclusive access so that only one task at a time runs a
//! critical section. Waiters are granted the lock in strict arrival
//! order, and an optional timeout bounds how long each acquisition may
//! stay queued.
//!
//! # Timed-out waiters
//!
//! A waiter that times out fails its caller but keeps its place in the
//! queue. When dispatch reaches it, its turn is consumed on the spot and
//! the lock moves straight on to the next waiter. A timeout changes what
//! the original caller observes, never the dispatch order, and a
//! timed-out waiter can never stall the queue behind it.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{Result, TimeoutError};

/// A queued request for exclusive access.
#[derive(Debug)]
struct Waiter {
    /// Identity used to address this entry from its timeout guard.
    id: u64,
    /// Completion handle: fulfilled with a release capability on grant.
    grant: oneshot::Sender<MutexGuard>,
    /// Set once by the timeout guard, never reset.
    timed_out: bool,
}

#[derive(Debug)]
struct QueueState {
    /// True iff a waiter currently holds exclusive access.
    locked: bool,
    /// Waiters in arrival order, consumed from the front only.
    queue: VecDeque<Waiter>,
    /// Monotonic counter for waiter identity.
    next_waiter_id: u64,
}

#[derive(Debug)]
struct Inner {
    /// All transitions are short synchronous critical sections; dispatch
    /// must also run from `Drop`, which cannot await, so the state word
    /// sits behind a synchronous lock.
    state: StdMutex<QueueState>,
    timeout: Option<Duration>,
}

impl Inner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // No user code ever runs under this lock, so a poisoned state is
        // still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flag a still-queued waiter as timed out. Its queue slot is kept.
    fn mark_timed_out(&self, id: u64) {
        let mut state = self.lock_state();
        if let Some(waiter) = state.queue.iter_mut().find(|waiter| waiter.id == id) {
            waiter.timed_out = true;
            tracing::debug!(waiter = id, "acquisition timed out while queued");
        }
    }

    /// Advance the queue: hand the lock to the first waiter that is
    /// still listening, or mark the mutex idle when none remain.
    ///
    /// The hand-off is direct: `locked` never reads false between a
    /// release and the grant of the next queued waiter.
    fn dispatch_next(inner: &Arc<Self>) {
        loop {
            let waiter = {
                let mut state = inner.lock_state();
                match state.queue.pop_front() {
                    Some(waiter) => waiter,
                    None => {
                        state.locked = false;
                        return;
                    }
                }
            };

            if waiter.timed_out {
                tracing::trace!(waiter = waiter.id, "consuming turn of timed-out waiter");
                continue;
            }

            match waiter.grant.send(MutexGuard::new(Arc::clone(inner))) {
                Ok(()) => return,
                // The receiver is gone: the waiter gave up between being
                // queued and being granted. Take its turn and move on.
                Err(guard) => guard.defuse(),
            }
        }
    }
}

/// An asynchronous mutex with strict FIFO hand-off.
///
/// Cheaply cloneable handle over shared state; clones refer to the same
/// lock. Construct with [`Mutex::new`] for unbounded waits or
/// [`Mutex::with_timeout`] to bound every acquisition on this instance.
///
/// ```
/// use baton::Mutex;
///
/// # async fn demo() -> baton::Result<()> {
/// let mutex = Mutex::new();
/// let guard = mutex.acquire().await?;
/// // ...critical section...
/// guard.release();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Mutex {
    inner: Arc<Inner>,
}

impl Mutex {
    /// Create a mutex whose acquisitions wait indefinitely.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a mutex whose acquisitions give up after `timeout`.
    ///
    /// A zero duration means "wait indefinitely", matching the absence
    /// of a timeout.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build((!timeout.is_zero()).then_some(timeout))
    }

    fn build(timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: StdMutex::new(QueueState {
                    locked: false,
                    queue: VecDeque::new(),
                    next_waiter_id: 0,
                }),
                timeout,
            }),
        }
    }

    /// True iff a waiter currently holds exclusive access.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.lock_state().locked
    }

    /// Number of queued waiters, including any that already gave up but
    /// whose turn has not yet been consumed.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.inner.lock_state().queue.len()
    }

    /// The configured acquisition timeout, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    /// Request exclusive access.
    ///
    /// The waiter is queued (and, on an idle mutex, granted) before
    /// this function returns, so arrival order is the order of
    /// `acquire` calls. The returned future resolves with the release
    /// capability once every earlier waiter has had its turn, or fails
    /// with [`TimeoutError`] if a timeout is configured and elapses
    /// first. It never fails on an untimed mutex.
    ///
    /// The future is detached from `self` and may be spawned. Dropping
    /// it abandons the acquisition: the slot is skipped when its turn
    /// comes, without disturbing the waiters behind it.
    ///
    /// When a timeout is configured this must be called from within a
    /// tokio runtime, since the timeout guard arms a timer at call time.
    pub fn acquire(&self) -> impl Future<Output = Result<MutexGuard>> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        let (grant, rx) = oneshot::channel();

        let (id, dispatch_now) = {
            let mut state = inner.lock_state();
            let id = state.next_waiter_id;
            state.next_waiter_id += 1;
            state.queue.push_back(Waiter {
                id,
                grant,
                timed_out: false,
            });
            let idle = !state.locked;
            if idle {
                state.locked = true;
            }
            (id, idle)
        };
        if dispatch_now {
            Inner::dispatch_next(&inner);
        }

        let deadline = inner.timeout.map(tokio::time::sleep);

        async move {
            let mut rx = rx;
            match deadline {
                // The dispatcher drops an unsent grant only for waiters
                // that already settled, so a closed channel is
                // unreachable while this future is still polled; it is
                // mapped instead of unwrapped to honor the no-panic law.
                None => (&mut rx).await.map_err(|_| TimeoutError::new()),
                Some(deadline) => {
                    tokio::pin!(deadline);
                    tokio::select! {
                        biased;
                        granted = &mut rx => granted.map_err(|_| TimeoutError::new()),
                        () = &mut deadline => {
                            inner.mark_timed_out(id);
                            // A grant racing in is released on this
                            // waiter's behalf when the receiver drops.
                            drop(rx);
                            Err(TimeoutError::new())
                        }
                    }
                }
            }
        }
    }

    /// Grant exclusive access immediately, or return `None` if the
    /// mutex is held. Never queues.
    #[must_use]
    pub fn try_acquire(&self) -> Option<MutexGuard> {
        let mut state = self.inner.lock_state();
        if state.locked {
            return None;
        }
        state.locked = true;
        drop(state);
        Some(MutexGuard::new(Arc::clone(&self.inner)))
    }

    /// Run `worker` under the lock, releasing on every exit path.
    ///
    /// The lock is released exactly once, after the worker's future
    /// settles or during unwind if it panics, and always before the
    /// outcome reaches the caller. Worker outcomes pass through untouched; a
    /// fallible worker carries its own `Result` in `T`. If acquisition
    /// times out the worker is never invoked.
    pub async fn run_exclusive<F, Fut, T>(&self, worker: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.acquire().await?;
        let value = worker().await;
        guard.release();
        Ok(value)
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

/// The release capability handed to the current holder.
///
/// Single-use by construction: [`release`](MutexGuard::release) consumes
/// the guard, and dropping it releases as well, so a double release
/// cannot be expressed. Either path advances the dispatcher exactly
/// once.
#[derive(Debug)]
#[must_use = "the lock stays held until the guard is released or dropped"]
pub struct MutexGuard {
    inner: Arc<Inner>,
    released: bool,
}

impl MutexGuard {
    fn new(inner: Arc<Inner>) -> Self {
        Self {
            inner,
            released: false,
        }
    }

    /// Relinquish exclusive access and hand the lock to the next waiter
    /// in arrival order.
    pub fn release(self) {
        drop(self);
    }

    /// Disarm a guard that never reached its waiter, so dropping it does
    /// not advance the dispatcher a second time.
    fn defuse(mut self) {
        self.released = true;
    }
}

impl Drop for MutexGuard {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            Inner::dispatch_next(&self.inner);
        }
    }
}
