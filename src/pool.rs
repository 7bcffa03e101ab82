//! Lock-free object pools
//!
//! A [`Pool`] hands out values wrapped in a [`Pooled`] guard. The guard derefs
//! to the value and puts it back into the pool when dropped, so a request is
//! returned on every exit path, early `?` returns included.
//!
//! # Examples
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> h1_relay::Result<()> {
//! use h1_relay::{pool, PeekReader};
//!
//! let mut src = PeekReader::new(&b"GET / HTTP/1.1\r\nHost: a.com\r\n\r\n"[..]);
//!
//! let mut req = pool::requests().acquire();
//! if req.read(&mut src).await? {
//!     assert_eq!(req.method(), Some("GET"));
//! }
//! // `req` goes back to the pool here
//! # Ok(())
//! # }
//! ```

use crate::{limits::PoolLimits, Request};
use crossbeam::queue::ArrayQueue;
use std::{
    fmt,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    sync::OnceLock,
};
use tracing::trace;

/// A value that can be cleared for reuse.
pub trait Recycle {
    /// Drops per-use state, keeping allocations.
    fn recycle(&mut self);
}

/// Bounded pool of reusable values.
///
/// `acquire` never blocks: on an empty pool a fresh value is built. `release`
/// never blocks either: a value returned to a full pool is dropped.
pub struct Pool<T> {
    idle: ArrayQueue<T>,
    make: fn() -> T,
}

impl<T: Recycle> Pool<T> {
    /// Creates an empty pool retaining at most `capacity` idle values.
    pub fn new(capacity: usize, make: fn() -> T) -> Self {
        Self {
            idle: ArrayQueue::new(capacity.max(1)),
            make,
        }
    }

    /// Takes an idle value, or builds one if none is left.
    #[inline]
    pub fn acquire(&self) -> Pooled<'_, T> {
        let value = self.idle.pop().unwrap_or_else(|| {
            trace!("pool miss");
            (self.make)()
        });

        Pooled {
            pool: self,
            value: ManuallyDrop::new(value),
        }
    }

    /// Recycles `value` and keeps it for a later [`acquire`](Self::acquire).
    pub fn release(&self, mut value: T) {
        value.recycle();
        if self.idle.push(value).is_err() {
            trace!(capacity = self.idle.capacity(), "pool full, value dropped");
        }
    }

    /// Number of idle values.
    #[inline]
    pub fn idle(&self) -> usize {
        self.idle.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.idle.capacity()
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("idle", &self.idle.len())
            .field("capacity", &self.idle.capacity())
            .finish()
    }
}

/// A value checked out of a [`Pool`]; returns itself when dropped.
pub struct Pooled<'a, T: Recycle> {
    pool: &'a Pool<T>,
    value: ManuallyDrop<T>,
}

impl<T: Recycle> Pooled<'_, T> {
    /// Takes the value out of the guard; it will not return to the pool.
    pub fn detach(self) -> T {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so `value` is taken exactly once.
        unsafe { ManuallyDrop::take(&mut this.value) }
    }
}

impl<T: Recycle> Deref for Pooled<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Recycle> DerefMut for Pooled<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Recycle> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        // SAFETY: `value` is not touched again after `drop`.
        let value = unsafe { ManuallyDrop::take(&mut self.value) };
        self.pool.release(value);
    }
}

impl<T: Recycle + fmt::Debug> fmt::Debug for Pooled<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.value, f)
    }
}

//

static REQUESTS: OnceLock<Pool<Request>> = OnceLock::new();

/// Sizes the process-wide request pool.
///
/// Returns `false` if the pool already exists, either from an earlier `init`
/// or because [`requests`] was called first.
pub fn init(limits: PoolLimits) -> bool {
    let mut fresh = false;
    REQUESTS.get_or_init(|| {
        fresh = true;
        Pool::new(limits.requests, Request::new)
    });
    fresh
}

/// The process-wide request pool, created with [`PoolLimits::default`] on
/// first use.
#[inline]
pub fn requests() -> &'static Pool<Request> {
    REQUESTS.get_or_init(|| Pool::new(PoolLimits::default().requests, Request::new))
}
