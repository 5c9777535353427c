//! Timer expiry hand-off
//!
//! Timers fire outside of the task that owns the reassembly and duplicate
//! tables, so they never touch those tables. Instead:
//!
//! 1. The link core arms a one-shot timer through [`Timers::arm()`], naming
//!    the slot it guards with a [`TimerTarget`].
//! 2. When the timer fires, the host posts an [`Expired`] into an
//!    [`ExpiryQueue`]. This is the only thing timer context does.
//! 3. The owning task drains the queue with
//!    [`LinkCore::check_timeouts()`](crate::LinkCore::check_timeouts), and
//!    ignores expiries whose timer no longer guards the slot.

use heapless::Deque;
use mutex::{BlockingMutex, ConstInit, ScopedRawMutex};

/// Identifies an armed timer. Assigned by the [`Timers`] implementation.
pub type TimerId = u16;

/// The table slot a timer guards
#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTarget {
    /// A reassembly buffer, by index
    Reassembly(usize),
    /// A duplicate tracking entry, by index
    Duplicate(usize),
}

/// A fired timer, as posted from timer context
#[cfg_attr(feature = "defmt-v1", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired {
    pub target: TimerTarget,
    /// `None` when the timer could not be armed in the first place
    pub timer: Option<TimerId>,
}

/// One-shot timer service provided by the host
pub trait Timers {
    /// Arm a timer for `duration_ms`. When it fires, the host must post
    /// `Expired { target, timer: Some(id) }` to the link core's expiry
    /// channel.
    ///
    /// Returns `None` if no timer is available.
    fn arm(&mut self, duration_ms: u32, target: TimerTarget) -> Option<TimerId>;

    /// Stop a timer. Cancelling a timer that already fired is a no-op.
    fn cancel(&mut self, id: TimerId);
}

/// Object safe access to an [`ExpiryQueue`]
pub trait ExpiryChannel {
    /// Hand an expiry to the owning task. Gives the expiry back if the
    /// channel is full.
    fn post(&self, expired: Expired) -> Result<(), Expired>;

    /// Take the oldest pending expiry
    fn take(&self) -> Option<Expired>;
}

/// A bounded single-producer single-consumer queue of expiries, safe to
/// post to from timer context
pub struct ExpiryQueue<R: ScopedRawMutex, const N: usize> {
    inner: BlockingMutex<R, Deque<Expired, N>>,
}

// ---- impl ExpiryQueue ----

impl<R: ScopedRawMutex + ConstInit, const N: usize> ExpiryQueue<R, N> {
    /// Create a new, empty queue, suitable for a `static`
    ///
    /// ```rust
    /// use mutex::raw_impls::cs::CriticalSectionRawMutex as CSRMutex;
    /// use meshlink::ExpiryQueue;
    ///
    /// static EXPIRED: ExpiryQueue<CSRMutex, 16> = ExpiryQueue::new();
    /// ```
    pub const fn new() -> Self {
        Self {
            inner: BlockingMutex::new(Deque::new()),
        }
    }
}

impl<R: ScopedRawMutex + ConstInit, const N: usize> Default for ExpiryQueue<R, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ScopedRawMutex, const N: usize> ExpiryQueue<R, N> {
    /// Create a new queue with an explicitly provided raw mutex
    pub const fn const_new(r: R) -> Self {
        Self {
            inner: BlockingMutex::const_new(r, Deque::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.with_lock(|q| q.len())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.with_lock(|q| q.is_empty())
    }
}

impl<R: ScopedRawMutex, const N: usize> ExpiryChannel for ExpiryQueue<R, N> {
    fn post(&self, expired: Expired) -> Result<(), Expired> {
        self.inner.with_lock(|q| q.push_back(expired))
    }

    fn take(&self) -> Option<Expired> {
        self.inner.with_lock(|q| q.pop_front())
    }
}

#[cfg(test)]
mod test {
    use mutex::raw_impls::cs::CriticalSectionRawMutex;

    use super::*;

    #[test]
    fn fifo_and_bounded() {
        static QUEUE: ExpiryQueue<CriticalSectionRawMutex, 2> = ExpiryQueue::new();

        let a = Expired {
            target: TimerTarget::Reassembly(0),
            timer: Some(1),
        };
        let b = Expired {
            target: TimerTarget::Duplicate(3),
            timer: None,
        };
        assert_eq!(QUEUE.post(a), Ok(()));
        assert_eq!(QUEUE.post(b), Ok(()));
        assert_eq!(QUEUE.post(a), Err(a));
        assert_eq!(QUEUE.len(), 2);

        assert_eq!(QUEUE.take(), Some(a));
        assert_eq!(QUEUE.take(), Some(b));
        assert_eq!(QUEUE.take(), None);
        assert!(QUEUE.is_empty());
    }
}
