//! User-space mutexes with optional runtime deadlock detection.
//!
//! This crate provides two mutex shapes, each in a lean and a
//! deadlock-safe mode:
//!
//! * [`Mutex`]: a compact unfair lock. The uncontended path is a
//!   single compare-and-swap; contended threads park in the global
//!   parking lot.
//! * [`FairMutex`]: a strictly FIFO lock. Release hands ownership
//!   directly to the longest-waiting thread, so no acquirer can barge
//!   past a waiter and no waiter starves.
//! * [`DeadlockSafeMutex`]: the unfair lock plus detection; a waiter
//!   that sleeps for a second wakes up, walks the wait-for graph, and
//!   if its own wait closes a cycle its `lock` returns a
//!   [`DeadlockError`] instead of the lock.
//! * [`FairDeadlockSafeMutex`]: the FIFO lock plus detection, driven
//!   externally: some thread of the embedding program calls
//!   [`detect_deadlocks`] periodically, and each discovered cycle is
//!   broken by waking exactly one victim.
//!
//! A [`DeadlockError`] means the victim did *not* acquire the mutex.
//! The expected reaction is to drop the locks already held and retry
//! from a safe point, turning a hang into a recoverable error.
//!
//! The lean raw locks implement [`lock_api::RawMutex`], so they also
//! compose with any `lock_api`-based wrapper.
//!
//! # Examples
//!
//! ```
//! use std::{sync::Arc, thread};
//!
//! use vigilock::FairDeadlockSafeMutex;
//!
//! let account_a = Arc::new(FairDeadlockSafeMutex::new(100));
//! let account_b = Arc::new(FairDeadlockSafeMutex::new(50));
//!
//! let (a, b) = (Arc::clone(&account_a), Arc::clone(&account_b));
//! let transfer = thread::spawn(move || {
//!     let mut from = a.lock().unwrap();
//!     let mut to = b.lock().unwrap();
//!     *from -= 10;
//!     *to += 10;
//! });
//!
//! transfer.join().unwrap();
//! assert_eq!(*account_a.lock().unwrap(), 90);
//! assert_eq!(*account_b.lock().unwrap(), 60);
//! ```

#![warn(missing_docs)]

mod mutex;
pub mod raw;
pub mod thread_id;

pub use mutex::{DeadlockError, DetectingMutex, DetectingMutexGuard};
pub use raw::LockResult;

/// A lean unfair mutex protecting data, backed by [`raw::RawMutex`].
pub type Mutex<T> = lock_api::Mutex<raw::RawMutex, T>;

/// An RAII guard for [`Mutex`].
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, raw::RawMutex, T>;

/// A lean FIFO mutex protecting data, backed by [`raw::RawFairMutex`].
pub type FairMutex<T> = lock_api::Mutex<raw::RawFairMutex, T>;

/// An RAII guard for [`FairMutex`].
pub type FairMutexGuard<'a, T> = lock_api::MutexGuard<'a, raw::RawFairMutex, T>;

/// An unfair mutex protecting data, whose waiters detect deadlock
/// cycles themselves after a park timeout. Backed by
/// [`raw::RawDeadlockSafeMutex`].
pub type DeadlockSafeMutex<T> = DetectingMutex<raw::RawDeadlockSafeMutex, T>;

/// An RAII guard for [`DeadlockSafeMutex`].
pub type DeadlockSafeMutexGuard<'a, T> =
	DetectingMutexGuard<'a, raw::RawDeadlockSafeMutex, T>;

/// A FIFO mutex protecting data, observed by the externally driven
/// [`detect_deadlocks`] scan. Backed by
/// [`raw::RawFairDeadlockSafeMutex`].
pub type FairDeadlockSafeMutex<T> = DetectingMutex<raw::RawFairDeadlockSafeMutex, T>;

/// An RAII guard for [`FairDeadlockSafeMutex`].
pub type FairDeadlockSafeMutexGuard<'a, T> =
	DetectingMutexGuard<'a, raw::RawFairDeadlockSafeMutex, T>;

/// Runs deadlock detection passes over every [`FairDeadlockSafeMutex`]
/// in the process until one pass finds nothing to resolve, and returns
/// how many deadlocks were broken.
///
/// Each resolved deadlock wakes exactly one victim, whose pending
/// `lock` returns [`DeadlockError`]. No timer is built in: call this
/// from a thread of your choosing, at a cadence of your choosing.
///
/// # Examples
///
/// ```
/// assert_eq!(vigilock::detect_deadlocks(), 0);
/// ```
pub fn detect_deadlocks() -> usize {
	raw::RawFairDeadlockSafeMutex::detect_deadlocks()
}
