//! The raw locks.
//!
//! Each raw lock packs its entire mutable state into one atomic word
//! and parks contended threads in the global parking lot, keyed by the
//! lock's address. Four variants are provided:
//!
//! * [`RawMutex`]: a compact three-state lock, unfair, no detection.
//! * [`RawDeadlockSafeMutex`]: a holder-tracking lock whose waiters
//!   check for wait-for cycles after a park timeout.
//! * [`RawFairMutex`]: a strict FIFO hand-off lock.
//! * [`RawFairDeadlockSafeMutex`]: a FIFO hand-off lock observed by the
//!   externally driven [`detect_deadlocks`] scan.
//!
//! The lean variants implement [`lock_api::RawMutex`] and can be used
//! with any `lock_api` wrapper. The deadlock-safe variants implement
//! [`RawDeadlockSafe`] instead, because their `lock` can refuse the
//! acquisition.
//!
//! [`detect_deadlocks`]: RawFairDeadlockSafeMutex::detect_deadlocks

mod deadlock_mutex;
mod detector;
mod fair_deadlock_mutex;
mod fair_mutex;
mod mutex;

pub use deadlock_mutex::RawDeadlockSafeMutex;
pub use fair_deadlock_mutex::RawFairDeadlockSafeMutex;
pub use fair_mutex::RawFairMutex;
pub use mutex::RawMutex;

/// The outcome of a blocking `lock` call on a deadlock-safe lock.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockResult {
	/// The lock was acquired; the caller is now the holder.
	Locked,
	/// The acquisition was abandoned because it completed a wait-for
	/// cycle and this thread was chosen as the victim. The lock is
	/// untouched for the caller.
	Deadlocked,
}

impl LockResult {
	/// Returns `true` for [`LockResult::Deadlocked`].
	#[must_use]
	pub fn is_deadlocked(self) -> bool {
		self == Self::Deadlocked
	}
}

/// A raw mutex whose `lock` may refuse the acquisition instead of
/// waiting forever on a deadlock.
///
/// This is the deadlock-aware sibling of [`lock_api::RawMutex`]: same
/// shape, but `lock` returns a [`LockResult`] so the caller can unwind
/// when it is picked as a cycle victim.
///
/// # Safety
///
/// The implementation must guarantee mutual exclusion: between a
/// `lock` that returned [`LockResult::Locked`] (or a `try_lock` that
/// returned `true`) and the matching `unlock`, no other thread can
/// observe the same.
pub unsafe trait RawDeadlockSafe {
	/// Initial (unlocked) value.
	#[allow(clippy::declare_interior_mutable_const)]
	const INIT: Self;

	/// Marker type for the guards of this lock, as in
	/// [`lock_api::RawMutex::GuardMarker`].
	type GuardMarker;

	/// Acquire the lock, parking the thread while it is unavailable.
	fn lock(&self) -> LockResult;

	/// Attempt the uncontended acquire; never blocks.
	fn try_lock(&self) -> bool;

	/// Whether the lock is currently held by any thread. Advisory: the
	/// answer may be stale by the time the caller looks at it.
	fn is_locked(&self) -> bool;

	/// Release the lock.
	///
	/// # Safety
	///
	/// The calling thread must be the current holder.
	unsafe fn unlock(&self);
}
