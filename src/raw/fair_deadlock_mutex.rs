use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::time::Instant;

use lock_api::GuardNoSend;
use once_cell::sync::Lazy;
use parking_lot_core::{ParkResult, SpinWait};

use super::detector::DeadlockDetector;
use super::fair_mutex::{AtomicLockWord, LockWord, WaitNode};
use super::{LockResult, RawDeadlockSafe};
use crate::thread_id::{self, MAX_THREADS};

// Wait-start timestamps are nanoseconds from a process-wide epoch, so
// they fit in an atomic and compare with plain integer ordering.
static CLOCK_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

fn now_nanos() -> u64 {
	CLOCK_EPOCH.elapsed().as_nanos() as u64
}

/// One thread's wait announcement, isolated on its own cache line so
/// announcing threads do not false-share with their neighbors.
#[repr(align(128))]
pub(super) struct ThreadWaitInfo {
	waiting_on: AtomicPtr<RawFairDeadlockSafeMutex>,
	wait_start: AtomicU64,
	wait_token: AtomicU64,
}

impl ThreadWaitInfo {
	const fn new() -> Self {
		Self {
			waiting_on: AtomicPtr::new(ptr::null_mut()),
			wait_start: AtomicU64::new(0),
			wait_token: AtomicU64::new(0),
		}
	}

	/// Publishes this thread's wait and returns the token naming this
	/// particular wait episode. The token is bumped before the pointer
	/// is published, so any observer of the pointer also observes the
	/// episode's own token.
	fn announce_wait(&self, lock: &RawFairDeadlockSafeMutex) -> u64 {
		self.wait_start.store(now_nanos(), Ordering::Relaxed);
		let token = self.wait_token.fetch_add(1, Ordering::Relaxed) + 1;
		self.waiting_on
			.store(lock as *const _ as *mut _, Ordering::Release);
		token
	}

	fn denounce_wait(&self) {
		self.waiting_on.store(ptr::null_mut(), Ordering::Release);
	}

	pub(super) fn announced_lock(&self) -> *mut RawFairDeadlockSafeMutex {
		self.waiting_on.load(Ordering::Acquire)
	}

	pub(super) fn current_wait_token(&self) -> u64 {
		self.wait_token.load(Ordering::Relaxed)
	}

	pub(super) fn wait_start_nanos(&self) -> u64 {
		self.wait_start.load(Ordering::Relaxed)
	}
}

#[allow(clippy::declare_interior_mutable_const)]
const IDLE: ThreadWaitInfo = ThreadWaitInfo::new();

pub(super) static WAIT_INFO: [ThreadWaitInfo; MAX_THREADS] = [IDLE; MAX_THREADS];

enum ParkOutcome {
	/// Registration was abandoned or validation failed; retry the
	/// fast path.
	Retry,
	/// The lock was handed to us.
	Locked,
	/// The detector picked us as a cycle victim.
	Deadlocked,
}

/// A first-in, first-out mutex observed by the global deadlock scan.
///
/// Acquire and release follow the same hand-off protocol as
/// [`RawFairMutex`](super::RawFairMutex); in addition every blocked
/// thread announces which lock it is waiting on, and
/// [`detect_deadlocks`](Self::detect_deadlocks), driven by whatever
/// thread the embedding program chooses, resolves wait-for cycles by
/// waking one victim per cycle with [`LockResult::Deadlocked`].
pub struct RawFairDeadlockSafeMutex {
	word: AtomicLockWord,
}

impl RawFairDeadlockSafeMutex {
	/// Creates the mutex unlocked, with no waiters.
	#[must_use]
	pub const fn new() -> Self {
		Self {
			word: AtomicLockWord::new(),
		}
	}

	pub(super) fn key(&self) -> usize {
		self as *const Self as usize
	}

	pub(super) fn load_word(&self) -> LockWord {
		self.word.load()
	}

	/// Runs detection passes until one finds nothing to resolve, and
	/// returns how many deadlocks were broken.
	///
	/// Each resolved deadlock means exactly one victim thread whose
	/// pending `lock` returns [`LockResult::Deadlocked`]. The scan
	/// never blocks the calling thread on any of the scanned locks.
	pub fn detect_deadlocks() -> usize {
		let mut detector = DeadlockDetector::new();
		let mut resolved = 0;

		while detector.run() {
			resolved += 1;
		}

		log::debug!("deadlock scan complete: {resolved} cycle(s) resolved");

		resolved
	}

	fn park(&self) -> ParkOutcome {
		if !self.word.increment_num_waiters() {
			return ParkOutcome::Retry;
		}

		let wait_info = &WAIT_INFO[thread_id::current() as usize];
		let wait_token = wait_info.announce_wait(self);
		let node = WaitNode::new(thread_id::current(), wait_token);

		// safety: the key is this mutex's address and the node outlives
		//         the park call.
		let res = unsafe {
			parking_lot_core::park(
				self.key(),
				|| !self.word.is_locked_by_me() && !node.is_deadlocked.load(Ordering::Acquire),
				|| {},
				|_, _| {},
				node.token(),
				None,
			)
		};

		wait_info.denounce_wait();

		if node.is_deadlocked.load(Ordering::Acquire) {
			// The detector woke us without transferring the lock, so
			// our registration is still counted.
			self.word.decrement_num_waiters();
			return ParkOutcome::Deadlocked;
		}

		match res {
			ParkResult::Unparked(_) => ParkOutcome::Locked,
			ParkResult::Invalid => {
				self.word.decrement_num_waiters();
				ParkOutcome::Retry
			}
			ParkResult::TimedOut => unreachable!("parked without a timeout"),
		}
	}
}

impl Default for RawFairDeadlockSafeMutex {
	fn default() -> Self {
		Self::new()
	}
}

unsafe impl RawDeadlockSafe for RawFairDeadlockSafeMutex {
	#[allow(clippy::declare_interior_mutable_const)]
	const INIT: Self = Self::new();

	type GuardMarker = GuardNoSend;

	fn lock(&self) -> LockResult {
		let mut spin = SpinWait::new();

		loop {
			if self.try_lock() {
				return LockResult::Locked;
			}

			spin.spin_no_yield();

			match self.park() {
				ParkOutcome::Retry => {}
				ParkOutcome::Locked => {
					debug_assert!(self.word.is_locked_by_me());
					return LockResult::Locked;
				}
				ParkOutcome::Deadlocked => {
					debug_assert!(!self.word.is_locked_by_me());
					return LockResult::Deadlocked;
				}
			}
		}
	}

	fn try_lock(&self) -> bool {
		self.word.try_lock()
	}

	fn is_locked(&self) -> bool {
		self.word.load().is_locked()
	}

	unsafe fn unlock(&self) {
		// safety: forwarded contract; the caller holds the lock.
		unsafe { self.word.unlock(self.key()) }
	}
}

impl Drop for RawFairDeadlockSafeMutex {
	fn drop(&mut self) {
		let word = self.word.load();
		debug_assert!(!word.is_locked(), "fair mutex dropped while locked");
		debug_assert!(!word.has_waiters(), "fair mutex dropped with waiters");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn announce_tokens_increase_per_episode() {
		let lock = RawFairDeadlockSafeMutex::new();
		let info = ThreadWaitInfo::new();

		let first = info.announce_wait(&lock);
		info.denounce_wait();
		let second = info.announce_wait(&lock);
		info.denounce_wait();

		assert!(second > first);
		assert!(info.announced_lock().is_null());
	}

	#[test]
	fn announce_publishes_the_lock() {
		let lock = RawFairDeadlockSafeMutex::new();
		let info = ThreadWaitInfo::new();

		info.announce_wait(&lock);
		assert_eq!(info.announced_lock(), &lock as *const _ as *mut _);
		info.denounce_wait();
	}

	#[test]
	fn uncontended_lock_and_unlock() {
		let lock = RawFairDeadlockSafeMutex::new();

		assert_eq!(lock.lock(), LockResult::Locked);
		assert!(lock.is_locked());
		unsafe { lock.unlock() };
		assert!(!lock.is_locked());
	}

	#[test]
	fn scan_of_idle_threads_resolves_nothing() {
		assert_eq!(RawFairDeadlockSafeMutex::detect_deadlocks(), 0);
	}
}
