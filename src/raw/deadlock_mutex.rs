use std::collections::HashMap;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use lock_api::GuardNoSend;
use parking_lot::Mutex;
use parking_lot_core::{ParkResult, SpinWait, DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};

use super::{LockResult, RawDeadlockSafe};
use crate::thread_id::{self, MAX_THREADS};

// Bit 31 flags contention; the low bits hold the holder's thread id.
// UNLOCKED keeps the flag clear so a parked thread's validate cannot
// hold on a word that was just released.
const CONTENDED: u32 = 1 << 31;
const UNLOCKED: u32 = !CONTENDED;

/// How long a waiter sleeps before it suspects a deadlock and walks
/// the wait-for graph itself.
const DEADLOCK_DETECT_TIMEOUT: Duration = Duration::from_secs(1);

fn holder_of(word: u32) -> u32 {
	word & !CONTENDED
}

fn is_locked_word(word: u32) -> bool {
	holder_of(word) != UNLOCKED
}

fn is_contended_word(word: u32) -> bool {
	word & CONTENDED != 0
}

#[allow(clippy::declare_interior_mutable_const)]
const NO_WAIT: AtomicPtr<RawDeadlockSafeMutex> = AtomicPtr::new(ptr::null_mut());

// Which mutex each thread is currently blocked on, indexed by thread
// id. A slot is written only by its owning thread; the deadlock walk
// reads all of them.
static THREAD_WAITING_ON: [AtomicPtr<RawDeadlockSafeMutex>; MAX_THREADS] =
	[NO_WAIT; MAX_THREADS];

// Serializes deadlock confirmations so two members of the same cycle
// cannot both declare themselves the victim.
static DEADLOCK_VERIFY_MUTEX: Mutex<()> = Mutex::new(());

/// An unfair mutex that refuses to wait forever.
///
/// The lock word records the holding thread. A contended waiter parks
/// with a one-second timeout; on expiry it walks the global
/// wait-announcement table, and if its wait closes a cycle, its `lock`
/// call gives up and returns [`LockResult::Deadlocked`] instead of the
/// lock.
pub struct RawDeadlockSafeMutex {
	word: AtomicU32,
}

impl RawDeadlockSafeMutex {
	/// Creates the mutex in the unlocked state.
	#[must_use]
	pub const fn new() -> Self {
		Self {
			word: AtomicU32::new(UNLOCKED),
		}
	}

	fn key(&self) -> usize {
		self as *const Self as usize
	}

	fn is_contended(&self) -> bool {
		is_contended_word(self.word.load(Ordering::Acquire))
	}

	fn announce_wait(&self) {
		let slot = &THREAD_WAITING_ON[thread_id::current() as usize];
		slot.store(self as *const Self as *mut Self, Ordering::Release);
	}

	fn denounce_wait(&self) {
		let slot = &THREAD_WAITING_ON[thread_id::current() as usize];
		slot.store(ptr::null_mut(), Ordering::Release);
	}

	/// Decides between retrying the fast path and parking, marking the
	/// word contended (holder preserved) on the way to the slow path.
	fn uncontended_path_available(&self) -> bool {
		loop {
			let word = self.word.load(Ordering::Acquire);

			if !is_locked_word(word) {
				return true;
			}

			if is_contended_word(word)
				|| self
					.word
					.compare_exchange(word, word | CONTENDED, Ordering::AcqRel, Ordering::Relaxed)
					.is_ok()
			{
				return false;
			}

			std::hint::spin_loop();
		}
	}

	fn try_lock_contended(&self) -> bool {
		// Other threads may still be parked, so the contended hint
		// stays set and our unlock will wake one of them.
		self.word
			.compare_exchange(
				UNLOCKED,
				thread_id::current() | CONTENDED,
				Ordering::Acquire,
				Ordering::Relaxed,
			)
			.is_ok()
	}

	/// Parks until the word stops being contended or the detection
	/// timeout fires. Returns `true` when this thread confirmed a
	/// deadlock and must abandon the acquisition.
	fn park_and_check(&self) -> bool {
		self.announce_wait();

		// safety: the key is this mutex's address, and the validate
		//         closure only reads our own atomic.
		let res = unsafe {
			parking_lot_core::park(
				self.key(),
				|| self.is_contended(),
				|| {},
				|_, _| {},
				DEFAULT_PARK_TOKEN,
				Some(Instant::now() + DEADLOCK_DETECT_TIMEOUT),
			)
		};

		if res == ParkResult::TimedOut && self.check_deadlock() {
			// check_deadlock already withdrew our announcement.
			return true;
		}

		self.denounce_wait();
		false
	}

	/// Two-phase inline detection, run by the waiter itself.
	///
	/// The search walks holder ids and announcement slots from this
	/// thread's own wait. The walk races against locks being released
	/// and waits being withdrawn, so a discovered cycle is then
	/// re-checked under the global verify mutex; only a cycle whose
	/// every `(thread, lock)` edge is still announced counts. On
	/// confirmation this thread withdraws its own announcement, which
	/// breaks the cycle for every other member's verification.
	fn check_deadlock(&self) -> bool {
		let mut waiters: HashMap<u32, *const Self> = HashMap::new();

		let mut waiting_on: *const Self = self;
		waiters.insert(thread_id::current(), waiting_on);

		let cycle_found = loop {
			// safety: a mutex stays in an announcement slot only while
			//         the announcing thread is blocked inside `lock` on
			//         it, which keeps the referent borrowed and alive.
			let word = unsafe { (*waiting_on).word.load(Ordering::Acquire) };
			let holder = holder_of(word);

			// Lock was just released; no deadlock.
			if holder == UNLOCKED {
				break false;
			}

			let next = THREAD_WAITING_ON[holder as usize].load(Ordering::Acquire);

			// The holder is running, not waiting; no deadlock.
			if next.is_null() {
				break false;
			}

			// The holder is already on our path: the walk closed.
			if waiters.contains_key(&holder) {
				break true;
			}

			waiters.insert(holder, next);
			waiting_on = next;
		};

		if !cycle_found {
			return false;
		}

		let _verify = DEADLOCK_VERIFY_MUTEX.lock();

		for (&tid, &lock) in &waiters {
			if THREAD_WAITING_ON[tid as usize].load(Ordering::Acquire) != lock as *mut Self {
				return false;
			}
		}

		// Signal "this thread is handling it" to concurrent checks.
		self.denounce_wait();
		log::warn!(
			"thread {} deadlocked on mutex {:p}; abandoning the acquisition",
			thread_id::current(),
			self,
		);

		true
	}

	#[cold]
	fn lock_contended(&self) -> LockResult {
		while !self.try_lock_contended() {
			if self.park_and_check() {
				return LockResult::Deadlocked;
			}
		}

		LockResult::Locked
	}
}

impl Default for RawDeadlockSafeMutex {
	fn default() -> Self {
		Self::new()
	}
}

unsafe impl RawDeadlockSafe for RawDeadlockSafeMutex {
	#[allow(clippy::declare_interior_mutable_const)]
	const INIT: Self = Self::new();

	type GuardMarker = GuardNoSend;

	fn lock(&self) -> LockResult {
		let mut spin = SpinWait::new();

		while !self.try_lock() {
			if !self.uncontended_path_available() {
				return self.lock_contended();
			}

			spin.spin_no_yield();
		}

		LockResult::Locked
	}

	fn try_lock(&self) -> bool {
		self.word
			.compare_exchange(
				UNLOCKED,
				thread_id::current(),
				Ordering::Acquire,
				Ordering::Relaxed,
			)
			.is_ok()
	}

	fn is_locked(&self) -> bool {
		is_locked_word(self.word.load(Ordering::Relaxed))
	}

	unsafe fn unlock(&self) {
		let old = self.word.swap(UNLOCKED, Ordering::Release);
		debug_assert_eq!(
			holder_of(old),
			thread_id::current(),
			"unlock by a non-holder"
		);

		if is_contended_word(old) {
			// safety: the key is this mutex's address.
			unsafe {
				parking_lot_core::unpark_one(self.key(), |_| DEFAULT_UNPARK_TOKEN);
			}
		}
	}
}

impl Drop for RawDeadlockSafeMutex {
	fn drop(&mut self) {
		debug_assert!(!self.is_locked(), "mutex dropped while locked");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn word_encoding_keeps_holder_and_flag_apart() {
		assert!(!is_locked_word(UNLOCKED));
		assert!(!is_contended_word(UNLOCKED));

		let held = 17;
		assert!(is_locked_word(held));
		assert!(!is_contended_word(held));
		assert_eq!(holder_of(held), 17);

		let contended = held | CONTENDED;
		assert!(is_locked_word(contended));
		assert!(is_contended_word(contended));
		assert_eq!(holder_of(contended), 17);
	}

	#[test]
	fn try_lock_records_the_holder() {
		let lock = RawDeadlockSafeMutex::new();

		assert!(lock.try_lock());
		assert_eq!(
			holder_of(lock.word.load(Ordering::Relaxed)),
			thread_id::current()
		);
		assert!(!lock.try_lock());

		unsafe { lock.unlock() };
		assert!(!lock.is_locked());
	}

	#[test]
	fn lock_uncontended_returns_locked() {
		let lock = RawDeadlockSafeMutex::new();

		assert_eq!(lock.lock(), LockResult::Locked);
		unsafe { lock.unlock() };
	}
}
