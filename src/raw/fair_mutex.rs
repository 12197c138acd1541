use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use lock_api::GuardNoSend;
use parking_lot_core::{FilterOp, ParkResult, ParkToken, SpinWait, DEFAULT_UNPARK_TOKEN};

use crate::thread_id::{self, INVALID_THREAD_ID};

/// Snapshot of a fair lock's packed state: the holding thread and the
/// number of threads parked (or committed to parking) on it. Both
/// fields travel in one 64-bit atomic so every transition is a single
/// compare-and-swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct LockWord {
	pub(super) holder: u32,
	pub(super) num_waiters: u32,
}

impl LockWord {
	pub(super) const UNLOCKED: Self = Self {
		holder: INVALID_THREAD_ID,
		num_waiters: 0,
	};

	const fn pack(self) -> u64 {
		((self.num_waiters as u64) << 32) | self.holder as u64
	}

	fn unpack(bits: u64) -> Self {
		Self {
			holder: bits as u32,
			num_waiters: (bits >> 32) as u32,
		}
	}

	pub(super) fn is_locked(self) -> bool {
		self.holder != INVALID_THREAD_ID
	}

	pub(super) fn is_held_by(self, tid: u32) -> bool {
		self.holder == tid
	}

	pub(super) fn has_waiters(self) -> bool {
		self.num_waiters != 0
	}

	fn transfer_to(self, tid: u32) -> Self {
		debug_assert!(self.num_waiters > 0);
		Self {
			holder: tid,
			num_waiters: self.num_waiters - 1,
		}
	}

	fn add_waiter(self) -> Self {
		Self {
			holder: self.holder,
			num_waiters: self.num_waiters + 1,
		}
	}

	fn remove_waiter(self) -> Self {
		debug_assert!(self.num_waiters > 0);
		Self {
			holder: self.holder,
			num_waiters: self.num_waiters - 1,
		}
	}
}

/// Per-wait payload stored in the parking lot. The node lives on the
/// waiting thread's stack for the duration of the park, and its
/// address travels as the park token, so unpark filters can read it
/// while they hold the lot's bucket lock.
pub(super) struct WaitNode {
	pub(super) tid: u32,
	pub(super) wait_token: u64,
	pub(super) is_deadlocked: AtomicBool,
}

impl WaitNode {
	pub(super) fn new(tid: u32, wait_token: u64) -> Self {
		Self {
			tid,
			wait_token,
			is_deadlocked: AtomicBool::new(false),
		}
	}

	pub(super) fn token(&self) -> ParkToken {
		ParkToken(self as *const Self as usize)
	}

	/// Recovers the node a parked thread registered with.
	///
	/// # Safety
	///
	/// The token must have been observed by an unpark filter while the
	/// owning thread is still in the lot's queue; the filter runs under
	/// the bucket lock, which pins the waiter inside `park` and its
	/// node on its stack.
	pub(super) unsafe fn from_token<'a>(token: ParkToken) -> &'a Self {
		unsafe { &*(token.0 as *const Self) }
	}
}

/// The packed word plus the transitions both fair variants share.
/// Every CAS is acquire-release so the holder and the waiter count are
/// always observed consistently together.
pub(super) struct AtomicLockWord {
	bits: AtomicU64,
}

impl AtomicLockWord {
	pub(super) const fn new() -> Self {
		Self {
			bits: AtomicU64::new(LockWord::UNLOCKED.pack()),
		}
	}

	pub(super) fn load(&self) -> LockWord {
		LockWord::unpack(self.bits.load(Ordering::Acquire))
	}

	fn compare_exchange(&self, old: LockWord, new: LockWord) -> bool {
		self.bits
			.compare_exchange(old.pack(), new.pack(), Ordering::AcqRel, Ordering::Relaxed)
			.is_ok()
	}

	pub(super) fn try_lock(&self) -> bool {
		let locked = LockWord {
			holder: thread_id::current(),
			num_waiters: 0,
		};
		self.compare_exchange(LockWord::UNLOCKED, locked)
	}

	pub(super) fn is_locked_by_me(&self) -> bool {
		self.load().is_held_by(thread_id::current())
	}

	/// Registers the calling thread as a waiter. Fails (without
	/// registering) when the lock becomes unlocked, in which case the
	/// caller should retry the fast path instead of parking.
	pub(super) fn increment_num_waiters(&self) -> bool {
		loop {
			let old = self.load();

			if !old.is_locked() {
				return false;
			}

			if self.compare_exchange(old, old.add_waiter()) {
				return true;
			}

			std::hint::spin_loop();
		}
	}

	pub(super) fn decrement_num_waiters(&self) {
		loop {
			let old = self.load();

			if self.compare_exchange(old, old.remove_waiter()) {
				return;
			}

			std::hint::spin_loop();
		}
	}

	fn transfer_lock(&self, tid: u32) {
		loop {
			let old = self.load();

			if self.compare_exchange(old, old.transfer_to(tid)) {
				return;
			}

			std::hint::spin_loop();
		}
	}

	/// Hand-off release shared by both fair variants. `key` is the
	/// owning mutex's parking-lot key.
	///
	/// The filter stamps the first queued waiter as the new holder
	/// *before* that waiter is woken, so no thread can barge in
	/// between: the fast path keeps seeing a held lock until the new
	/// holder unlocks in turn. A waiter may have bumped the count
	/// without having reached the lot yet; in that transient state the
	/// scan wakes nobody and we spin until the waiter lands.
	///
	/// # Safety
	///
	/// The calling thread must be the current holder.
	pub(super) unsafe fn unlock(&self, key: usize) {
		debug_assert!(self.is_locked_by_me(), "unlock by a non-holder");

		let mut spin = SpinWait::new();

		loop {
			let old = self.load();

			if old.has_waiters() {
				let mut woke_somebody = false;

				// safety: tokens seen by the filter belong to threads
				//         still queued on `key`, so their nodes are
				//         alive (see WaitNode::from_token).
				unsafe {
					parking_lot_core::unpark_filter(
						key,
						|token| {
							if woke_somebody {
								return FilterOp::Stop;
							}

							// safety: see WaitNode::from_token; the
							//         filter runs under the bucket lock
							let node = unsafe { WaitNode::from_token(token) };
							debug_assert!(!node.is_deadlocked.load(Ordering::Relaxed));
							self.transfer_lock(node.tid);
							woke_somebody = true;
							FilterOp::Unpark
						},
						|_| DEFAULT_UNPARK_TOKEN,
					);
				}

				if woke_somebody {
					return;
				}
			} else if self.compare_exchange(old, LockWord::UNLOCKED) {
				return;
			}

			spin.spin();
		}
	}
}

/// A first-in, first-out mutex.
///
/// Release hands the lock directly to the thread that has waited
/// longest: the unpark filter names the next holder while the parking
/// lot's queue is locked, so waiters acquire in exactly the order they
/// registered and no acquirer can barge past them.
///
/// This type implements [`lock_api::RawMutex`]; use [`crate::FairMutex`]
/// for the data-carrying form.
pub struct RawFairMutex {
	word: AtomicLockWord,
}

impl RawFairMutex {
	/// Creates the mutex unlocked, with no waiters.
	#[must_use]
	pub const fn new() -> Self {
		Self {
			word: AtomicLockWord::new(),
		}
	}

	fn key(&self) -> usize {
		self as *const Self as usize
	}

	/// Parks until the lock is handed to us. Returns `true` when we
	/// own the lock on return, `false` when the caller should retry
	/// the fast path.
	fn park(&self) -> bool {
		if !self.word.increment_num_waiters() {
			return false;
		}

		let node = WaitNode::new(thread_id::current(), 0);

		// safety: the key is this mutex's address and the node outlives
		//         the park call.
		let res = unsafe {
			parking_lot_core::park(
				self.key(),
				|| !self.word.is_locked_by_me(),
				|| {},
				|_, _| {},
				node.token(),
				None,
			)
		};

		match res {
			// The hand-off names us before waking us.
			ParkResult::Unparked(_) => true,
			// Validation failed before we slept; un-register and try
			// the fast path again.
			ParkResult::Invalid => {
				self.word.decrement_num_waiters();
				false
			}
			ParkResult::TimedOut => unreachable!("parked without a timeout"),
		}
	}
}

impl Default for RawFairMutex {
	fn default() -> Self {
		Self::new()
	}
}

unsafe impl lock_api::RawMutex for RawFairMutex {
	#[allow(clippy::declare_interior_mutable_const)]
	const INIT: Self = Self::new();

	type GuardMarker = GuardNoSend;

	fn lock(&self) {
		let mut spin = SpinWait::new();

		loop {
			if self.word.try_lock() {
				return;
			}

			spin.spin_no_yield();

			if self.park() {
				debug_assert!(self.word.is_locked_by_me());
				return;
			}
		}
	}

	fn try_lock(&self) -> bool {
		self.word.try_lock()
	}

	unsafe fn unlock(&self) {
		// safety: forwarded contract; the caller holds the lock.
		unsafe { self.word.unlock(self.key()) }
	}

	fn is_locked(&self) -> bool {
		self.word.load().is_locked()
	}
}

impl Drop for RawFairMutex {
	fn drop(&mut self) {
		let word = self.word.load();
		debug_assert!(!word.is_locked(), "fair mutex dropped while locked");
		debug_assert!(!word.has_waiters(), "fair mutex dropped with waiters");
	}
}

#[cfg(test)]
mod tests {
	use lock_api::RawMutex as _;

	use super::*;

	#[test]
	fn word_packs_both_fields() {
		let word = LockWord {
			holder: 7,
			num_waiters: 3,
		};

		assert_eq!(LockWord::unpack(word.pack()), word);
		assert_eq!(LockWord::unpack(LockWord::UNLOCKED.pack()), LockWord::UNLOCKED);
	}

	#[test]
	fn transfer_names_the_new_holder() {
		let word = LockWord {
			holder: 2,
			num_waiters: 2,
		};
		let transferred = word.transfer_to(5);

		assert_eq!(transferred.holder, 5);
		assert_eq!(transferred.num_waiters, 1);
	}

	#[test]
	fn try_lock_records_the_holder() {
		let lock = RawFairMutex::new();

		assert!(lock.try_lock());
		assert!(lock.word.is_locked_by_me());
		assert!(!lock.try_lock());

		unsafe { lock.unlock() };
		assert!(!lock.is_locked());
	}

	// Every registered waiter is either handed the lock or
	// un-registers itself, so the count always drains back to zero.
	#[test]
	fn waiter_count_returns_to_zero_after_contention() {
		use std::sync::Arc;

		let lock = Arc::new(RawFairMutex::new());

		let handles: Vec<_> = (0..4)
			.map(|_| {
				let lock = Arc::clone(&lock);
				std::thread::spawn(move || {
					for _ in 0..1_000 {
						lock.lock();
						// safety: we just locked it
						unsafe { lock.unlock() };
					}
				})
			})
			.collect();

		for handle in handles {
			handle.join().unwrap();
		}

		assert_eq!(lock.word.load(), LockWord::UNLOCKED);
	}
}
