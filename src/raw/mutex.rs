use std::sync::atomic::{AtomicU8, Ordering};

use lock_api::GuardNoSend;
use parking_lot_core::{SpinWait, DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};

const UNLOCKED: u8 = 0;
const LOCKED: u8 = 1;
// Held, and at least one thread is parked or about to park. Kept as a
// one-bit hint so the uncontended unlock is a single atomic store and
// a contended unlock performs at most one unpark.
const CONTENDED: u8 = 2;

/// A compact unfair mutex.
///
/// The uncontended path is a single compare-and-swap; contended
/// threads park in the global parking lot keyed by the mutex address.
/// A released lock goes to whichever thread grabs it next, woken or
/// not, so there is no fairness guarantee.
///
/// This type implements [`lock_api::RawMutex`]; wrap it in
/// [`lock_api::Mutex`] (or use [`crate::Mutex`]) to protect data with
/// it.
pub struct RawMutex {
	state: AtomicU8,
}

impl RawMutex {
	/// Creates the mutex in the unlocked state.
	#[must_use]
	pub const fn new() -> Self {
		Self {
			state: AtomicU8::new(UNLOCKED),
		}
	}

	fn key(&self) -> usize {
		self as *const Self as usize
	}

	fn try_acquire(&self) -> bool {
		self.state
			.compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
			.is_ok()
	}

	fn is_contended(&self) -> bool {
		self.state.load(Ordering::Acquire) == CONTENDED
	}

	/// Decides between retrying the fast path and parking. Returns
	/// `true` when the word became unlocked; otherwise the word is
	/// marked contended (by us or someone else) and the caller must
	/// take the slow path.
	fn uncontended_path_available(&self) -> bool {
		loop {
			let state = self.state.load(Ordering::Acquire);

			if state == UNLOCKED {
				return true;
			}

			if state == CONTENDED
				|| self
					.state
					.compare_exchange(LOCKED, CONTENDED, Ordering::AcqRel, Ordering::Relaxed)
					.is_ok()
			{
				return false;
			}

			std::hint::spin_loop();
		}
	}

	fn try_lock_contended(&self) -> bool {
		// Acquire with the contended hint still set: other waiters may
		// be parked, and our unlock must wake one of them.
		self.state
			.compare_exchange(UNLOCKED, CONTENDED, Ordering::Acquire, Ordering::Relaxed)
			.is_ok()
	}

	fn park(&self) {
		// safety: the key is this mutex's address, and the validate
		//         closure only reads our own atomic.
		unsafe {
			parking_lot_core::park(
				self.key(),
				|| self.is_contended(),
				|| {},
				|_, _| {},
				DEFAULT_PARK_TOKEN,
				None,
			);
		}
	}

	#[cold]
	fn lock_contended(&self) {
		while !self.try_lock_contended() {
			self.park();
		}
	}
}

impl Default for RawMutex {
	fn default() -> Self {
		Self::new()
	}
}

unsafe impl lock_api::RawMutex for RawMutex {
	#[allow(clippy::declare_interior_mutable_const)]
	const INIT: Self = Self::new();

	type GuardMarker = GuardNoSend;

	fn lock(&self) {
		let mut spin = SpinWait::new();

		while !self.try_acquire() {
			if !self.uncontended_path_available() {
				self.lock_contended();
				return;
			}

			spin.spin_no_yield();
		}
	}

	fn try_lock(&self) -> bool {
		self.try_acquire()
	}

	unsafe fn unlock(&self) {
		let old = self.state.swap(UNLOCKED, Ordering::Release);
		debug_assert_ne!(old, UNLOCKED, "unlock of an unlocked mutex");

		if old == CONTENDED {
			// safety: the key is this mutex's address.
			unsafe {
				parking_lot_core::unpark_one(self.key(), |_| DEFAULT_UNPARK_TOKEN);
			}
		}
	}

	fn is_locked(&self) -> bool {
		self.state.load(Ordering::Relaxed) != UNLOCKED
	}
}

impl Drop for RawMutex {
	fn drop(&mut self) {
		debug_assert!(
			!lock_api::RawMutex::is_locked(self),
			"mutex dropped while locked"
		);
	}
}

#[cfg(test)]
mod tests {
	use lock_api::RawMutex as _;

	use super::*;

	#[test]
	fn unlocked_when_initialized() {
		let lock = RawMutex::new();
		assert!(!lock.is_locked());
	}

	#[test]
	fn try_lock_takes_and_blocks_further_attempts() {
		let lock = RawMutex::new();

		assert!(lock.try_lock());
		assert!(lock.is_locked());
		assert!(!lock.try_lock());

		unsafe { lock.unlock() };
		assert!(!lock.is_locked());
	}

	#[test]
	fn lock_after_unlock_succeeds() {
		let lock = RawMutex::new();

		lock.lock();
		unsafe { lock.unlock() };
		assert!(lock.try_lock());
		unsafe { lock.unlock() };
	}
}
