//! Dense thread identifiers.
//!
//! Every thread that touches a lock in this crate is assigned an id in
//! `[0, MAX_THREADS)` the first time it asks for one. Ids are dense so
//! they can index the global wait-announcement tables, and they are
//! returned to a free list when the thread exits, so a long-running
//! process can churn through threads without exhausting the range.

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// The maximum number of live threads that may use this crate's locks
/// at the same time.
pub const MAX_THREADS: usize = 1024;

/// Sentinel id, one past the largest assignable thread id.
///
/// Never returned by [`current`]; lock words use it to mean "no
/// thread".
pub const INVALID_THREAD_ID: u32 = MAX_THREADS as u32;

// Popped from the tail, so ids are handed out in ascending order.
static FREE_IDS: Lazy<Mutex<Vec<u32>>> =
	Lazy::new(|| Mutex::new((0..MAX_THREADS as u32).rev().collect()));

struct Registration(u32);

impl Registration {
	fn acquire() -> Self {
		let id = FREE_IDS
			.lock()
			.pop()
			.expect("more than MAX_THREADS threads are using vigilock locks");
		Self(id)
	}
}

impl Drop for Registration {
	fn drop(&mut self) {
		FREE_IDS.lock().push(self.0);
	}
}

thread_local! {
	static REGISTRATION: Registration = Registration::acquire();
}

/// The calling thread's id.
///
/// The id is assigned on first use and stays stable until the thread
/// exits, at which point it may be reused by a later thread.
///
/// # Panics
///
/// Panics if more than [`MAX_THREADS`] threads hold ids at once. The
/// cap is a compile-time constant; hitting it is a configuration
/// error, not a recoverable condition.
#[must_use]
pub fn current() -> u32 {
	REGISTRATION.with(|r| r.0)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn id_is_in_range() {
		assert!((current() as usize) < MAX_THREADS);
	}

	#[test]
	fn id_is_stable_within_a_thread() {
		assert_eq!(current(), current());
	}

	#[test]
	fn ids_differ_across_live_threads() {
		let mine = current();
		let theirs = std::thread::spawn(current).join().unwrap();
		assert_ne!(mine, theirs);
	}
}
