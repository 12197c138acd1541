use std::cell::UnsafeCell;
use std::marker::PhantomData;

use crate::raw::{RawDeadlockSafe, RawFairDeadlockSafeMutex};

mod error;
mod guard;
mod mutex;

/// A mutual exclusion primitive protecting shared data, whose `lock`
/// refuses to wait forever.
///
/// This mutex blocks threads waiting for the lock to become available,
/// like any other, but a thread whose wait completes a deadlock cycle
/// gets a [`DeadlockError`] back instead of sleeping until the end of
/// time. The data is only reachable through the [`DetectingMutexGuard`]s
/// returned from [`lock`] and [`try_lock`], so it is only ever touched
/// while the mutex is held.
///
/// A caller receiving [`DeadlockError`] has not acquired anything: the
/// expected reaction is to release whatever locks it already holds and
/// retry from a safe point.
///
/// `R` picks the raw lock and with it the flavor of detection; use the
/// [`DeadlockSafeMutex`] and [`FairDeadlockSafeMutex`] aliases rather
/// than naming this type directly.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use vigilock::DeadlockSafeMutex;
///
/// const N: usize = 10;
///
/// let data = Arc::new(DeadlockSafeMutex::new(0));
///
/// let handles: Vec<_> = (0..N)
///     .map(|_| {
///         let data = Arc::clone(&data);
///         thread::spawn(move || {
///             let mut data = data.lock().unwrap();
///             *data += 1;
///         })
///     })
///     .collect();
///
/// for handle in handles {
///     handle.join().unwrap();
/// }
///
/// assert_eq!(*data.lock().unwrap(), N);
/// ```
///
/// [`lock`]: `DetectingMutex::lock`
/// [`try_lock`]: `DetectingMutex::try_lock`
/// [`DeadlockSafeMutex`]: `crate::DeadlockSafeMutex`
/// [`FairDeadlockSafeMutex`]: `crate::FairDeadlockSafeMutex`
pub struct DetectingMutex<R, T: ?Sized> {
	raw: R,
	data: UnsafeCell<T>,
}

/// An RAII implementation of a "scoped lock" of a [`DetectingMutex`].
///
/// When this structure is dropped (falls out of scope), the lock will
/// be unlocked.
///
/// This is created by the [`lock`] and [`try_lock`] methods on
/// [`DetectingMutex`].
///
/// [`lock`]: `DetectingMutex::lock`
/// [`try_lock`]: `DetectingMutex::try_lock`
pub struct DetectingMutexGuard<'a, R: RawDeadlockSafe, T: ?Sized> {
	mutex: &'a DetectingMutex<R, T>,
	_marker: PhantomData<(&'a mut T, R::GuardMarker)>,
}

/// The error returned when a blocking `lock` completed a wait-for
/// cycle and this thread was chosen to break it.
///
/// The mutex was *not* acquired. The caller still holds everything it
/// held before the call and is expected to unwind those locks before
/// retrying.
pub struct DeadlockError;

impl<T: ?Sized> DetectingMutex<RawFairDeadlockSafeMutex, T> {
	/// Runs deadlock detection passes until one finds nothing to
	/// resolve, and returns how many deadlocks were broken.
	///
	/// Equivalent to [`crate::detect_deadlocks`]; provided here so
	/// callers working with [`FairDeadlockSafeMutex`] values have the
	/// scan in reach.
	///
	/// [`FairDeadlockSafeMutex`]: `crate::FairDeadlockSafeMutex`
	pub fn detect_deadlocks() -> usize {
		RawFairDeadlockSafeMutex::detect_deadlocks()
	}
}

#[cfg(test)]
mod tests {
	use crate::{DeadlockSafeMutex, FairDeadlockSafeMutex};

	#[test]
	fn unlocked_when_initialized() {
		let lock = DeadlockSafeMutex::new("Hello, world!");

		assert!(!lock.is_locked());
	}

	#[test]
	fn locked_while_guard_lives() {
		let lock = DeadlockSafeMutex::new("Hello, world!");

		let guard = lock.lock().unwrap();

		assert!(lock.is_locked());
		drop(guard);
	}

	#[test]
	fn dropping_guard_releases_mutex() {
		let lock = DeadlockSafeMutex::new("Hello, world!");

		let guard = lock.lock().unwrap();
		drop(guard);

		assert!(!lock.is_locked());
	}

	#[test]
	fn display_works_for_guard() {
		let lock = DeadlockSafeMutex::new("Hello, world!");
		let guard = lock.lock().unwrap();

		assert_eq!(guard.to_string(), "Hello, world!".to_string());
	}

	#[test]
	fn try_lock_fails_while_held() {
		let lock = DeadlockSafeMutex::new(0);

		let guard = lock.try_lock().unwrap();
		assert!(lock.try_lock().is_none());
		drop(guard);

		assert!(lock.try_lock().is_some());
	}

	#[test]
	fn debug_shows_data_or_placeholder() {
		let lock = DeadlockSafeMutex::new(5);
		assert_eq!(format!("{lock:?}"), "DetectingMutex { data: 5 }");

		let guard = lock.lock().unwrap();
		assert_eq!(format!("{lock:?}"), "DetectingMutex { data: <locked> }");
		drop(guard);
	}

	#[test]
	fn fair_alias_locks_and_unlocks() {
		let lock = FairDeadlockSafeMutex::new(vec![1, 2, 3]);

		{
			let mut guard = lock.lock().unwrap();
			guard.push(4);
		}

		assert_eq!(lock.into_inner(), vec![1, 2, 3, 4]);
	}
}
