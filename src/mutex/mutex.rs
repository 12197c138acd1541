use std::cell::UnsafeCell;
use std::fmt::Debug;

use crate::raw::{LockResult, RawDeadlockSafe};

use super::{DeadlockError, DetectingMutex, DetectingMutexGuard};

impl<R: RawDeadlockSafe, T> DetectingMutex<R, T> {
	/// Create a new unlocked mutex.
	///
	/// # Examples
	///
	/// ```
	/// use vigilock::DeadlockSafeMutex;
	///
	/// let mutex = DeadlockSafeMutex::new(0);
	/// ```
	#[must_use]
	pub const fn new(data: T) -> Self {
		Self {
			raw: R::INIT,
			data: UnsafeCell::new(data),
		}
	}

	/// Consumes this mutex, returning the underlying data.
	///
	/// # Examples
	///
	/// ```
	/// use vigilock::DeadlockSafeMutex;
	///
	/// let mutex = DeadlockSafeMutex::new(0);
	/// assert_eq!(mutex.into_inner(), 0);
	/// ```
	#[must_use]
	pub fn into_inner(self) -> T {
		self.data.into_inner()
	}
}

impl<R: RawDeadlockSafe, T: ?Sized> DetectingMutex<R, T> {
	/// Block until this mutex can be locked, and lock it, unless the
	/// wait would never end.
	///
	/// On success the calling thread is the only one holding the
	/// mutex, and the returned [`DetectingMutexGuard`] unlocks it when
	/// dropped. If the wait completed a deadlock cycle and this thread
	/// was picked to break it, [`DeadlockError`] is returned instead
	/// and the mutex is untouched for the caller.
	///
	/// # Errors
	///
	/// Returns [`DeadlockError`] when this acquisition was abandoned
	/// to break a deadlock. Release the locks already held and retry.
	///
	/// # Examples
	///
	/// ```
	/// use std::{sync::Arc, thread};
	///
	/// use vigilock::DeadlockSafeMutex;
	///
	/// let mutex = Arc::new(DeadlockSafeMutex::new(0));
	/// let c_mutex = Arc::clone(&mutex);
	///
	/// thread::spawn(move || {
	///     *c_mutex.lock().unwrap() = 10;
	/// })
	/// .join()
	/// .expect("thread::spawn failed");
	///
	/// assert_eq!(*mutex.lock().unwrap(), 10);
	/// ```
	pub fn lock(&self) -> Result<DetectingMutexGuard<'_, R, T>, DeadlockError> {
		match self.raw.lock() {
			// safety: we just locked the mutex
			LockResult::Locked => Ok(unsafe { DetectingMutexGuard::new(self) }),
			LockResult::Deadlocked => Err(DeadlockError),
		}
	}

	/// Attempts to lock the mutex without blocking.
	///
	/// Returns `None` when the mutex is already held by someone else;
	/// a `try_lock` never participates in deadlock detection because
	/// it never waits.
	///
	/// # Examples
	///
	/// ```
	/// use vigilock::DeadlockSafeMutex;
	///
	/// let mutex = DeadlockSafeMutex::new(5);
	///
	/// if let Some(mut guard) = mutex.try_lock() {
	///     *guard += 1;
	/// }
	///
	/// assert_eq!(*mutex.lock().unwrap(), 6);
	/// ```
	#[must_use]
	pub fn try_lock(&self) -> Option<DetectingMutexGuard<'_, R, T>> {
		// safety: we just locked the mutex
		self.raw
			.try_lock()
			.then(|| unsafe { DetectingMutexGuard::new(self) })
	}

	/// Returns `true` if the mutex is currently locked. Advisory: the
	/// answer may be stale by the time the caller looks at it.
	#[must_use]
	pub fn is_locked(&self) -> bool {
		self.raw.is_locked()
	}

	/// Returns a mutable reference to the underlying data.
	///
	/// Since this call borrows the mutex mutably, no actual locking
	/// takes place: the borrow statically guarantees no guards exist.
	///
	/// # Examples
	///
	/// ```
	/// use vigilock::DeadlockSafeMutex;
	///
	/// let mut mutex = DeadlockSafeMutex::new(0);
	/// *mutex.get_mut() = 10;
	/// assert_eq!(*mutex.lock().unwrap(), 10);
	/// ```
	#[must_use]
	pub fn get_mut(&mut self) -> &mut T {
		self.data.get_mut()
	}

	/// Consumes the guard, and consequently unlocks its mutex.
	///
	/// # Examples
	///
	/// ```
	/// use vigilock::DeadlockSafeMutex;
	///
	/// let mutex = DeadlockSafeMutex::new(0);
	///
	/// let mut guard = mutex.lock().unwrap();
	/// *guard += 20;
	///
	/// DeadlockSafeMutex::unlock(guard);
	/// assert!(!mutex.is_locked());
	/// ```
	pub fn unlock(guard: DetectingMutexGuard<'_, R, T>) {
		drop(guard);
	}

	/// Returns the raw underlying lock.
	///
	/// # Safety
	///
	/// This method is unsafe because it allows unlocking the mutex
	/// while a [`DetectingMutexGuard`] to it is still alive.
	#[must_use]
	pub const unsafe fn raw(&self) -> &R {
		&self.raw
	}
}

#[mutants::skip]
#[cfg(not(tarpaulin_include))]
impl<R: RawDeadlockSafe, T: ?Sized + Debug> Debug for DetectingMutex<R, T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		// a try lock, dropped immediately after formatting, so there's
		// no risk of blocking ourselves or any other thread
		if let Some(value) = self.try_lock() {
			f.debug_struct("DetectingMutex")
				.field("data", &&*value)
				.finish()
		} else {
			struct LockedPlaceholder;
			impl Debug for LockedPlaceholder {
				fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
					f.write_str("<locked>")
				}
			}

			f.debug_struct("DetectingMutex")
				.field("data", &LockedPlaceholder)
				.finish()
		}
	}
}

impl<R: RawDeadlockSafe, T: Default> Default for DetectingMutex<R, T> {
	fn default() -> Self {
		Self::new(T::default())
	}
}

impl<R: RawDeadlockSafe, T> From<T> for DetectingMutex<R, T> {
	fn from(value: T) -> Self {
		Self::new(value)
	}
}

impl<R: RawDeadlockSafe, T: ?Sized> AsMut<T> for DetectingMutex<R, T> {
	fn as_mut(&mut self) -> &mut T {
		self.get_mut()
	}
}

unsafe impl<R: Send, T: ?Sized + Send> Send for DetectingMutex<R, T> {}
unsafe impl<R: Sync, T: ?Sized + Send> Sync for DetectingMutex<R, T> {}
