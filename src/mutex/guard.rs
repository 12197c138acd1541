use std::fmt::{Debug, Display};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use crate::raw::RawDeadlockSafe;

use super::{DetectingMutex, DetectingMutexGuard};

impl<'a, R: RawDeadlockSafe, T: ?Sized> DetectingMutexGuard<'a, R, T> {
	/// Create a guard for the given mutex.
	///
	/// # Safety
	///
	/// The calling thread must have just locked the mutex, and no
	/// other guard for it may exist.
	pub(super) const unsafe fn new(mutex: &'a DetectingMutex<R, T>) -> Self {
		Self {
			mutex,
			_marker: PhantomData,
		}
	}
}

impl<R: RawDeadlockSafe, T: ?Sized> Drop for DetectingMutexGuard<'_, R, T> {
	fn drop(&mut self) {
		// safety: this guard is being destroyed, so the data cannot be
		//         accessed without locking again
		unsafe { self.mutex.raw.unlock() }
	}
}

impl<R: RawDeadlockSafe, T: ?Sized> Deref for DetectingMutexGuard<'_, R, T> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		// safety: the guard proves the mutex is locked, so no mutable
		//         reference to the data can exist elsewhere
		unsafe { &*self.mutex.data.get() }
	}
}

impl<R: RawDeadlockSafe, T: ?Sized> DerefMut for DetectingMutexGuard<'_, R, T> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		// safety: the guard proves the mutex is locked, and we hold a
		//         mutable reference to the guard, so this is the only
		//         reference to the data
		unsafe { &mut *self.mutex.data.get() }
	}
}

impl<R: RawDeadlockSafe, T: ?Sized> AsRef<T> for DetectingMutexGuard<'_, R, T> {
	fn as_ref(&self) -> &T {
		self
	}
}

impl<R: RawDeadlockSafe, T: ?Sized> AsMut<T> for DetectingMutexGuard<'_, R, T> {
	fn as_mut(&mut self) -> &mut T {
		self
	}
}

#[mutants::skip]
#[cfg(not(tarpaulin_include))]
impl<R: RawDeadlockSafe, T: Debug + ?Sized> Debug for DetectingMutexGuard<'_, R, T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		Debug::fmt(&**self, f)
	}
}

impl<R: RawDeadlockSafe, T: Display + ?Sized> Display for DetectingMutexGuard<'_, R, T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		Display::fmt(&**self, f)
	}
}

unsafe impl<R: RawDeadlockSafe + Sync, T: ?Sized + Sync> Sync for DetectingMutexGuard<'_, R, T> {}
