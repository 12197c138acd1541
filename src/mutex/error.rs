use core::fmt;
use std::error::Error;

use super::DeadlockError;

impl fmt::Debug for DeadlockError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DeadlockError").finish()
	}
}

impl fmt::Display for DeadlockError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		"deadlocked: this acquisition was abandoned to break a wait cycle".fmt(f)
	}
}

impl Error for DeadlockError {}
