use std::collections::HashMap;
use std::sync::atomic::Ordering;

use parking_lot_core::{FilterOp, DEFAULT_UNPARK_TOKEN};

use super::fair_deadlock_mutex::{RawFairDeadlockSafeMutex, WAIT_INFO};
use super::fair_mutex::WaitNode;

type Lock = *mut RawFairDeadlockSafeMutex;

struct WaiterInfo {
	lock: Lock,
	wait_token: u64,
}

/// One observer of the fair-mutex wait-for graph.
///
/// A pass snapshots the announcement table, confirms each announced
/// wait against the parking lot (a thread may have announced without
/// having parked yet, or may have been handed the lock since), walks
/// the resulting flat maps for a cycle, and breaks one by flagging and
/// waking its most recent joiner. The maps are rebuilt every pass;
/// nothing persists between runs.
pub(super) struct DeadlockDetector {
	waiters: HashMap<u32, WaiterInfo>,
	holders: HashMap<Lock, u32>,
}

impl DeadlockDetector {
	pub(super) fn new() -> Self {
		Self {
			waiters: HashMap::new(),
			holders: HashMap::new(),
		}
	}

	/// Runs one pass. Returns `true` when a deadlock was found and its
	/// victim woken, in which case another pass may find more.
	pub(super) fn run(&mut self) -> bool {
		self.gather_waiters_and_holders();

		let walk_starts: Vec<(u32, Lock)> = self
			.waiters
			.iter()
			.map(|(&tid, info)| (tid, info.lock))
			.collect();

		for (tid, lock) in walk_starts {
			let cycle = self.detect_lock_cycle(tid, lock);

			if self.verify_lock_cycle(&cycle) {
				return true;
			}
		}

		false
	}

	/// Stage 1: observation. An announcement alone is not proof of a
	/// wait, so each announced `(thread, lock)` pair is confirmed by a
	/// retain-only scan of the lock's queue: the pair is recorded iff
	/// the thread is genuinely parked there and the lock is still held
	/// at that moment, both checked under the lot's bucket lock.
	fn gather_waiters_and_holders(&mut self) {
		self.waiters.clear();
		self.holders.clear();

		for (tid, wait_info) in WAIT_INFO.iter().enumerate() {
			let tid = tid as u32;
			let lock = wait_info.announced_lock();
			let wait_token = wait_info.current_wait_token();

			if lock.is_null() {
				continue;
			}

			// safety: an announced mutex stays alive while announced
			//         (its waiter is inside `lock`, borrowing it), and
			//         tokens seen by the filter belong to threads still
			//         queued on it.
			unsafe {
				parking_lot_core::unpark_filter(
					lock as usize,
					|token| {
						let node = unsafe { WaitNode::from_token(token) };
						// a flagged node is removed by the same filter
						// call that flags it, so it cannot still be
						// queued here
						debug_assert!(!node.is_deadlocked.load(Ordering::Relaxed));

						if node.tid == tid {
							let word = unsafe { (*lock).load_word() };

							if word.is_locked() {
								self.waiters.insert(tid, WaiterInfo { lock, wait_token });
								self.holders.insert(lock, word.holder);
							}

							// Found the thread we were looking for;
							// leave it parked and stop the scan.
							FilterOp::Stop
						} else {
							FilterOp::Skip
						}
					},
					|_| DEFAULT_UNPARK_TOKEN,
				);
			}
		}
	}

	/// Stage 2: walk holder and waiter edges from one observed wait.
	/// Returns the cycle as a thread → lock map, or an empty map when
	/// the walk reaches a running (non-waiting) holder.
	fn detect_lock_cycle(&self, start_tid: u32, start_lock: Lock) -> HashMap<u32, Lock> {
		let mut cycle = HashMap::new();
		let mut tid = start_tid;
		let mut lock = start_lock;

		cycle.insert(tid, lock);

		loop {
			tid = match self.holders.get(&lock) {
				Some(&holder) => holder,
				None => {
					cycle.clear();
					return cycle;
				}
			};

			// The holder is not itself waiting, so no deadlock.
			let Some(info) = self.waiters.get(&tid) else {
				cycle.clear();
				return cycle;
			};
			lock = info.lock;

			if cycle.contains_key(&tid) {
				return cycle;
			}

			cycle.insert(tid, lock);
		}
	}

	/// Picks the cycle member whose wait began last; ties resolve
	/// toward the higher thread id so the choice does not depend on
	/// map iteration order. Returns `None` when any member's announced
	/// wait no longer matches the cycle: the observation is stale.
	fn select_victim(&self, cycle: &HashMap<u32, Lock>) -> Option<u32> {
		let mut latest: Option<(u64, u32)> = None;

		for (&tid, &lock) in cycle {
			let wait_info = &WAIT_INFO[tid as usize];

			if wait_info.announced_lock() != lock {
				return None;
			}

			let candidate = (wait_info.wait_start_nanos(), tid);

			if latest.map_or(true, |best| candidate > best) {
				latest = Some(candidate);
			}
		}

		latest.map(|(_, tid)| tid)
	}

	/// Stage 3: re-validate the cycle, then wake its victim with the
	/// deadlocked flag set. The waiter must match on thread id *and*
	/// wait token: that proves it is the exact wait episode observed in
	/// stage 1, not a later wait by a recycled thread. Returns `true`
	/// iff a victim was actually woken.
	fn verify_lock_cycle(&self, cycle: &HashMap<u32, Lock>) -> bool {
		if cycle.is_empty() {
			return false;
		}

		let Some(victim) = self.select_victim(cycle) else {
			return false;
		};

		let info = &self.waiters[&victim];
		let (lock, wait_token) = (info.lock, info.wait_token);
		let mut unparked = false;

		// safety: same argument as in gather_waiters_and_holders.
		unsafe {
			parking_lot_core::unpark_filter(
				lock as usize,
				|token| {
					if unparked {
						return FilterOp::Stop;
					}

					let node = unsafe { WaitNode::from_token(token) };

					if node.tid == victim && node.wait_token == wait_token {
						debug_assert!(!node.is_deadlocked.load(Ordering::Relaxed));
						node.is_deadlocked.store(true, Ordering::Release);
						unparked = true;
						FilterOp::Unpark
					} else {
						FilterOp::Skip
					}
				},
				|_| DEFAULT_UNPARK_TOKEN,
			);
		}

		if unparked {
			log::warn!(
				"deadlock resolved: woke thread {victim} waiting on mutex {lock:p}",
			);
		}

		unparked
	}
}
