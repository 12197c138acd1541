use std::sync::Arc;
use std::thread;
use std::time::Duration;

use vigilock::{FairDeadlockSafeMutex, FairMutex};

/// Waiters must acquire in the order they started waiting. Arrivals
/// are spaced far enough apart that each thread is parked before the
/// next one starts.
#[test]
fn handoff_is_first_in_first_out() {
	const WAITERS: usize = 8;

	let mutex = Arc::new(FairMutex::new(()));
	let order = Arc::new(FairMutex::new(Vec::new()));

	let gate = mutex.lock();

	let handles: Vec<_> = (0..WAITERS)
		.map(|i| {
			let mutex = Arc::clone(&mutex);
			let order = Arc::clone(&order);
			let handle = thread::spawn(move || {
				let _guard = mutex.lock();
				order.lock().push(i);
				thread::sleep(Duration::from_millis(10));
			});
			// let waiter i park before waiter i + 1 arrives
			thread::sleep(Duration::from_millis(100));
			handle
		})
		.collect();

	drop(gate);

	for handle in handles {
		handle.join().unwrap();
	}

	let order = order.lock();
	assert_eq!(*order, (0..WAITERS).collect::<Vec<_>>());
}

#[test]
fn fifo_holds_for_the_deadlock_safe_variant() {
	const WAITERS: usize = 4;

	let mutex = Arc::new(FairDeadlockSafeMutex::new(Vec::new()));

	let gate = mutex.lock().unwrap();

	let handles: Vec<_> = (0..WAITERS)
		.map(|i| {
			let mutex = Arc::clone(&mutex);
			let handle = thread::spawn(move || {
				mutex.lock().unwrap().push(i);
			});
			thread::sleep(Duration::from_millis(100));
			handle
		})
		.collect();

	drop(gate);

	for handle in handles {
		handle.join().unwrap();
	}

	assert_eq!(*mutex.lock().unwrap(), (0..WAITERS).collect::<Vec<_>>());
}

#[test]
fn increment_stress_is_mutually_exclusive() {
	const THREADS: usize = 8;
	const ITERS: usize = 5_000;

	let counter = Arc::new(FairMutex::new(0usize));

	let handles: Vec<_> = (0..THREADS)
		.map(|_| {
			let counter = Arc::clone(&counter);
			thread::spawn(move || {
				for _ in 0..ITERS {
					*counter.lock() += 1;
				}
			})
		})
		.collect();

	for handle in handles {
		handle.join().unwrap();
	}

	assert_eq!(*counter.lock(), THREADS * ITERS);
}

#[test]
fn increment_stress_deadlock_safe() {
	const THREADS: usize = 8;
	const ITERS: usize = 2_500;

	let counter = Arc::new(FairDeadlockSafeMutex::new(0usize));

	let handles: Vec<_> = (0..THREADS)
		.map(|_| {
			let counter = Arc::clone(&counter);
			thread::spawn(move || {
				for _ in 0..ITERS {
					*counter.lock().unwrap() += 1;
				}
			})
		})
		.collect();

	for handle in handles {
		handle.join().unwrap();
	}

	assert_eq!(*counter.lock().unwrap(), THREADS * ITERS);
}

#[test]
fn released_lock_goes_to_the_parked_waiter_not_a_barger() {
	let mutex = Arc::new(FairMutex::new(0));
	let c_mutex = Arc::clone(&mutex);

	let gate = mutex.lock();

	let waiter = thread::spawn(move || {
		let mut guard = c_mutex.lock();
		*guard = 1;
		thread::sleep(Duration::from_millis(300));
	});

	// the waiter parks; release transfers ownership to it in-place, so
	// a try_lock cannot sneak in between release and its wakeup
	thread::sleep(Duration::from_millis(100));
	drop(gate);
	assert!(mutex.try_lock().is_none());

	waiter.join().unwrap();
	assert_eq!(*mutex.lock(), 1);
}
