use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use vigilock::{DeadlockSafeMutex, Mutex};

#[test]
fn uncontended_lock_unlock_loop() {
	let mutex = Mutex::new(0u64);

	for _ in 0..1_000_000 {
		*mutex.lock() += 1;
	}

	assert_eq!(*mutex.lock(), 1_000_000);
}

#[test]
fn uncontended_loop_deadlock_safe() {
	let mutex = DeadlockSafeMutex::new(0u64);

	for _ in 0..100_000 {
		*mutex.lock().unwrap() += 1;
	}

	assert_eq!(*mutex.lock().unwrap(), 100_000);
}

#[test]
fn ping_pong_hands_over_the_lock() {
	let mutex = Arc::new(Mutex::new(String::new()));
	let c_mutex = Arc::clone(&mutex);

	let guard = mutex.lock();
	assert!(mutex.is_locked());

	let (tx, rx) = mpsc::channel();
	let waiter = thread::spawn(move || {
		tx.send(()).unwrap();
		let mut data = c_mutex.lock();
		data.push_str("from the waiter");
	});

	// the waiter is alive and about to block on the mutex
	rx.recv().unwrap();
	thread::sleep(std::time::Duration::from_millis(50));
	drop(guard);

	waiter.join().unwrap();
	assert_eq!(*mutex.lock(), "from the waiter");
}

#[test]
fn increment_stress_is_mutually_exclusive() {
	const THREADS: usize = 8;
	const ITERS: usize = 10_000;

	let counter = Arc::new(Mutex::new(0usize));

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
	const ITERS: usize = 5_000;

	let counter = Arc::new(DeadlockSafeMutex::new(0usize));

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
fn try_lock_respects_a_holder_in_another_thread() {
	let mutex = Arc::new(DeadlockSafeMutex::new(7));
	let c_mutex = Arc::clone(&mutex);

	let guard = mutex.lock().unwrap();

	thread::spawn(move || {
		assert!(c_mutex.try_lock().is_none());
	})
	.join()
	.unwrap();

	drop(guard);
	assert_eq!(*mutex.try_lock().unwrap(), 7);
}
