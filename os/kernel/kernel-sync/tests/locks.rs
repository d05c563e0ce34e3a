use kernel_sync::{SpinLock, TicketLock};
use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

macro_rules! lock_suite {
    ($module:ident, $lock:ident) => {
        mod $module {
            use super::*;

            #[test]
            fn basic_lock_and_raii() {
                let l = $lock::new(0_u32);
                {
                    let mut g = l.lock();
                    *g = 41;
                }
                {
                    let mut g = l.lock();
                    *g += 1;
                    assert_eq!(*g, 42);
                }
                assert!(!l.is_locked());
            }

            #[test]
            fn try_lock_fails_while_held() {
                let l = $lock::new(1u8);
                let g1 = l.try_lock();
                assert!(g1.is_some());
                assert!(l.is_locked());
                assert!(l.try_lock().is_none());
                drop(g1);
                assert!(l.try_lock().is_some());
            }

            #[test]
            fn with_lock_unlocks() {
                let l = $lock::new(String::from("a"));
                let len = l.with_lock(|s| {
                    s.push('b');
                    s.len()
                });
                assert_eq!(len, 2);
                assert_eq!(l.with_lock(|s| s.clone()), "ab");
            }

            #[test]
            fn get_mut_and_into_inner() {
                let mut l = $lock::new(vec![1, 2, 3]);
                l.get_mut().push(4);
                assert_eq!(l.into_inner(), vec![1, 2, 3, 4]);
            }

            #[test]
            fn lock_is_released_on_panic() {
                let l = $lock::new(0u32);
                let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
                    l.with_lock(|v| {
                        *v = 123;
                        panic!("boom");
                    });
                }));
                assert!(res.is_err());
                assert_eq!(l.with_lock(|v| *v), 123);
            }

            #[test]
            fn contended_increments_are_exact_and_exclusive() {
                let threads = 8;
                let iters = 5_000;

                let lock = Arc::new($lock::new(0usize));
                let in_cs = Arc::new(AtomicUsize::new(0));
                let start = Arc::new(Barrier::new(threads));

                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let lock = Arc::clone(&lock);
                        let in_cs = Arc::clone(&in_cs);
                        let start = Arc::clone(&start);
                        thread::spawn(move || {
                            start.wait();
                            for _ in 0..iters {
                                lock.with_lock(|v| {
                                    let prev = in_cs.fetch_add(1, Ordering::SeqCst);
                                    assert_eq!(prev, 0, "mutual exclusion violated");
                                    *v += 1;
                                    in_cs.fetch_sub(1, Ordering::SeqCst);
                                });
                                thread::yield_now();
                            }
                        })
                    })
                    .collect();

                for h in handles {
                    h.join().unwrap();
                }

                assert_eq!(lock.with_lock(|v| *v), threads * iters);
                assert_eq!(in_cs.load(Ordering::SeqCst), 0);
            }
        }
    };
}

lock_suite!(spin, SpinLock);
lock_suite!(ticket, TicketLock);

#[test]
fn ticket_queue_len_tracks_holder() {
    let l = TicketLock::new(());
    assert_eq!(l.raw().queue_len(), 0);
    let g = l.lock();
    assert_eq!(l.raw().queue_len(), 1);
    drop(g);
    assert_eq!(l.raw().queue_len(), 0);
}

#[test]
fn locks_are_sync_for_send_data() {
    fn takes_sync<S: Sync>(_s: &S) {}
    takes_sync(&SpinLock::new(0u8));
    takes_sync(&TicketLock::new(Vec::<u8>::new()));
}
