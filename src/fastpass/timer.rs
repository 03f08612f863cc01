//! Retransmission timer (C5): one-shot absolute deadline plus a deferred
//! task, reimplemented over a dedicated background thread standing in for
//! the kernel's hrtimer + tasklet pair.
//!
//! The race discipline from the source is preserved: `try_cancel` can fail
//! if the deferred task has already started running (`Firing`), and when
//! it fails the caller must not re-arm -- the running task will observe
//! the current window state and re-arm itself.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::fastpass::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Idle,
    Armed(u64),
    Firing,
    Shutdown,
}

pub struct RetransTimer {
    shared: Arc<(Mutex<TimerState>, Condvar)>,
    // `JoinHandle` is `Send` but not `Sync`; wrapping it keeps `RetransTimer`
    // (and `Session`, which embeds it) shareable across threads via `&self`.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RetransTimer {
    /// Spawns the background thread. `on_fire` runs once per expiry, with
    /// no lock held by the timer itself -- it is expected to acquire
    /// whatever lock it needs (the session's) on its own. It receives the
    /// current time and returns the next deadline to re-arm to, or `None`
    /// if there is nothing left to wait for.
    pub fn spawn<C, F>(clock: C, on_fire: F) -> Self
    where
        C: Clock + 'static,
        F: Fn(u64) -> Option<u64> + Send + 'static,
    {
        let shared = Arc::new((Mutex::new(TimerState::Idle), Condvar::new()));
        let worker_shared = shared.clone();

        let worker = thread::spawn(move || {
            let (lock, cv) = &*worker_shared;
            'outer: loop {
                let mut guard = lock.lock().unwrap();
                loop {
                    match *guard {
                        TimerState::Shutdown => break 'outer,
                        TimerState::Idle => guard = cv.wait(guard).unwrap(),
                        TimerState::Firing => unreachable!("worker is the only one that sets Firing"),
                        TimerState::Armed(deadline) => {
                            let now = clock.now_ns();
                            if now >= deadline {
                                *guard = TimerState::Firing;
                                break;
                            }
                            let (g, _) = cv.wait_timeout(guard, Duration::from_nanos(deadline - now)).unwrap();
                            guard = g;
                        }
                    }
                }
                drop(guard);

                let next_deadline = on_fire(clock.now_ns());

                let mut guard = lock.lock().unwrap();
                if *guard == TimerState::Firing {
                    *guard = match next_deadline {
                        Some(deadline) => TimerState::Armed(deadline),
                        None => TimerState::Idle,
                    };
                    cv.notify_all();
                }
            }
        });

        RetransTimer {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Arms (or re-arms) the timer for `deadline_ns`.
    pub fn arm(&self, deadline_ns: u64) {
        let (lock, cv) = &*self.shared;
        let mut guard = lock.lock().unwrap();
        if *guard != TimerState::Shutdown {
            *guard = TimerState::Armed(deadline_ns);
            cv.notify_all();
        }
    }

    /// Tries to cancel a pending timer. Returns `false` (cancel failed) if
    /// the deferred task is already running -- the caller must then leave
    /// the timer alone, per the "cancel-may-fail, task-will-re-arm" rule.
    pub fn try_cancel(&self) -> bool {
        let (lock, cv) = &*self.shared;
        let mut guard = lock.lock().unwrap();
        match *guard {
            TimerState::Firing => false,
            TimerState::Shutdown => true,
            _ => {
                *guard = TimerState::Idle;
                cv.notify_all();
                true
            }
        }
    }

    /// Signals shutdown and blocks until the worker thread exits. Must be
    /// called without holding any lock `on_fire` might need, or it can
    /// deadlock against an in-flight firing. Idempotent: a second call
    /// finds no handle left to join.
    pub fn shutdown_and_join(&self) {
        {
            let (lock, cv) = &*self.shared;
            let mut guard = lock.lock().unwrap();
            *guard = TimerState::Shutdown;
            cv.notify_all();
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RetransTimer {
    fn drop(&mut self) {
        let (lock, cv) = &*self.shared;
        let mut guard = lock.lock().unwrap();
        *guard = TimerState::Shutdown;
        cv.notify_all();
        // Deliberately not joined here: `on_fire` may need a lock the
        // dropping thread already holds. `shutdown_and_join` is the
        // synchronous variant session teardown uses.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fastpass::clock::FakeClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    #[test]
    fn fires_after_deadline_reached() {
        let clock = FakeClock::new(0);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();

        let timer = RetransTimer::spawn(clock.clone(), move |_now| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
            None
        });

        timer.arm(10);
        // worker is polling with wait_timeout against the fake clock;
        // advance the clock and give the thread a moment to observe it.
        std::thread::sleep(StdDuration::from_millis(20));
        clock.set(10);
        std::thread::sleep(StdDuration::from_millis(50));

        assert!(fired.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn cancel_before_firing_succeeds() {
        let clock = FakeClock::new(0);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let timer = RetransTimer::spawn(clock, move |_now| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
            None
        });

        timer.arm(1_000_000_000);
        assert!(timer.try_cancel());
    }
}
