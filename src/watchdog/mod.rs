//! Single-shot cancellable timers.
//!
//! [`WatchdogTimer::schedule`] starts a dedicated timer thread that sleeps on a
//! condition variable until either the delay elapses or the returned
//! [`WatchdogHandle`] is cancelled. A callback fires at most once and is never
//! rescheduled. Dropping the handle cancels the timer.
//!
//! Cancellation only guarantees that a timer which has not yet woken up will
//! not run its callback. A callback that already woke up may still be running;
//! owners that need a strict answer compare the [`WatchdogToken`] passed to the
//! callback against the handle they currently hold, under their own lock.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// Identity of one scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchdogToken(pub u64);

impl fmt::Display for WatchdogToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wd#{}", self.0)
    }
}

#[derive(Default)]
struct CancelSignal {
    cancelled: Mutex<bool>,
    cvar: Condvar,
}

impl CancelSignal {
    fn cancel(&self) -> bool {
        let mut guard = match self.cancelled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let first = !*guard;
        *guard = true;
        drop(guard);
        self.cvar.notify_all();
        first
    }

    fn is_cancelled(&self) -> bool {
        match self.cancelled.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Block until `delay` elapses or the signal is cancelled. Returns `true`
    /// when the delay elapsed without cancellation.
    fn wait(&self, delay: Duration) -> bool {
        let guard = match self.cancelled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (guard, _) = match self.cvar.wait_timeout_while(guard, delay, |cancelled| !*cancelled) {
            Ok(result) => result,
            Err(poisoned) => poisoned.into_inner(),
        };
        !*guard
    }
}

/// Exclusive handle on one scheduled callback.
pub struct WatchdogHandle {
    token: WatchdogToken,
    delay: Duration,
    signal: Arc<CancelSignal>,
}

impl WatchdogHandle {
    pub fn token(&self) -> WatchdogToken {
        self.token
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Cancel the timer. Returns `false` if it was already cancelled.
    pub fn cancel(&self) -> bool {
        self.signal.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.signal.cancel();
    }
}

impl fmt::Debug for WatchdogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchdogHandle")
            .field("token", &self.token)
            .field("delay", &self.delay)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Factory for watchdog timers. Clones share the token sequence.
#[derive(Clone)]
pub struct WatchdogTimer {
    next_token: Arc<AtomicU64>,
    thread_name: String,
}

impl Default for WatchdogTimer {
    fn default() -> Self {
        Self::new("ams-watchdog")
    }
}

impl WatchdogTimer {
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            next_token: Arc::new(AtomicU64::new(1)),
            thread_name: thread_name.into(),
        }
    }

    /// Run `callback` once after `delay` unless the returned handle is
    /// cancelled or dropped first.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> io::Result<WatchdogHandle>
    where
        F: FnOnce(WatchdogToken) + Send + 'static,
    {
        let token = WatchdogToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let signal = Arc::new(CancelSignal::default());
        let thread_signal = Arc::clone(&signal);

        thread::Builder::new()
            .name(format!("{}-{}", self.thread_name, token.0))
            .spawn(move || {
                if thread_signal.wait(delay) {
                    callback(token);
                }
            })?;

        Ok(WatchdogHandle {
            token,
            delay,
            signal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Instant;

    #[test]
    fn fires_once_after_delay() {
        let timer = WatchdogTimer::default();
        let (tx, rx) = mpsc::channel();
        let started = Instant::now();
        let handle = timer
            .schedule(Duration::from_millis(30), move |token| {
                tx.send(token).unwrap();
            })
            .unwrap();

        let fired = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(fired, handle.token());
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let timer = WatchdogTimer::default();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let handle = timer
            .schedule(Duration::from_millis(40), move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(handle.cancel());
        assert!(!handle.cancel());
        thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropping_handle_cancels() {
        let timer = WatchdogTimer::default();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        drop(
            timer
                .schedule(Duration::from_millis(30), move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap(),
        );
        thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tokens_are_unique() {
        let timer = WatchdogTimer::default();
        let clone = timer.clone();
        let a = timer.schedule(Duration::from_secs(60), |_| {}).unwrap();
        let b = clone.schedule(Duration::from_secs(60), |_| {}).unwrap();
        assert_ne!(a.token(), b.token());
    }
}
