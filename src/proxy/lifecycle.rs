//! Requests, notification intake and the destroy/pause watchdog.
//!
//! Requests never record a new state on their own: they hand a message to the
//! application's event queue and wait for the application to report back
//! through one of the `confirm_*` methods. The exceptions are the isolation
//! level operations (suspend, resume, forced termination), which act on the
//! context directly because a suspended or killed context cannot confirm
//! anything.
//!
//! Confirmation and watchdog expiry race on the proxy mutex. Whoever takes it
//! first wins: a confirmation disarms the watchdog, and an expiring timer whose
//! token no longer matches the armed handle does nothing. If the timer wins the
//! proxy is `Destroyed` and later confirmations are ignored.

use std::time::Duration;

use super::{AppProxy, ArmedWatchdog, ProxyInner, ProxyState, TerminationCause, WatchdogPurpose};
use crate::logging::{LogLevel, WATCHDOG_TARGET, json_kv, json_str};
use crate::metrics::RequestKind;
use crate::watchdog::WatchdogToken;

impl AppProxy {
    /// Ask the application to become active.
    ///
    /// A suspended context is resumed locally instead. If the application
    /// never finished starting it is recorded as paused until it confirms
    /// activation. Returns `true` when only such a resume happened.
    pub fn request_activate(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            ProxyState::Destroyed | ProxyState::Active => false,
            ProxyState::Suspended => {
                if !self.resume_locked(&mut inner) {
                    return false;
                }
                if inner.was_not_active {
                    inner.state = ProxyState::Paused;
                }
                let state = inner.state;
                drop(inner);
                self.log(
                    LogLevel::Debug,
                    "activate_resumed_context",
                    [json_str("state", state.as_str())],
                );
                true
            }
            ProxyState::Paused => {
                self.services()
                    .events
                    .send_activate(self.context_id(), self.class_name());
                drop(inner);
                self.services()
                    .record(|m| m.record_request(RequestKind::Activate));
                self.log(LogLevel::Debug, "activate_requested", std::iter::empty());
                false
            }
        }
    }

    /// Ask the application to pause, arming a watchdog bounded by `timeout`
    /// (zero selects the configured default).
    ///
    /// Placeholders and the management context are never paused. An
    /// application that has not finished starting is suspended at the
    /// isolation level instead; that path returns `true`.
    pub fn request_pause(&self, timeout: Duration) -> bool {
        if self.is_placeholder() {
            return false;
        }
        if self.services().config.is_protected_context(self.context_id()) {
            self.log(LogLevel::Debug, "pause_skipped_management_context", std::iter::empty());
            return false;
        }

        let mut inner = self.lock();
        if inner.state == ProxyState::Destroyed {
            return false;
        }
        if inner.was_not_active {
            // Before startup completes a suspended context counts as paused.
            let suspended = inner.state == ProxyState::Suspended || self.suspend_locked(&mut inner);
            drop(inner);
            if suspended {
                self.log(LogLevel::Debug, "pause_degraded_to_suspend", std::iter::empty());
            }
            return suspended;
        }
        if matches!(inner.state, ProxyState::Paused | ProxyState::Suspended) {
            return false;
        }

        self.services()
            .events
            .send_pause(self.context_id(), self.class_name());
        let armed = if inner.watchdog.is_none() {
            self.arm_locked(&mut inner, WatchdogPurpose::Pause, timeout)
        } else {
            None
        };
        drop(inner);

        self.services().record(|m| m.record_request(RequestKind::Pause));
        self.log(
            LogLevel::Debug,
            "pause_requested",
            [json_kv("watchdog_ms", armed.map(|d| d.as_millis() as u64))],
        );
        false
    }

    /// Ask the application to destroy itself, bounded by `timeout` (zero
    /// selects the configured default).
    ///
    /// Ignored while a destroy watchdog is outstanding, so repeated requests
    /// neither resend the message nor extend the deadline. An outstanding
    /// pause watchdog is replaced. Returns whether a destroy message was sent.
    pub fn request_destroy(&self, timeout: Duration) -> bool {
        let mut inner = self.lock();
        if inner.state == ProxyState::Destroyed {
            return false;
        }
        if matches!(
            inner.watchdog.as_ref().map(|armed| armed.purpose),
            Some(WatchdogPurpose::Destroy)
        ) {
            drop(inner);
            self.log(LogLevel::Debug, "destroy_already_pending", std::iter::empty());
            return false;
        }

        let armed = self.arm_locked(&mut inner, WatchdogPurpose::Destroy, timeout);
        self.services()
            .events
            .send_destroy(self.context_id(), self.class_name());
        drop(inner);

        self.services()
            .record(|m| m.record_request(RequestKind::Destroy));
        self.log(
            LogLevel::Info,
            "destroy_requested",
            [json_kv("watchdog_ms", armed.map(|d| d.as_millis() as u64))],
        );
        true
    }

    /// Suspend the context directly. Returns `true` when it was suspended.
    pub fn request_suspend(&self) -> bool {
        let mut inner = self.lock();
        self.suspend_locked(&mut inner)
    }

    /// Resume the context directly. Returns `true` when it was resumed.
    pub fn request_resume(&self) -> bool {
        let mut inner = self.lock();
        self.resume_locked(&mut inner)
    }

    /// Kill the context unless it is paused or already destroyed, without
    /// waiting for cooperation. Returns `true` when a termination was issued.
    pub fn terminate_if_not_paused(&self) -> bool {
        let terminated = {
            let mut inner = self.lock();
            if matches!(inner.state, ProxyState::Destroyed | ProxyState::Paused) {
                false
            } else {
                self.force_terminate_locked(&mut inner);
                true
            }
        };
        if terminated {
            self.after_forced_termination(TerminationCause::Requested);
        }
        terminated
    }

    /// The application reported that it was destroyed.
    pub fn confirm_destroyed(&self) -> bool {
        self.confirm(ProxyState::Destroyed)
    }

    /// The application reported that it paused.
    pub fn confirm_paused(&self) -> bool {
        self.confirm(ProxyState::Paused)
    }

    /// The application reported that it is active; it has now completed
    /// startup.
    pub fn confirm_active(&self) -> bool {
        self.confirm(ProxyState::Active)
    }

    /// Cancel the outstanding watchdog, if any.
    pub fn disarm_watchdog(&self) -> bool {
        let mut inner = self.lock();
        self.disarm_locked(&mut inner)
    }

    fn confirm(&self, state: ProxyState) -> bool {
        let mut inner = self.lock();
        if inner.state == ProxyState::Destroyed {
            drop(inner);
            self.services().record(|m| m.record_confirmation(false));
            self.log(
                LogLevel::Debug,
                "confirmation_ignored",
                [json_str("reported", state.as_str())],
            );
            return false;
        }

        if state != ProxyState::Active {
            self.disarm_locked(&mut inner);
        }
        let previous = inner.state;
        inner.state = state;
        if state == ProxyState::Active {
            inner.was_not_active = false;
        }
        drop(inner);

        self.services().record(|m| m.record_confirmation(true));
        self.log(
            LogLevel::Debug,
            "state_confirmed",
            [
                json_str("from", previous.as_str()),
                json_str("to", state.as_str()),
            ],
        );
        true
    }

    fn suspend_locked(&self, inner: &mut ProxyInner) -> bool {
        if matches!(inner.state, ProxyState::Destroyed | ProxyState::Suspended) {
            return false;
        }
        if !self.services().isolation.suspend(self.context_id()) {
            self.log(LogLevel::Warn, "suspend_refused", std::iter::empty());
            return false;
        }
        inner.state = ProxyState::Suspended;
        self.services()
            .record(|m| m.record_request(RequestKind::Suspend));
        true
    }

    fn resume_locked(&self, inner: &mut ProxyInner) -> bool {
        if matches!(inner.state, ProxyState::Destroyed | ProxyState::Active) {
            return false;
        }
        if !self.services().isolation.resume(self.context_id()) {
            self.log(LogLevel::Warn, "resume_refused", std::iter::empty());
            return false;
        }
        inner.state = ProxyState::Active;
        self.services()
            .record(|m| m.record_request(RequestKind::Resume));
        true
    }

    /// Arm a watchdog, replacing (and cancelling) any previous one. Returns
    /// the delay used, or `None` if no timer thread could be started.
    fn arm_locked(
        &self,
        inner: &mut ProxyInner,
        purpose: WatchdogPurpose,
        timeout: Duration,
    ) -> Option<Duration> {
        let delay = self.services().config.resolve_timeout(timeout);
        let me = self.me.clone();
        let scheduled = self.services().timer.schedule(delay, move |token| {
            if let Some(proxy) = me.upgrade() {
                proxy.watchdog_expired(token);
            }
        });

        match scheduled {
            Ok(handle) => {
                if let Some(previous) = inner.watchdog.replace(ArmedWatchdog { handle, purpose }) {
                    previous.handle.cancel();
                    self.services().record(|m| m.record_watchdog_cancelled());
                }
                self.services().record(|m| m.record_watchdog_armed());
                Some(delay)
            }
            Err(err) => {
                self.log_to(
                    WATCHDOG_TARGET,
                    LogLevel::Error,
                    "watchdog_spawn_failed",
                    [json_str("error", err.to_string())],
                );
                None
            }
        }
    }

    fn disarm_locked(&self, inner: &mut ProxyInner) -> bool {
        match inner.watchdog.take() {
            Some(armed) => {
                armed.handle.cancel();
                self.services().record(|m| m.record_watchdog_cancelled());
                true
            }
            None => false,
        }
    }

    fn force_terminate_locked(&self, inner: &mut ProxyInner) {
        self.disarm_locked(inner);
        self.services().isolation.terminate(self.context_id());
        inner.state = ProxyState::Destroyed;
    }

    /// Timer callback. Only acts if `token` still names the armed watchdog.
    pub(crate) fn watchdog_expired(&self, token: WatchdogToken) {
        let outcome = {
            let mut inner = self.lock();
            let current = inner.watchdog.as_ref().map(|armed| armed.handle.token());
            if current != Some(token) {
                None
            } else {
                let purpose = inner
                    .watchdog
                    .take()
                    .map(|armed| armed.purpose)
                    .unwrap_or(WatchdogPurpose::Destroy);
                let spare = match (purpose, inner.state) {
                    (_, ProxyState::Destroyed) => true,
                    (WatchdogPurpose::Pause, ProxyState::Paused) => true,
                    _ => false,
                };
                if !spare {
                    self.force_terminate_locked(&mut inner);
                }
                Some((purpose, spare))
            }
        };

        let Some((purpose, spare)) = outcome else {
            self.log_to(
                WATCHDOG_TARGET,
                LogLevel::Debug,
                "stale_watchdog_ignored",
                [json_str("token", token.to_string())],
            );
            return;
        };

        self.services().record(|m| m.record_watchdog_fired());
        let purpose_label = match purpose {
            WatchdogPurpose::Pause => "pause",
            WatchdogPurpose::Destroy => "destroy",
        };
        if spare {
            self.log_to(
                WATCHDOG_TARGET,
                LogLevel::Debug,
                "watchdog_expired_nothing_to_do",
                [json_str("purpose", purpose_label)],
            );
            return;
        }
        self.log_to(
            WATCHDOG_TARGET,
            LogLevel::Warn,
            "watchdog_expired",
            [json_str("purpose", purpose_label)],
        );
        self.after_forced_termination(TerminationCause::WatchdogExpired(purpose));
    }

    fn after_forced_termination(&self, cause: TerminationCause) {
        self.services().record(|m| m.record_forced_termination());
        let cause_label = match cause {
            TerminationCause::Requested => "requested",
            TerminationCause::WatchdogExpired(WatchdogPurpose::Pause) => "pause_timeout",
            TerminationCause::WatchdogExpired(WatchdogPurpose::Destroy) => "destroy_timeout",
        };
        self.log(
            LogLevel::Warn,
            "context_terminated",
            [
                json_str("cause", cause_label),
                json_str("class_name", self.class_name().unwrap_or_default()),
            ],
        );

        if let (Some(parent), Some(me)) = (self.parent(), self.me.upgrade()) {
            parent.proxy_terminated(&me, cause);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::super::fixtures::{Harness, wait_until};
    use super::super::{ContextId, LaunchSpec, SuiteId};
    use super::*;
    use crate::config::ManagerConfig;
    use crate::isolation::recording::IsolationCall;

    const SHORT: Duration = Duration::from_millis(40);
    const LONG: Duration = Duration::from_secs(30);
    const PATIENCE: Duration = Duration::from_secs(3);

    #[test]
    fn destroyed_is_terminal() {
        let harness = Harness::new();
        let proxy = harness.started(1, "Clock");
        assert!(proxy.confirm_destroyed());

        assert!(!proxy.confirm_active());
        assert!(!proxy.confirm_paused());
        assert!(!proxy.request_activate());
        assert!(!proxy.request_pause(LONG));
        assert!(!proxy.request_destroy(LONG));
        assert!(!proxy.request_suspend());
        assert!(!proxy.request_resume());
        assert!(!proxy.terminate_if_not_paused());
        assert_eq!(proxy.state(), ProxyState::Destroyed);
        assert!(harness.isolation.calls().is_empty());
    }

    #[test]
    fn activate_paused_sends_event_without_changing_state() {
        let harness = Harness::new();
        let proxy = harness.started(1, "Clock");
        assert!(proxy.confirm_paused());

        assert!(!proxy.request_activate());
        assert_eq!(proxy.state(), ProxyState::Paused);
        assert_eq!(harness.events.count("activate", ContextId(1)), 1);

        assert!(proxy.confirm_active());
        assert_eq!(proxy.state(), ProxyState::Active);
    }

    #[test]
    fn activate_active_is_noop() {
        let harness = Harness::new();
        let proxy = harness.started(1, "Clock");
        assert!(!proxy.request_activate());
        assert_eq!(harness.events.count("activate", ContextId(1)), 0);
    }

    #[test]
    fn suspended_startup_resumes_into_paused() {
        let harness = Harness::new();
        let proxy = harness.spawn(
            LaunchSpec::new(ContextId(6), SuiteId(1), "Game")
                .with_initial_state(ProxyState::Suspended),
        );
        assert!(proxy.was_not_active());

        assert!(proxy.request_activate());
        assert_eq!(proxy.state(), ProxyState::Paused);
        assert!(proxy.was_not_active());
        assert_eq!(harness.isolation.count(IsolationCall::Resume(ContextId(6))), 1);
        assert_eq!(harness.events.count("activate", ContextId(6)), 0);

        assert!(proxy.confirm_active());
        assert_eq!(proxy.state(), ProxyState::Active);
        assert!(!proxy.was_not_active());
    }

    #[test]
    fn suspended_after_startup_resumes_into_active() {
        let harness = Harness::new();
        let proxy = harness.started(2, "Game");
        assert!(proxy.request_suspend());
        assert_eq!(proxy.state(), ProxyState::Suspended);

        assert!(proxy.request_activate());
        assert_eq!(proxy.state(), ProxyState::Active);
    }

    #[test]
    fn refused_resume_leaves_state() {
        let harness = Harness::new();
        let proxy = harness.started(2, "Game");
        assert!(proxy.request_suspend());
        harness.isolation.refuse_resume(true);

        assert!(!proxy.request_activate());
        assert!(!proxy.request_resume());
        assert_eq!(proxy.state(), ProxyState::Suspended);
    }

    #[test]
    fn refused_suspend_leaves_state() {
        let harness = Harness::new();
        let proxy = harness.started(2, "Game");
        harness.isolation.refuse_suspend(true);
        assert!(!proxy.request_suspend());
        assert_eq!(proxy.state(), ProxyState::Active);
        assert!(harness.isolation.calls().is_empty());
    }

    #[test]
    fn suspend_twice_calls_isolation_once() {
        let harness = Harness::new();
        let proxy = harness.started(2, "Game");
        assert!(proxy.request_suspend());
        assert!(!proxy.request_suspend());
        assert_eq!(harness.isolation.count(IsolationCall::Suspend(ContextId(2))), 1);
    }

    #[test]
    fn pause_before_startup_suspends_without_watchdog() {
        let harness = Harness::new();
        let proxy = harness.spawn(LaunchSpec::new(ContextId(3), SuiteId(1), "Game"));

        assert!(proxy.request_pause(SHORT));
        assert_eq!(proxy.state(), ProxyState::Suspended);
        assert!(!proxy.has_watchdog());
        assert_eq!(harness.events.count("pause", ContextId(3)), 0);
    }

    #[test]
    fn pause_before_startup_accepts_already_suspended_context() {
        let harness = Harness::new();
        let proxy = harness.spawn(
            LaunchSpec::new(ContextId(3), SuiteId(1), "Game")
                .with_initial_state(ProxyState::Suspended),
        );

        assert!(proxy.request_pause(SHORT));
        assert_eq!(proxy.state(), ProxyState::Suspended);
        assert!(harness.isolation.calls().is_empty());
        assert!(!proxy.has_watchdog());
    }

    #[test]
    fn pause_sends_event_and_arms_watchdog_once() {
        let harness = Harness::new();
        let proxy = harness.started(3, "Game");

        assert!(!proxy.request_pause(LONG));
        assert_eq!(proxy.watchdog(), Some(WatchdogPurpose::Pause));
        assert_eq!(proxy.state(), ProxyState::Active);
        assert!(!proxy.request_pause(LONG));
        assert_eq!(harness.events.count("pause", ContextId(3)), 2);
        assert_eq!(harness.services.metrics.lock().unwrap().snapshot(Duration::ZERO).watchdogs_armed, 1);

        assert!(proxy.confirm_paused());
        assert!(!proxy.has_watchdog());
        assert!(!proxy.request_pause(LONG));
        assert_eq!(harness.events.count("pause", ContextId(3)), 2);
    }

    #[test]
    fn placeholder_is_never_paused() {
        let harness = Harness::new();
        let proxy = harness.spawn(LaunchSpec::placeholder(ContextId(0), "Alert"));
        proxy.confirm_active();
        assert!(!proxy.request_pause(LONG));
        assert!(!proxy.has_watchdog());
        assert!(harness.events.delivered().is_empty());
    }

    #[test]
    fn management_context_is_not_paused_unless_under_test() {
        let harness = Harness::with_config(ManagerConfig::default().with_ams_context(ContextId(0)));
        let ams = harness.started(0, "Manager");
        assert!(!ams.request_pause(LONG));
        assert_eq!(harness.events.count("pause", ContextId(0)), 0);

        let harness = Harness::with_config(
            ManagerConfig::default()
                .with_ams_context(ContextId(0))
                .with_running_under_test(true),
        );
        let ams = harness.started(0, "Manager");
        ams.request_pause(LONG);
        assert_eq!(harness.events.count("pause", ContextId(0)), 1);
        ams.confirm_paused();
    }

    #[test]
    fn duplicate_destroy_is_ignored() {
        let harness = Harness::new();
        let proxy = harness.started(4, "Game");

        assert!(proxy.request_destroy(LONG));
        let first = proxy.lock().watchdog.as_ref().map(|a| a.handle.token());
        assert!(!proxy.request_destroy(LONG));
        let second = proxy.lock().watchdog.as_ref().map(|a| a.handle.token());

        assert_eq!(first, second);
        assert_eq!(harness.events.count("destroy", ContextId(4)), 1);
        proxy.confirm_destroyed();
    }

    #[test]
    fn destroy_replaces_pause_watchdog() {
        let harness = Harness::new();
        let proxy = harness.started(4, "Game");
        proxy.request_pause(LONG);
        assert!(proxy.request_destroy(LONG));
        assert_eq!(proxy.watchdog(), Some(WatchdogPurpose::Destroy));
        proxy.confirm_destroyed();
        assert!(!proxy.has_watchdog());
    }

    #[test]
    fn confirmation_before_expiry_prevents_termination() {
        let harness = Harness::new();
        let proxy = harness.started(5, "Game");

        proxy.request_destroy(Duration::from_millis(60));
        assert!(proxy.confirm_destroyed());
        assert!(!proxy.has_watchdog());

        thread::sleep(Duration::from_millis(200));
        assert_eq!(harness.isolation.terminations(ContextId(5)), 0);
        assert!(harness.terminations().is_empty());
        assert_eq!(proxy.state(), ProxyState::Destroyed);
    }

    #[test]
    fn unanswered_destroy_terminates_exactly_once() {
        let harness = Harness::new();
        let proxy = harness.started(5, "Game");

        proxy.request_destroy(SHORT);
        assert!(wait_until(PATIENCE, || proxy.is_destroyed()));
        thread::sleep(Duration::from_millis(100));

        assert_eq!(harness.isolation.terminations(ContextId(5)), 1);
        assert_eq!(
            harness.terminations(),
            vec![(
                proxy.id(),
                TerminationCause::WatchdogExpired(WatchdogPurpose::Destroy)
            )]
        );
        assert!(!proxy.has_watchdog());
        assert_eq!(harness.sink.count("context_terminated"), 1);

        let expired: Vec<_> = harness
            .sink
            .events()
            .into_iter()
            .filter(|e| e.message == "watchdog_expired")
            .collect();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].target, WATCHDOG_TARGET);
        assert_eq!(expired[0].field("purpose"), Some(&serde_json::json!("destroy")));
    }

    #[test]
    fn unanswered_pause_terminates() {
        let harness = Harness::new();
        let proxy = harness.started(6, "Game");

        proxy.request_pause(SHORT);
        assert!(wait_until(PATIENCE, || proxy.is_destroyed()));
        assert_eq!(harness.isolation.terminations(ContextId(6)), 1);
    }

    #[test]
    fn late_confirmation_after_forced_termination_is_noop() {
        let harness = Harness::new();
        let proxy = harness.started(7, "Game");

        proxy.request_destroy(SHORT);
        assert!(wait_until(PATIENCE, || proxy.is_destroyed()));

        assert!(!proxy.confirm_destroyed());
        assert_eq!(proxy.state(), ProxyState::Destroyed);
        assert_eq!(harness.sink.count("confirmation_ignored"), 1);
        let snap = harness.services.metrics.lock().unwrap().snapshot(Duration::ZERO);
        assert_eq!(snap.ignored_confirmations, 1);
        assert_eq!(snap.forced_terminations, 1);
    }

    #[test]
    fn confirmation_winning_the_race_disables_the_timer() {
        let harness = Harness::new();
        let proxy = harness.started(8, "Game");
        proxy.request_destroy(LONG);
        let token = proxy.lock().watchdog.as_ref().unwrap().handle.token();

        // Confirmation takes the lock first; the timer firing afterwards
        // carries a token that no longer matches.
        assert!(proxy.confirm_destroyed());
        proxy.watchdog_expired(token);

        assert_eq!(harness.isolation.terminations(ContextId(8)), 0);
        assert!(harness.terminations().is_empty());
        assert_eq!(harness.sink.count("stale_watchdog_ignored"), 1);
        assert!(harness
            .sink
            .events()
            .iter()
            .any(|e| e.message == "stale_watchdog_ignored" && e.target == WATCHDOG_TARGET));
    }

    #[test]
    fn timer_winning_the_race_ignores_confirmation() {
        let harness = Harness::new();
        let proxy = harness.started(9, "Game");
        proxy.request_destroy(LONG);
        let token = proxy.lock().watchdog.as_ref().unwrap().handle.token();

        proxy.watchdog_expired(token);
        assert!(!proxy.confirm_destroyed());

        assert_eq!(harness.isolation.terminations(ContextId(9)), 1);
        assert_eq!(proxy.state(), ProxyState::Destroyed);
    }

    #[test]
    fn pause_watchdog_spares_paused_application() {
        let harness = Harness::new();
        let proxy = harness.started(10, "Game");
        proxy.request_pause(LONG);
        let token = proxy.lock().watchdog.as_ref().unwrap().handle.token();

        // Paused state recorded without going through confirmation, as a
        // stand-in for a confirmation that raced the timer on another path.
        proxy.lock().state = ProxyState::Paused;
        proxy.watchdog_expired(token);

        assert_eq!(proxy.state(), ProxyState::Paused);
        assert_eq!(harness.isolation.terminations(ContextId(10)), 0);
    }

    #[test]
    fn terminate_if_not_paused_spares_paused() {
        let harness = Harness::new();
        let proxy = harness.started(11, "Game");
        proxy.confirm_paused();
        assert!(!proxy.terminate_if_not_paused());
        assert_eq!(proxy.state(), ProxyState::Paused);

        proxy.confirm_active();
        proxy.request_destroy(LONG);
        assert!(proxy.terminate_if_not_paused());
        assert_eq!(proxy.state(), ProxyState::Destroyed);
        assert!(!proxy.has_watchdog());
        assert_eq!(
            harness.terminations(),
            vec![(proxy.id(), TerminationCause::Requested)]
        );
    }

    #[test]
    fn zero_timeout_uses_configured_default() {
        let harness = Harness::with_config(
            ManagerConfig::default().with_destroy_timeout(Duration::from_millis(50)),
        );
        let proxy = harness.started(12, "Game");
        proxy.request_destroy(Duration::ZERO);
        assert_eq!(
            proxy.lock().watchdog.as_ref().map(|a| a.handle.delay()),
            Some(Duration::from_millis(50))
        );
        assert!(wait_until(PATIENCE, || proxy.is_destroyed()));
    }

    #[test]
    fn concurrent_confirmations_and_expiry_agree_on_destroyed() {
        for round in 0..20u32 {
            let harness = Harness::new();
            let proxy = harness.started(100 + round, "Game");
            proxy.request_destroy(Duration::from_millis(5));
            let confirmer = {
                let proxy = proxy.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(5));
                    proxy.confirm_destroyed()
                })
            };
            let confirmed = confirmer.join().unwrap();
            assert!(wait_until(PATIENCE, || proxy.is_destroyed()));
            thread::sleep(Duration::from_millis(20));

            let killed = harness.isolation.terminations(ContextId(100 + round));
            assert_eq!(confirmed as usize + killed, 1, "round {round}");
            assert!(!proxy.has_watchdog());
        }
    }
}
