use crate::logging::{LogEvent, LogFields, LogLevel};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

/// Request kinds counted by [`LifecycleMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Activate,
    Pause,
    Destroy,
    Suspend,
    Resume,
}

#[derive(Debug, Default, Clone)]
pub struct LifecycleMetrics {
    activate_requests: u64,
    pause_requests: u64,
    destroy_requests: u64,
    suspends: u64,
    resumes: u64,
    confirmations: u64,
    ignored_confirmations: u64,
    watchdogs_armed: u64,
    watchdogs_cancelled: u64,
    watchdogs_fired: u64,
    forced_terminations: u64,
    foreground_changes: u64,
}

impl LifecycleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&mut self, kind: RequestKind) {
        let counter = match kind {
            RequestKind::Activate => &mut self.activate_requests,
            RequestKind::Pause => &mut self.pause_requests,
            RequestKind::Destroy => &mut self.destroy_requests,
            RequestKind::Suspend => &mut self.suspends,
            RequestKind::Resume => &mut self.resumes,
        };
        *counter = counter.saturating_add(1);
    }

    pub fn record_confirmation(&mut self, applied: bool) {
        if applied {
            self.confirmations = self.confirmations.saturating_add(1);
        } else {
            self.ignored_confirmations = self.ignored_confirmations.saturating_add(1);
        }
    }

    pub fn record_watchdog_armed(&mut self) {
        self.watchdogs_armed = self.watchdogs_armed.saturating_add(1);
    }

    pub fn record_watchdog_cancelled(&mut self) {
        self.watchdogs_cancelled = self.watchdogs_cancelled.saturating_add(1);
    }

    pub fn record_watchdog_fired(&mut self) {
        self.watchdogs_fired = self.watchdogs_fired.saturating_add(1);
    }

    pub fn record_forced_termination(&mut self) {
        self.forced_terminations = self.forced_terminations.saturating_add(1);
    }

    pub fn record_foreground_change(&mut self) {
        self.foreground_changes = self.foreground_changes.saturating_add(1);
    }

    pub fn snapshot(&self, uptime: Duration) -> MetricSnapshot {
        MetricSnapshot {
            uptime_ms: uptime.as_millis() as u64,
            activate_requests: self.activate_requests,
            pause_requests: self.pause_requests,
            destroy_requests: self.destroy_requests,
            suspends: self.suspends,
            resumes: self.resumes,
            confirmations: self.confirmations,
            ignored_confirmations: self.ignored_confirmations,
            watchdogs_armed: self.watchdogs_armed,
            watchdogs_cancelled: self.watchdogs_cancelled,
            watchdogs_fired: self.watchdogs_fired,
            forced_terminations: self.forced_terminations,
            foreground_changes: self.foreground_changes,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricSnapshot {
    pub uptime_ms: u64,
    pub activate_requests: u64,
    pub pause_requests: u64,
    pub destroy_requests: u64,
    pub suspends: u64,
    pub resumes: u64,
    pub confirmations: u64,
    pub ignored_confirmations: u64,
    pub watchdogs_armed: u64,
    pub watchdogs_cancelled: u64,
    pub watchdogs_fired: u64,
    pub forced_terminations: u64,
    pub foreground_changes: u64,
}

impl MetricSnapshot {
    pub fn to_log_event(&self, target: &str) -> LogEvent {
        LogEvent::with_fields(LogLevel::Info, target, "lifecycle_metrics", self.as_fields())
    }

    pub fn as_fields(&self) -> LogFields {
        match json!(self) {
            serde_json::Value::Object(map) => map,
            _ => LogFields::new(),
        }
    }
}
