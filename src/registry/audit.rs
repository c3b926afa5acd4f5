//! Registry audit hooks.
//!
//! Records capture a stage identifier plus structured metadata so callers can
//! log, buffer, or forward the life of every proxy without hooking into the
//! registry internals.

use std::sync::Mutex;
use std::time::SystemTime;

use serde_json::Value;

use crate::proxy::ProxyId;

/// Checkpoints emitted by `ProxyRegistry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryAuditStage {
    /// A registry instance was constructed.
    RegistryConstructed,
    /// A proxy was created for a newly launched application.
    ProxyAdded,
    /// A destroyed proxy left the registry.
    ProxyRemoved,
    /// The display moved to another proxy, or to nobody.
    ForegroundChanged,
    /// A proxy started displaying over the foreground owner.
    PreemptionStarted,
    /// A preemption ended and the preempted proxy was restored.
    PreemptionEnded,
    /// A destroy or pause watchdog expired before the application answered.
    WatchdogExpired,
    /// A context was killed without its cooperation.
    ForcedTermination,
}

#[derive(Debug, Clone)]
pub struct RegistryAuditEvent {
    pub timestamp: SystemTime,
    pub stage: RegistryAuditStage,
    pub proxy: Option<ProxyId>,
    pub details: Vec<(String, Value)>,
}

impl RegistryAuditEvent {
    fn new(stage: RegistryAuditStage) -> Self {
        Self {
            timestamp: SystemTime::now(),
            stage,
            proxy: None,
            details: Vec::new(),
        }
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value)
    }
}

/// Builder helper to append fields ergonomically.
pub struct RegistryAuditEventBuilder {
    event: RegistryAuditEvent,
}

impl RegistryAuditEventBuilder {
    pub fn new(stage: RegistryAuditStage) -> Self {
        Self {
            event: RegistryAuditEvent::new(stage),
        }
    }

    pub fn proxy(&mut self, id: ProxyId) -> &mut Self {
        self.event.proxy = Some(id);
        self
    }

    pub fn detail(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.event.details.push((key.into(), value));
        self
    }

    pub fn finish(self) -> RegistryAuditEvent {
        self.event
    }
}

/// Trait implemented by any audit sink.
pub trait RegistryAudit: Send + Sync {
    fn record(&self, event: RegistryAuditEvent);
}

/// Default no-op implementation used when auditing is disabled.
#[derive(Debug, Default)]
pub struct NullRegistryAudit;

impl RegistryAudit for NullRegistryAudit {
    fn record(&self, _event: RegistryAuditEvent) {}
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct BufferedRegistryAudit {
    events: Mutex<Vec<RegistryAuditEvent>>,
}

impl BufferedRegistryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RegistryAuditEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn stages(&self) -> Vec<RegistryAuditStage> {
        self.events().into_iter().map(|e| e.stage).collect()
    }

    pub fn count(&self, stage: RegistryAuditStage) -> usize {
        self.events().iter().filter(|e| e.stage == stage).count()
    }
}

impl RegistryAudit for BufferedRegistryAudit {
    fn record(&self, event: RegistryAuditEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_collects_details() {
        let mut builder = RegistryAuditEventBuilder::new(RegistryAuditStage::ForegroundChanged);
        builder
            .proxy(ProxyId(3))
            .detail("from", json!(1))
            .detail("to", json!(3));
        let event = builder.finish();
        assert_eq!(event.proxy, Some(ProxyId(3)));
        assert_eq!(event.detail("to"), Some(&json!(3)));
        assert!(event.detail("missing").is_none());
    }

    #[test]
    fn buffered_audit_counts_stages() {
        let audit = BufferedRegistryAudit::new();
        audit.record(RegistryAuditEventBuilder::new(RegistryAuditStage::ProxyAdded).finish());
        audit.record(RegistryAuditEventBuilder::new(RegistryAuditStage::ProxyAdded).finish());
        audit.record(RegistryAuditEventBuilder::new(RegistryAuditStage::ProxyRemoved).finish());
        assert_eq!(audit.count(RegistryAuditStage::ProxyAdded), 2);
        assert_eq!(
            audit.stages().last(),
            Some(&RegistryAuditStage::ProxyRemoved)
        );
    }
}
