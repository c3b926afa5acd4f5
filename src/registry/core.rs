use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};

use serde_json::Value;

use super::audit::{
    NullRegistryAudit, RegistryAudit, RegistryAuditEventBuilder, RegistryAuditStage,
};
use super::foreground::{ForegroundEntry, ForegroundSlot};
use crate::config::ManagerConfig;
use crate::error::{AmsError, Result};
use crate::logging::{self, LogLevel, METRICS_TARGET, REGISTRY_TARGET, json_kv, json_str};
use crate::metrics::MetricSnapshot;
use crate::proxy::{
    AppProxy, ContextId, DisplayId, ExternalId, LaunchSpec, ProxyId, ProxyParent, ProxyServices,
    ProxySnapshot, SuiteId, TerminationCause, WatchdogPurpose,
};

/// Owns every live proxy and decides which one holds the display.
///
/// Lock order is arbitration, then the proxy map, then a single proxy. Proxy
/// methods never call back into the registry while holding their own lock.
pub struct ProxyRegistry {
    services: Arc<ProxyServices>,
    proxies: RwLock<BTreeMap<ProxyId, Arc<AppProxy>>>,
    next_id: AtomicU64,
    foreground: ForegroundSlot,
    arbitration: Mutex<()>,
    audit: Arc<dyn RegistryAudit>,
    started_at: Instant,
    me: Weak<ProxyRegistry>,
}

impl ProxyRegistry {
    pub fn new(services: ProxyServices) -> Arc<Self> {
        Self::with_audit(services, Arc::new(NullRegistryAudit))
    }

    pub fn with_audit(services: ProxyServices, audit: Arc<dyn RegistryAudit>) -> Arc<Self> {
        let registry = Arc::new_cyclic(|me| Self {
            services: Arc::new(services),
            proxies: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            foreground: ForegroundSlot::new(),
            arbitration: Mutex::new(()),
            audit,
            started_at: Instant::now(),
            me: me.clone(),
        });
        let timeout_ms = registry.config().destroy_timeout.as_millis() as u64;
        registry.record_audit(
            RegistryAuditStage::RegistryConstructed,
            None,
            [json_kv("destroy_timeout_ms", timeout_ms)],
        );
        registry.log(
            LogLevel::Info,
            "registry_constructed",
            [json_kv("destroy_timeout_ms", timeout_ms)],
        );
        registry
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.services.config
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Create the proxy for a newly started application.
    ///
    /// Only one application proxy may exist per context; placeholders are
    /// exempt since several system dialogs may share the manager's context.
    pub fn launch(&self, spec: LaunchSpec) -> Result<Arc<AppProxy>> {
        let placeholder = spec.suite_id == SuiteId::UNUSED && spec.class_name.is_none();
        let context = spec.context_id;

        let mut proxies = self.write_proxies();
        let taken = !placeholder
            && proxies
                .values()
                .any(|p| !p.is_placeholder() && p.context_id() == context && !p.is_destroyed());
        if taken {
            drop(proxies);
            self.log(
                LogLevel::Warn,
                "duplicate_context_rejected",
                [json_kv("context_id", context.0)],
            );
            return Err(AmsError::DuplicateContext(context));
        }

        let id = ProxyId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let parent: Weak<dyn ProxyParent> = self.me.clone();
        let proxy = AppProxy::new(id, spec, self.services.clone(), parent);
        proxies.insert(id, proxy.clone());
        drop(proxies);

        self.log(
            LogLevel::Info,
            "proxy_added",
            [
                json_kv("proxy_id", id.0),
                json_kv("context_id", context.0),
                json_str("display_name", proxy.display_name()),
            ],
        );
        self.record_audit(
            RegistryAuditStage::ProxyAdded,
            Some(id),
            [
                json_kv("context_id", context.0),
                json_kv("placeholder", placeholder),
            ],
        );
        Ok(proxy)
    }

    pub fn get(&self, id: ProxyId) -> Result<Arc<AppProxy>> {
        self.lookup(id).ok_or(AmsError::ProxyNotFound(id))
    }

    /// Live application proxy running in `context`. Placeholders and
    /// destroyed proxies awaiting removal are never returned.
    pub fn find_by_context(&self, context: ContextId) -> Option<Arc<AppProxy>> {
        self.read_proxies()
            .values()
            .find(|p| !p.is_placeholder() && p.context_id() == context && !p.is_destroyed())
            .cloned()
    }

    pub fn context(&self, context: ContextId) -> Result<Arc<AppProxy>> {
        self.find_by_context(context)
            .ok_or(AmsError::ContextNotFound(context))
    }

    pub fn find_by_external(&self, external: ExternalId) -> Option<Arc<AppProxy>> {
        self.read_proxies()
            .values()
            .find(|p| p.external_id() == external)
            .cloned()
    }

    pub fn find_by_class(&self, suite: SuiteId, class_name: &str) -> Option<Arc<AppProxy>> {
        self.read_proxies()
            .values()
            .find(|p| p.suite_id() == suite && p.class_name() == Some(class_name))
            .cloned()
    }

    /// Live proxies in launch order.
    pub fn proxies(&self) -> Vec<Arc<AppProxy>> {
        self.read_proxies().values().cloned().collect()
    }

    pub fn snapshots(&self) -> Vec<ProxySnapshot> {
        self.proxies().iter().map(|p| p.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.read_proxies().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_proxies().is_empty()
    }

    /// The application in `context` reports it is active.
    pub fn notify_active(&self, context: ContextId) -> bool {
        match self.find_by_context(context) {
            Some(proxy) => proxy.confirm_active(),
            None => self.unknown_context("active", context),
        }
    }

    /// The application in `context` reports it paused.
    pub fn notify_paused(&self, context: ContextId) -> bool {
        match self.find_by_context(context) {
            Some(proxy) => proxy.confirm_paused(),
            None => self.unknown_context("paused", context),
        }
    }

    /// The application in `context` reports it was destroyed. The proxy
    /// leaves the registry and the display is reassigned if it owned it.
    pub fn notify_destroyed(&self, context: ContextId) -> bool {
        let Some(proxy) = self.find_by_context(context) else {
            self.sweep_destroyed(context);
            return self.unknown_context("destroyed", context);
        };
        let applied = proxy.confirm_destroyed();
        self.remove(proxy.id());
        applied
    }

    /// Drop destroyed proxies of `context` that nobody removed yet.
    fn sweep_destroyed(&self, context: ContextId) {
        let stale: Vec<ProxyId> = self
            .read_proxies()
            .values()
            .filter(|p| !p.is_placeholder() && p.context_id() == context && p.is_destroyed())
            .map(|p| p.id())
            .collect();
        for id in stale {
            self.remove(id);
        }
    }

    /// Kill `id` unless it is paused. Returns whether a termination was
    /// issued.
    pub fn terminate_if_not_paused(&self, id: ProxyId) -> Result<bool> {
        Ok(self.get(id)?.terminate_if_not_paused())
    }

    /// Ask every live application to shut down. Returns how many destroy
    /// requests were sent.
    pub fn shutdown(&self, timeout: Duration) -> usize {
        let sent = self
            .proxies()
            .iter()
            .filter(|p| !p.is_placeholder())
            .filter(|p| p.request_destroy(timeout))
            .count();
        self.log(LogLevel::Info, "shutdown_requested", [json_kv("destroy_requests", sent)]);
        sent
    }

    /// Record the surface created by `id`. A proxy that already asked for the
    /// screen becomes eligible and may take the foreground immediately.
    pub fn set_display_id(&self, id: ProxyId, display: DisplayId) -> Result<bool> {
        let _guard = self.arbitrate();
        let proxy = self.get(id)?;
        let applied = proxy.set_display_id(display);
        if applied && proxy.wants_foreground() {
            self.request_foreground_locked(&proxy);
        }
        Ok(applied)
    }

    /// Relay the application's foreground intent and arbitrate. Returns the
    /// foreground owner afterwards.
    pub fn wants_foreground(
        &self,
        id: ProxyId,
        wants: bool,
        is_alert: bool,
    ) -> Result<Option<ProxyId>> {
        let _guard = self.arbitrate();
        let proxy = self.get(id)?;
        proxy.set_wants_foreground(wants, is_alert);

        if wants {
            self.request_foreground_locked(&proxy);
        } else if self.foreground.owner() == Some(id) {
            if proxy.preempted().is_some() {
                self.end_preemption_locked(&proxy);
            } else {
                self.select_foreground_locked(Some(id));
            }
        }
        Ok(self.foreground.owner())
    }

    /// Re-run arbitration, keeping the current owner while it remains
    /// eligible.
    pub fn select_foreground(&self) -> Option<ProxyId> {
        let _guard = self.arbitrate();
        self.select_foreground_locked(None);
        self.foreground.owner()
    }

    pub fn foreground(&self) -> Option<ProxyId> {
        self.foreground.owner()
    }

    pub fn foreground_entry(&self) -> Option<ForegroundEntry> {
        self.foreground.current()
    }

    /// Let `preemptor` display over the current owner, which regains the
    /// screen when the preemption ends.
    ///
    /// Returns `false` without changing anything when `preemptor` cannot be
    /// displayed, already owns the display, or is itself buried in the
    /// current preemption chain.
    pub fn start_preemption(&self, preemptor_id: ProxyId) -> Result<bool> {
        let _guard = self.arbitrate();
        let preemptor = self.get(preemptor_id)?;
        if !preemptor.is_foreground_candidate() {
            self.reject_preemption(preemptor_id, "not_displayable");
            return Ok(false);
        }

        let owner = self.foreground.owner().and_then(|id| self.lookup(id));
        match &owner {
            Some(owner) if owner.id() == preemptor_id => {
                self.reject_preemption(preemptor_id, "already_foreground");
                return Ok(false);
            }
            Some(owner) => {
                if self.chain_contains(owner.id(), preemptor_id) {
                    self.reject_preemption(preemptor_id, "cycle");
                    return Ok(false);
                }
                let previous = preemptor.preempted();
                if !preemptor.set_preempted(Some(owner.id())) {
                    return Ok(false);
                }
                if !owner.set_preempting(Some(preemptor_id)) {
                    preemptor.set_preempted(previous);
                    return Ok(false);
                }
            }
            None => {
                preemptor.set_preempted(None);
            }
        }

        self.hand_off(Some(&preemptor));
        let preempted = owner.as_ref().map(|o| o.id().0);
        self.log(
            LogLevel::Info,
            "preemption_started",
            [
                json_kv("preemptor", preemptor_id.0),
                json_kv("preempted", preempted),
            ],
        );
        self.record_audit(
            RegistryAuditStage::PreemptionStarted,
            Some(preemptor_id),
            [json_kv("preempted", preempted)],
        );
        Ok(true)
    }

    /// Finish the preemption started by `preemptor_id`. If it still holds the
    /// display, the proxy it preempted gets it back.
    pub fn end_preemption(&self, preemptor_id: ProxyId) -> Result<bool> {
        let _guard = self.arbitrate();
        let preemptor = self.get(preemptor_id)?;
        Ok(self.end_preemption_locked(&preemptor))
    }

    /// Drop a destroyed proxy. Live proxies are refused; destroy them
    /// through the lifecycle requests first. Idempotent.
    pub fn remove(&self, id: ProxyId) -> bool {
        let _guard = self.arbitrate();
        self.remove_locked(id)
    }

    pub fn metrics_snapshot(&self) -> MetricSnapshot {
        match self.services.metrics.lock() {
            Ok(guard) => guard.snapshot(self.uptime()),
            Err(poisoned) => poisoned.into_inner().snapshot(self.uptime()),
        }
    }

    /// Write the current counters to the configured logger.
    pub fn emit_metrics(&self) -> Result<MetricSnapshot> {
        let snapshot = self.metrics_snapshot();
        if let Some(logger) = &self.services.logger {
            logger.log_event(snapshot.to_log_event(METRICS_TARGET))?;
        }
        Ok(snapshot)
    }

    fn request_foreground_locked(&self, proxy: &Arc<AppProxy>) {
        let owner = self
            .foreground
            .owner()
            .filter(|owner| *owner != proxy.id())
            .and_then(|owner| self.lookup(owner));
        if owner.is_some_and(|owner| owner.preempted().is_some()) {
            self.log(
                LogLevel::Debug,
                "foreground_request_deferred",
                [json_kv("proxy_id", proxy.id().0)],
            );
            return;
        }
        self.hand_off(Some(proxy));
    }

    fn select_foreground_locked(&self, exclude: Option<ProxyId>) {
        let eligible =
            |p: &Arc<AppProxy>| Some(p.id()) != exclude && p.is_foreground_candidate() && p.wants_foreground();

        if let Some(owner) = self.foreground.owner().and_then(|id| self.lookup(id)) {
            if eligible(&owner) {
                return;
            }
        }
        let next = self.proxies().into_iter().find(|p| eligible(p));
        self.hand_off(next.as_ref());
    }

    fn end_preemption_locked(&self, preemptor: &Arc<AppProxy>) -> bool {
        if preemptor.preempted().is_none() {
            return false;
        }
        let restored = self.unlink_locked(preemptor);
        let restored_id = restored.as_ref().map(|p| p.id().0);
        self.log(
            LogLevel::Info,
            "preemption_ended",
            [
                json_kv("preemptor", preemptor.id().0),
                json_kv("restored", restored_id),
            ],
        );
        self.record_audit(
            RegistryAuditStage::PreemptionEnded,
            Some(preemptor.id()),
            [json_kv("restored", restored_id)],
        );

        if self.foreground.owner() == Some(preemptor.id()) {
            self.restore_or_select(restored, preemptor.id());
        }
        true
    }

    fn remove_locked(&self, id: ProxyId) -> bool {
        let Some(proxy) = self.lookup(id) else {
            return false;
        };
        if !proxy.is_destroyed() {
            self.log(
                LogLevel::Warn,
                "live_proxy_removal_refused",
                [
                    json_kv("proxy_id", id.0),
                    json_str("state", proxy.state().as_str()),
                ],
            );
            return false;
        }
        self.write_proxies().remove(&id);

        let restored = self.unlink_locked(&proxy);
        self.log(
            LogLevel::Info,
            "proxy_removed",
            [
                json_kv("proxy_id", id.0),
                json_kv("context_id", proxy.context_id().0),
                json_str("state", proxy.state().as_str()),
            ],
        );
        self.record_audit(
            RegistryAuditStage::ProxyRemoved,
            Some(id),
            [json_kv("context_id", proxy.context_id().0)],
        );

        if self.foreground.owner() == Some(id) {
            self.restore_or_select(restored, id);
        }
        true
    }

    fn restore_or_select(&self, restored: Option<Arc<AppProxy>>, leaving: ProxyId) {
        match restored.filter(|p| p.is_foreground_candidate()) {
            Some(proxy) => self.hand_off(Some(&proxy)),
            None => self.select_foreground_locked(Some(leaving)),
        }
    }

    /// Detach `proxy` from the preemption chain, joining its neighbours.
    /// Returns the proxy it was displaying over.
    fn unlink_locked(&self, proxy: &AppProxy) -> Option<Arc<AppProxy>> {
        let below = proxy.preempted().and_then(|id| self.lookup(id));
        let above = proxy.preempting().and_then(|id| self.lookup(id));
        proxy.clear_preemption_links();

        match (&above, &below) {
            (Some(above), Some(below)) => {
                above.set_preempted(Some(below.id()));
                below.set_preempting(Some(above.id()));
                proxy.disarm_watchdog();
            }
            (Some(above), None) => {
                above.set_preempted(None);
            }
            (None, Some(below)) => {
                if below.preempting() == Some(proxy.id()) {
                    below.set_preempting(None);
                }
            }
            (None, None) => {}
        }
        below
    }

    /// Whether `needle` is reachable from `start` by following `preempted`.
    fn chain_contains(&self, start: ProxyId, needle: ProxyId) -> bool {
        let limit = self.len() + 1;
        let mut cursor = Some(start);
        let mut steps = 0;
        while let Some(id) = cursor {
            if id == needle || steps > limit {
                return true;
            }
            steps += 1;
            cursor = self.lookup(id).and_then(|p| p.preempted());
        }
        false
    }

    /// Move the display to `target`, or to nobody. Non-candidates are refused.
    fn hand_off(&self, target: Option<&Arc<AppProxy>>) {
        if let Some(proxy) = target {
            if !proxy.is_foreground_candidate() {
                self.log(
                    LogLevel::Debug,
                    "foreground_candidate_rejected",
                    [json_kv("proxy_id", proxy.id().0)],
                );
                return;
            }
        }

        let previous = self.foreground.owner();
        let next = target.map(|p| p.id());
        if previous == next {
            return;
        }

        match target {
            Some(proxy) => {
                self.foreground.set(ForegroundEntry {
                    owner: proxy.id(),
                    context: proxy.context_id(),
                    display: proxy.display_id(),
                });
            }
            None => {
                self.foreground.clear();
            }
        }

        if let Some(old) = previous.and_then(|id| self.lookup(id)) {
            old.notify_has_foreground(false);
        }
        if let Some(proxy) = target {
            proxy.notify_has_foreground(true);
        }

        self.services.record(|m| m.record_foreground_change());
        let from = previous.map(|id| id.0);
        let to = next.map(|id| id.0);
        self.log(
            LogLevel::Info,
            "foreground_changed",
            [json_kv("from", from), json_kv("to", to)],
        );
        self.record_audit(
            RegistryAuditStage::ForegroundChanged,
            next,
            [json_kv("from", from), json_kv("to", to)],
        );
    }

    fn reject_preemption(&self, id: ProxyId, reason: &str) {
        self.log(
            LogLevel::Debug,
            "preemption_rejected",
            [json_kv("proxy_id", id.0), json_str("reason", reason)],
        );
    }

    fn unknown_context(&self, reported: &str, context: ContextId) -> bool {
        self.log(
            LogLevel::Debug,
            "notification_for_unknown_context",
            [
                json_kv("context_id", context.0),
                json_str("reported", reported),
            ],
        );
        false
    }

    fn record_audit<I>(&self, stage: RegistryAuditStage, proxy: Option<ProxyId>, details: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut builder = RegistryAuditEventBuilder::new(stage);
        if let Some(id) = proxy {
            builder.proxy(id);
        }
        for (key, value) in details {
            builder.detail(key, value);
        }
        self.audit.record(builder.finish());
    }

    fn log<I>(&self, level: LogLevel, message: &str, fields: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        logging::emit(
            self.services.logger.as_ref(),
            level,
            REGISTRY_TARGET,
            message,
            fields,
        );
    }

    fn arbitrate(&self) -> MutexGuard<'_, ()> {
        match self.arbitration.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read_proxies(&self) -> RwLockReadGuard<'_, BTreeMap<ProxyId, Arc<AppProxy>>> {
        match self.proxies.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_proxies(&self) -> RwLockWriteGuard<'_, BTreeMap<ProxyId, Arc<AppProxy>>> {
        match self.proxies.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ProxyParent for ProxyRegistry {
    fn lookup(&self, id: ProxyId) -> Option<Arc<AppProxy>> {
        self.read_proxies().get(&id).cloned()
    }

    fn proxy_terminated(&self, proxy: &Arc<AppProxy>, cause: TerminationCause) {
        let cause_label = match cause {
            TerminationCause::Requested => "requested",
            TerminationCause::WatchdogExpired(WatchdogPurpose::Pause) => "pause_timeout",
            TerminationCause::WatchdogExpired(WatchdogPurpose::Destroy) => "destroy_timeout",
        };
        if let TerminationCause::WatchdogExpired(purpose) = cause {
            let purpose = match purpose {
                WatchdogPurpose::Pause => "pause",
                WatchdogPurpose::Destroy => "destroy",
            };
            self.record_audit(
                RegistryAuditStage::WatchdogExpired,
                Some(proxy.id()),
                [json_str("purpose", purpose)],
            );
        }
        self.record_audit(
            RegistryAuditStage::ForcedTermination,
            Some(proxy.id()),
            [
                json_kv("context_id", proxy.context_id().0),
                json_str("cause", cause_label),
            ],
        );
        self.remove(proxy.id());
    }
}
