//! Per-application lifecycle proxy.
//!
//! An [`AppProxy`] mirrors the observed state of one application running in
//! its own isolated context, so that nothing has to be shared across the
//! isolation boundary. The recorded state only changes when the application
//! itself reports a completed transition (see [`lifecycle`]); requests are sent
//! asynchronously and, for destroy and pause, guarded by a watchdog that forces
//! termination when the application does not answer in time.

mod foreground;
mod ids;
mod lifecycle;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::Serialize;
use serde_json::Value;

pub use ids::{ContextId, DisplayId, ExternalId, ProxyId, SuiteId};

use crate::config::ManagerConfig;
use crate::isolation::{ForegroundEventProducer, IsolationControl, LifecycleEventProducer};
use crate::logging::{self, LogLevel, Logger, PROXY_TARGET, json_kv};
use crate::metrics::LifecycleMetrics;
use crate::watchdog::{WatchdogHandle, WatchdogTimer};

/// Observed life-cycle state of an application. `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyState {
    Active,
    Paused,
    Suspended,
    Destroyed,
}

impl ProxyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyState::Active => "active",
            ProxyState::Paused => "paused",
            ProxyState::Suspended => "suspended",
            ProxyState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a watchdog is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogPurpose {
    Pause,
    Destroy,
}

/// How a context ended up forcibly terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCause {
    /// `terminate_if_not_paused` was called directly.
    Requested,
    /// A destroy or pause watchdog expired.
    WatchdogExpired(WatchdogPurpose),
}

/// Owner of a set of proxies, seen from a proxy.
pub trait ProxyParent: Send + Sync {
    /// Resolve a back-reference.
    fn lookup(&self, id: ProxyId) -> Option<Arc<AppProxy>>;

    /// A proxy forced its context down and is now `Destroyed`.
    fn proxy_terminated(&self, proxy: &Arc<AppProxy>, cause: TerminationCause);
}

/// Collaborators and tunables shared by every proxy of one registry.
#[derive(Clone)]
pub struct ProxyServices {
    pub isolation: Arc<dyn IsolationControl>,
    pub events: Arc<dyn LifecycleEventProducer>,
    pub foreground: Arc<dyn ForegroundEventProducer>,
    pub config: ManagerConfig,
    pub timer: WatchdogTimer,
    pub logger: Option<Logger>,
    pub metrics: Arc<Mutex<LifecycleMetrics>>,
}

impl ProxyServices {
    pub fn new(
        isolation: Arc<dyn IsolationControl>,
        events: Arc<dyn LifecycleEventProducer>,
        foreground: Arc<dyn ForegroundEventProducer>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            isolation,
            events,
            foreground,
            config,
            timer: WatchdogTimer::default(),
            logger: None,
            metrics: Arc::new(Mutex::new(LifecycleMetrics::new())),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Mutex<LifecycleMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_timer(mut self, timer: WatchdogTimer) -> Self {
        self.timer = timer;
        self
    }

    pub(crate) fn record(&self, update: impl FnOnce(&mut LifecycleMetrics)) {
        if let Ok(mut guard) = self.metrics.lock() {
            update(&mut guard);
        }
    }
}

/// Construction parameters for a proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub external_id: ExternalId,
    pub context_id: ContextId,
    pub suite_id: SuiteId,
    pub class_name: Option<String>,
    pub display_name: String,
    pub initial_state: ProxyState,
}

impl LaunchSpec {
    pub fn new(context_id: ContextId, suite_id: SuiteId, class_name: impl Into<String>) -> Self {
        let class_name = class_name.into();
        Self {
            external_id: ExternalId(-1),
            context_id,
            suite_id,
            display_name: class_name.clone(),
            class_name: Some(class_name),
            initial_state: ProxyState::Active,
        }
    }

    /// Proxy standing for "no application", used by system dialogs that
    /// borrow the screen.
    pub fn placeholder(context_id: ContextId, display_name: impl Into<String>) -> Self {
        Self {
            external_id: ExternalId(-1),
            context_id,
            suite_id: SuiteId::UNUSED,
            class_name: None,
            display_name: display_name.into(),
            initial_state: ProxyState::Active,
        }
    }

    pub fn with_external_id(mut self, id: ExternalId) -> Self {
        self.external_id = id;
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_initial_state(mut self, state: ProxyState) -> Self {
        self.initial_state = state;
        self
    }
}

/// Point-in-time copy of a proxy's fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxySnapshot {
    pub id: ProxyId,
    pub external_id: ExternalId,
    pub context_id: ContextId,
    pub suite_id: SuiteId,
    pub class_name: Option<String>,
    pub display_name: String,
    pub display_id: DisplayId,
    pub state: ProxyState,
    pub wants_foreground: bool,
    pub ever_requested_foreground: bool,
    pub alert_waiting: bool,
    pub preempting: Option<ProxyId>,
    pub preempted: Option<ProxyId>,
    pub watchdog: Option<WatchdogPurpose>,
    pub was_not_active: bool,
}

impl fmt::Display for ProxySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AppProxy: suite id = {}, class name = {}, display name = {}, context id = {}, \
             display id = {}, state = {}, wants foreground = {}, requested foreground = {}, \
             alert waiting = {}",
            self.suite_id,
            self.class_name.as_deref().unwrap_or("<none>"),
            self.display_name,
            self.context_id,
            self.display_id,
            self.state,
            self.wants_foreground,
            self.ever_requested_foreground,
            self.alert_waiting,
        )
    }
}

pub(crate) struct ArmedWatchdog {
    pub(crate) handle: WatchdogHandle,
    pub(crate) purpose: WatchdogPurpose,
}

pub(crate) struct ProxyInner {
    pub(crate) state: ProxyState,
    pub(crate) display_id: DisplayId,
    pub(crate) wants_foreground: bool,
    pub(crate) ever_requested_foreground: bool,
    pub(crate) preempting: Option<ProxyId>,
    pub(crate) preempted: Option<ProxyId>,
    pub(crate) alert_waiting: bool,
    pub(crate) watchdog: Option<ArmedWatchdog>,
    pub(crate) was_not_active: bool,
}

/// Lifecycle proxy of one running application.
pub struct AppProxy {
    id: ProxyId,
    external_id: ExternalId,
    context_id: ContextId,
    suite_id: SuiteId,
    class_name: Option<String>,
    display_name: String,
    inner: Mutex<ProxyInner>,
    services: Arc<ProxyServices>,
    parent: Weak<dyn ProxyParent>,
    me: Weak<AppProxy>,
}

impl AppProxy {
    pub fn new(
        id: ProxyId,
        spec: LaunchSpec,
        services: Arc<ProxyServices>,
        parent: Weak<dyn ProxyParent>,
    ) -> Arc<Self> {
        let LaunchSpec {
            external_id,
            context_id,
            suite_id,
            class_name,
            display_name,
            initial_state,
        } = spec;

        Arc::new_cyclic(|me| Self {
            id,
            external_id,
            context_id,
            suite_id,
            class_name,
            display_name,
            inner: Mutex::new(ProxyInner {
                state: initial_state,
                display_id: DisplayId::NONE,
                wants_foreground: false,
                ever_requested_foreground: false,
                preempting: None,
                preempted: None,
                alert_waiting: false,
                watchdog: None,
                was_not_active: true,
            }),
            services,
            parent,
            me: me.clone(),
        })
    }

    pub fn id(&self) -> ProxyId {
        self.id
    }

    pub fn external_id(&self) -> ExternalId {
        self.external_id
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn suite_id(&self) -> SuiteId {
        self.suite_id
    }

    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// True for proxies that stand for no installed application.
    pub fn is_placeholder(&self) -> bool {
        self.suite_id == SuiteId::UNUSED && self.class_name.is_none()
    }

    pub fn state(&self) -> ProxyState {
        self.lock().state
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == ProxyState::Destroyed
    }

    pub fn was_not_active(&self) -> bool {
        self.lock().was_not_active
    }

    pub fn display_id(&self) -> DisplayId {
        self.lock().display_id
    }

    /// Record the application's surface. Once set to a non-zero id it never
    /// changes; later different ids are ignored.
    pub fn set_display_id(&self, display: DisplayId) -> bool {
        let mut inner = self.lock();
        if inner.display_id == display {
            return true;
        }
        if !inner.display_id.is_none() {
            let current = inner.display_id;
            drop(inner);
            self.log(
                LogLevel::Warn,
                "display_reassignment_ignored",
                [
                    json_kv("display_id", current.0),
                    json_kv("rejected_display_id", display.0),
                ],
            );
            return false;
        }
        inner.display_id = display;
        true
    }

    /// Purpose of the outstanding watchdog, if any.
    pub fn watchdog(&self) -> Option<WatchdogPurpose> {
        self.lock().watchdog.as_ref().map(|armed| armed.purpose)
    }

    pub fn has_watchdog(&self) -> bool {
        self.lock().watchdog.is_some()
    }

    pub fn snapshot(&self) -> ProxySnapshot {
        let inner = self.lock();
        ProxySnapshot {
            id: self.id,
            external_id: self.external_id,
            context_id: self.context_id,
            suite_id: self.suite_id,
            class_name: self.class_name.clone(),
            display_name: self.display_name.clone(),
            display_id: inner.display_id,
            state: inner.state,
            wants_foreground: inner.wants_foreground,
            ever_requested_foreground: inner.ever_requested_foreground,
            alert_waiting: inner.alert_waiting,
            preempting: inner.preempting,
            preempted: inner.preempted,
            watchdog: inner.watchdog.as_ref().map(|armed| armed.purpose),
            was_not_active: inner.was_not_active,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ProxyInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn services(&self) -> &ProxyServices {
        &self.services
    }

    pub(crate) fn parent(&self) -> Option<Arc<dyn ProxyParent>> {
        self.parent.upgrade()
    }

    pub(crate) fn log<I>(&self, level: LogLevel, message: &str, fields: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.log_to(PROXY_TARGET, level, message, fields);
    }

    pub(crate) fn log_to<I>(&self, target: &str, level: LogLevel, message: &str, fields: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let base = [
            json_kv("proxy_id", self.id.0),
            json_kv("context_id", self.context_id.0),
        ];
        logging::emit(
            self.services.logger.as_ref(),
            level,
            target,
            message,
            base.into_iter().chain(fields),
        );
    }
}

impl fmt::Display for AppProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.snapshot().fmt(f)
    }
}

impl fmt::Debug for AppProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppProxy")
            .field("id", &self.id)
            .field("context_id", &self.context_id)
            .field("class_name", &self.class_name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, Weak};
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::isolation::recording::{RecordingEvents, RecordingIsolation};
    use crate::logging::MemorySink;

    /// Minimal parent keeping proxies alive and recording terminations.
    #[derive(Default)]
    pub struct TestParent {
        pub proxies: Mutex<HashMap<ProxyId, Arc<AppProxy>>>,
        pub terminated: Mutex<Vec<(ProxyId, TerminationCause)>>,
    }

    impl ProxyParent for TestParent {
        fn lookup(&self, id: ProxyId) -> Option<Arc<AppProxy>> {
            self.proxies.lock().unwrap().get(&id).cloned()
        }

        fn proxy_terminated(&self, proxy: &Arc<AppProxy>, cause: TerminationCause) {
            self.terminated.lock().unwrap().push((proxy.id(), cause));
        }
    }

    pub struct Harness {
        pub isolation: Arc<RecordingIsolation>,
        pub events: Arc<RecordingEvents>,
        pub sink: Arc<MemorySink>,
        pub services: Arc<ProxyServices>,
        pub parent: Arc<TestParent>,
        next_id: Mutex<u64>,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with_config(ManagerConfig::default())
        }

        pub fn with_config(config: ManagerConfig) -> Self {
            let isolation = Arc::new(RecordingIsolation::new());
            let events = Arc::new(RecordingEvents::new());
            let sink = Arc::new(MemorySink::new());
            let services = Arc::new(
                ProxyServices::new(isolation.clone(), events.clone(), events.clone(), config)
                    .with_logger(Logger::from_arc(sink.clone())),
            );
            Self {
                isolation,
                events,
                sink,
                services,
                parent: Arc::new(TestParent::default()),
                next_id: Mutex::new(1),
            }
        }

        pub fn spawn(&self, spec: LaunchSpec) -> Arc<AppProxy> {
            let id = {
                let mut next = self.next_id.lock().unwrap();
                let id = ProxyId(*next);
                *next += 1;
                id
            };
            let parent: Weak<dyn ProxyParent> = Arc::downgrade(&self.parent) as Weak<dyn ProxyParent>;
            let proxy = AppProxy::new(id, spec, self.services.clone(), parent);
            self.parent
                .proxies
                .lock()
                .unwrap()
                .insert(id, proxy.clone());
            proxy
        }

        /// Launch an application that already completed startup.
        pub fn started(&self, context: u32, class_name: &str) -> Arc<AppProxy> {
            let proxy = self.spawn(LaunchSpec::new(ContextId(context), SuiteId(1), class_name));
            assert!(proxy.confirm_active());
            proxy
        }

        pub fn terminations(&self) -> Vec<(ProxyId, TerminationCause)> {
            self.parent.terminated.lock().unwrap().clone()
        }
    }

    /// Poll `check` until it holds or `limit` elapses.
    pub fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        check()
    }
}
