//! Application lifecycle management core.
//!
//! Each running application lives in its own isolated context and is mirrored
//! here by an [`AppProxy`]. The [`ProxyRegistry`] owns the proxies, relays the
//! state changes applications report back, and decides which one holds the
//! single display. Destroy and pause requests are guarded by watchdogs that
//! force termination when an application stops cooperating.

pub mod config;
pub mod error;
pub mod isolation;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod registry;
pub mod watchdog;

pub use config::{DEFAULT_DESTROY_TIMEOUT, ManagerConfig};
pub use error::{AmsError, Result};
pub use isolation::recording::{
    DeliveredEvent, IsolationCall, RecordingEvents, RecordingIsolation,
};
pub use isolation::{ForegroundEventProducer, IsolationControl, LifecycleEventProducer};
pub use logging::{
    FileSink, LogEvent, LogFields, LogLevel, LogSink, Logger, LoggingError, LoggingResult,
    MemorySink, NullSink,
};
pub use metrics::{LifecycleMetrics, MetricSnapshot, RequestKind};
pub use proxy::{
    AppProxy, ContextId, DisplayId, ExternalId, LaunchSpec, ProxyId, ProxyParent, ProxyServices,
    ProxySnapshot, ProxyState, SuiteId, TerminationCause, WatchdogPurpose,
};
pub use registry::{
    BufferedRegistryAudit, ForegroundEntry, ForegroundSlot, NullRegistryAudit, ProxyRegistry,
    RegistryAudit, RegistryAuditEvent, RegistryAuditEventBuilder, RegistryAuditStage,
};
pub use watchdog::{WatchdogHandle, WatchdogTimer, WatchdogToken};
