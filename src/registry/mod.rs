//! Proxy registry and display arbitration.
//!
//! Callers resolve proxies and relay application notifications through
//! [`ProxyRegistry`]; the foreground slot and the preemption chain are only
//! changed while the registry's arbitration lock is held.

pub mod audit;
mod core;
mod foreground;

pub use audit::{
    BufferedRegistryAudit, NullRegistryAudit, RegistryAudit, RegistryAuditEvent,
    RegistryAuditEventBuilder, RegistryAuditStage,
};
pub use self::core::ProxyRegistry;
pub use foreground::{ForegroundEntry, ForegroundSlot};
