//! Contracts with the isolation runtime and the per-application event queues.
//!
//! The core never suspends, resumes or kills an execution context itself and
//! never touches an application's event loop directly. It goes through these
//! traits, which a host runtime implements. [`recording`] provides in-memory
//! implementations that record every call.

pub mod recording;

use crate::proxy::{ContextId, DisplayId};

/// Primitive control over isolated execution contexts.
///
/// Calls are synchronous for the caller but take effect in another context
/// asynchronously.
pub trait IsolationControl: Send + Sync {
    /// Stop scheduling the context. Returns `false` when the runtime refused.
    fn suspend(&self, context: ContextId) -> bool;

    /// Resume a suspended context. Returns `false` when the runtime refused.
    fn resume(&self, context: ContextId) -> bool;

    /// Kill the context. Best effort.
    fn terminate(&self, context: ContextId);
}

/// Best-effort delivery of life-cycle requests into an application's own
/// event queue.
pub trait LifecycleEventProducer: Send + Sync {
    fn send_activate(&self, context: ContextId, class_name: Option<&str>);
    fn send_pause(&self, context: ContextId, class_name: Option<&str>);
    fn send_destroy(&self, context: ContextId, class_name: Option<&str>);
}

/// Tells an application's display layer that it gained or lost the screen.
pub trait ForegroundEventProducer: Send + Sync {
    fn send_foreground_notify(&self, context: ContextId, display: DisplayId);
    fn send_background_notify(&self, context: ContextId, display: DisplayId);
}
