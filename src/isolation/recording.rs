use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{ForegroundEventProducer, IsolationControl, LifecycleEventProducer};
use crate::proxy::{ContextId, DisplayId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationCall {
    Suspend(ContextId),
    Resume(ContextId),
    Terminate(ContextId),
}

/// Isolation runtime stand-in that records calls and can be told to refuse
/// suspend/resume.
#[derive(Debug, Default)]
pub struct RecordingIsolation {
    calls: Mutex<Vec<IsolationCall>>,
    refuse_suspend: AtomicBool,
    refuse_resume: AtomicBool,
}

impl RecordingIsolation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_suspend(&self, refuse: bool) {
        self.refuse_suspend.store(refuse, Ordering::SeqCst);
    }

    pub fn refuse_resume(&self, refuse: bool) {
        self.refuse_resume.store(refuse, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<IsolationCall> {
        self.calls
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, call: IsolationCall) -> usize {
        self.calls().into_iter().filter(|c| *c == call).count()
    }

    pub fn terminations(&self, context: ContextId) -> usize {
        self.count(IsolationCall::Terminate(context))
    }

    fn push(&self, call: IsolationCall) {
        if let Ok(mut guard) = self.calls.lock() {
            guard.push(call);
        }
    }
}

impl IsolationControl for RecordingIsolation {
    fn suspend(&self, context: ContextId) -> bool {
        if self.refuse_suspend.load(Ordering::SeqCst) {
            return false;
        }
        self.push(IsolationCall::Suspend(context));
        true
    }

    fn resume(&self, context: ContextId) -> bool {
        if self.refuse_resume.load(Ordering::SeqCst) {
            return false;
        }
        self.push(IsolationCall::Resume(context));
        true
    }

    fn terminate(&self, context: ContextId) {
        self.push(IsolationCall::Terminate(context));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveredEvent {
    Activate { context: ContextId, class_name: Option<String> },
    Pause { context: ContextId, class_name: Option<String> },
    Destroy { context: ContextId, class_name: Option<String> },
    Foreground { context: ContextId, display: DisplayId },
    Background { context: ContextId, display: DisplayId },
}

impl DeliveredEvent {
    pub fn context(&self) -> ContextId {
        match self {
            DeliveredEvent::Activate { context, .. }
            | DeliveredEvent::Pause { context, .. }
            | DeliveredEvent::Destroy { context, .. }
            | DeliveredEvent::Foreground { context, .. }
            | DeliveredEvent::Background { context, .. } => *context,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeliveredEvent::Activate { .. } => "activate",
            DeliveredEvent::Pause { .. } => "pause",
            DeliveredEvent::Destroy { .. } => "destroy",
            DeliveredEvent::Foreground { .. } => "foreground",
            DeliveredEvent::Background { .. } => "background",
        }
    }
}

/// Event queue stand-in recording every life-cycle and foreground event.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    delivered: Mutex<Vec<DeliveredEvent>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<DeliveredEvent> {
        self.delivered
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Number of `kind` events delivered to `context`.
    pub fn count(&self, kind: &str, context: ContextId) -> usize {
        self.delivered()
            .iter()
            .filter(|e| e.kind() == kind && e.context() == context)
            .count()
    }

    pub fn last_for(&self, context: ContextId) -> Option<DeliveredEvent> {
        self.delivered()
            .into_iter()
            .rev()
            .find(|e| e.context() == context)
    }

    fn push(&self, event: DeliveredEvent) {
        if let Ok(mut guard) = self.delivered.lock() {
            guard.push(event);
        }
    }
}

impl LifecycleEventProducer for RecordingEvents {
    fn send_activate(&self, context: ContextId, class_name: Option<&str>) {
        self.push(DeliveredEvent::Activate {
            context,
            class_name: class_name.map(str::to_string),
        });
    }

    fn send_pause(&self, context: ContextId, class_name: Option<&str>) {
        self.push(DeliveredEvent::Pause {
            context,
            class_name: class_name.map(str::to_string),
        });
    }

    fn send_destroy(&self, context: ContextId, class_name: Option<&str>) {
        self.push(DeliveredEvent::Destroy {
            context,
            class_name: class_name.map(str::to_string),
        });
    }
}

impl ForegroundEventProducer for RecordingEvents {
    fn send_foreground_notify(&self, context: ContextId, display: DisplayId) {
        self.push(DeliveredEvent::Foreground { context, display });
    }

    fn send_background_notify(&self, context: ContextId, display: DisplayId) {
        self.push(DeliveredEvent::Background { context, display });
    }
}
