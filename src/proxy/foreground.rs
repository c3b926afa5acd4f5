//! Foreground intent and preemption links.
//!
//! The proxy only records what its application wants and who is borrowing the
//! screen from it. Deciding who owns the display is the registry's job.

use super::{AppProxy, ProxyId, ProxyState};
use crate::logging::{LogLevel, json_kv};

impl AppProxy {
    /// Record the intent last reported by the application's display layer.
    /// `is_alert` is only meaningful when `wants` is true.
    pub fn set_wants_foreground(&self, wants: bool, is_alert: bool) {
        let mut inner = self.lock();
        inner.wants_foreground = wants;
        if wants {
            inner.ever_requested_foreground = true;
            inner.alert_waiting = is_alert;
        } else {
            inner.alert_waiting = false;
        }
    }

    pub fn wants_foreground(&self) -> bool {
        self.lock().wants_foreground
    }

    pub fn ever_requested_foreground(&self) -> bool {
        self.lock().ever_requested_foreground
    }

    /// The application has not created a surface yet.
    pub fn has_no_display(&self) -> bool {
        self.lock().display_id.is_none()
    }

    /// The application never asked for the screen, so it would not draw
    /// anything if given the foreground.
    pub fn has_nothing_to_show(&self) -> bool {
        !self.lock().ever_requested_foreground
    }

    /// Whether the registry may hand the display to this proxy.
    pub fn is_foreground_candidate(&self) -> bool {
        let inner = self.lock();
        inner.state != ProxyState::Destroyed
            && !inner.display_id.is_none()
            && inner.ever_requested_foreground
    }

    pub fn is_alert_waiting(&self) -> bool {
        self.lock().alert_waiting
    }

    /// Record the proxy currently displaying over this one.
    ///
    /// Ending a preemption also disarms the preemptor's watchdog: it may have
    /// been armed by a "destroy application" action on the dialog that is now
    /// gone. Self links and links that would mirror `preempted` are ignored.
    /// Returns whether the link was recorded.
    pub fn set_preempting(&self, preempting: Option<ProxyId>) -> bool {
        let stale = {
            let mut inner = self.lock();
            if let Some(other) = preempting {
                if other == self.id() || inner.preempted == Some(other) {
                    drop(inner);
                    self.log(
                        LogLevel::Warn,
                        "preempting_link_rejected",
                        [json_kv("preempting", other.0)],
                    );
                    return false;
                }
            }

            let previous = inner.preempting;
            inner.alert_waiting = preempting.is_some();
            inner.preempting = preempting;
            match preempting {
                None => previous,
                Some(_) => None,
            }
        };

        if let Some(previous) = stale {
            if let Some(preemptor) = self.parent().and_then(|parent| parent.lookup(previous)) {
                if preemptor.disarm_watchdog() {
                    self.log(
                        LogLevel::Debug,
                        "preemptor_watchdog_disarmed",
                        [json_kv("preemptor", previous.0)],
                    );
                }
            }
        }
        true
    }

    pub fn preempting(&self) -> Option<ProxyId> {
        self.lock().preempting
    }

    /// Record the proxy that regains the foreground when this one stops
    /// preempting. Same rejection rules as [`AppProxy::set_preempting`].
    pub fn set_preempted(&self, preempted: Option<ProxyId>) -> bool {
        let mut inner = self.lock();
        if let Some(other) = preempted {
            if other == self.id() || inner.preempting == Some(other) {
                drop(inner);
                self.log(
                    LogLevel::Warn,
                    "preempted_link_rejected",
                    [json_kv("preempted", other.0)],
                );
                return false;
            }
        }
        inner.preempted = preempted;
        true
    }

    pub fn preempted(&self) -> Option<ProxyId> {
        self.lock().preempted
    }

    /// Drop both preemption links without touching any other proxy.
    pub(crate) fn clear_preemption_links(&self) {
        let mut inner = self.lock();
        inner.preempting = None;
        inner.preempted = None;
        inner.alert_waiting = false;
    }

    /// Tell the application's display layer it gained or lost the screen.
    pub fn notify_has_foreground(&self, has_foreground: bool) {
        let mut inner = self.lock();
        if inner.state == ProxyState::Destroyed {
            return;
        }
        let display = inner.display_id;
        if has_foreground {
            inner.alert_waiting = false;
            self.services()
                .foreground
                .send_foreground_notify(self.context_id(), display);
        } else {
            self.services()
                .foreground
                .send_background_notify(self.context_id(), display);
        }
    }
}
