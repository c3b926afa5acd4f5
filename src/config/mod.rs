//! Process-wide tunables for the lifecycle core.
//!
//! The configuration is an explicit value handed to the registry at
//! construction time. It can be built in code, decoded from JSON, and patched
//! from the environment at startup.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AmsError, Result};
use crate::proxy::ContextId;

/// Default time an application gets to honour a destroy or pause request.
pub const DEFAULT_DESTROY_TIMEOUT: Duration = Duration::from_millis(5000);

pub const ENV_DESTROY_TIMEOUT_MS: &str = "AMS_DESTROY_TIMEOUT_MS";
pub const ENV_RUNNING_UNDER_TEST: &str = "AMS_RUNNING_UNDER_TEST";
pub const ENV_AMS_CONTEXT_ID: &str = "AMS_CONTEXT_ID";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Watchdog delay used when a request does not carry its own timeout.
    pub destroy_timeout: Duration,
    /// Context hosting the management application itself. It is never paused.
    pub ams_context: Option<ContextId>,
    /// Lifts the management-context pause guard, for test harnesses that run
    /// the manager as an ordinary application.
    pub running_under_test: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            destroy_timeout: DEFAULT_DESTROY_TIMEOUT,
            ams_context: None,
            running_under_test: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    destroy_timeout_ms: Option<u64>,
    ams_context_id: Option<u32>,
    running_under_test: Option<bool>,
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_destroy_timeout(mut self, timeout: Duration) -> Self {
        self.set_destroy_timeout(timeout);
        self
    }

    pub fn with_ams_context(mut self, context: ContextId) -> Self {
        self.ams_context = Some(context);
        self
    }

    pub fn with_running_under_test(mut self, enabled: bool) -> Self {
        self.running_under_test = enabled;
        self
    }

    /// Replace the default timeout. Zero is ignored so a missing value can
    /// never disable the watchdog.
    pub fn set_destroy_timeout(&mut self, timeout: Duration) -> bool {
        if timeout.is_zero() {
            return false;
        }
        self.destroy_timeout = timeout;
        true
    }

    /// Timeout to use for one request: a positive per-call value wins,
    /// anything else falls back to the configured default.
    pub fn resolve_timeout(&self, requested: Duration) -> Duration {
        if requested.is_zero() {
            self.destroy_timeout
        } else {
            requested
        }
    }

    /// Whether `context` is the management context and must not be paused.
    pub fn is_protected_context(&self, context: ContextId) -> bool {
        self.ams_context == Some(context) && !self.running_under_test
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(raw)?;
        let mut config = Self::default();
        if let Some(ms) = file.destroy_timeout_ms {
            if ms == 0 {
                return Err(AmsError::Config("destroy_timeout_ms must be positive".into()));
            }
            config.destroy_timeout = Duration::from_millis(ms);
        }
        config.ams_context = file.ams_context_id.map(ContextId);
        config.running_under_test = file.running_under_test.unwrap_or(false);
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Apply `AMS_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides produced by `lookup`, keyed by the `AMS_*` names.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_DESTROY_TIMEOUT_MS) {
            let ms = raw.trim().parse::<u64>().map_err(|err| {
                AmsError::Config(format!("{ENV_DESTROY_TIMEOUT_MS}={raw}: {err}"))
            })?;
            if !self.set_destroy_timeout(Duration::from_millis(ms)) {
                return Err(AmsError::Config(format!(
                    "{ENV_DESTROY_TIMEOUT_MS} must be positive"
                )));
            }
        }
        if let Some(raw) = lookup(ENV_AMS_CONTEXT_ID) {
            let id = raw.trim().parse::<u32>().map_err(|err| {
                AmsError::Config(format!("{ENV_AMS_CONTEXT_ID}={raw}: {err}"))
            })?;
            self.ams_context = Some(ContextId(id));
        }
        if let Some(raw) = lookup(ENV_RUNNING_UNDER_TEST) {
            self.running_under_test = matches!(raw.trim(), "1" | "true" | "yes");
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_to_five_seconds() {
        let config = ManagerConfig::default();
        assert_eq!(config.destroy_timeout, Duration::from_millis(5000));
        assert!(config.ams_context.is_none());
        assert!(!config.running_under_test);
    }

    #[test]
    fn zero_timeout_is_ignored() {
        let mut config = ManagerConfig::default();
        assert!(!config.set_destroy_timeout(Duration::ZERO));
        assert_eq!(config.destroy_timeout, DEFAULT_DESTROY_TIMEOUT);
        assert_eq!(
            config.resolve_timeout(Duration::ZERO),
            DEFAULT_DESTROY_TIMEOUT
        );
        assert_eq!(
            config.resolve_timeout(Duration::from_millis(300)),
            Duration::from_millis(300)
        );
    }

    #[test]
    fn decodes_json() {
        let config = ManagerConfig::from_json_str(
            r#"{ "destroy_timeout_ms": 1200, "ams_context_id": 1, "running_under_test": true }"#,
        )
        .unwrap();
        assert_eq!(config.destroy_timeout, Duration::from_millis(1200));
        assert_eq!(config.ams_context, Some(ContextId(1)));
        assert!(config.running_under_test);
    }

    #[test]
    fn rejects_zero_timeout_and_unknown_keys() {
        let err = ManagerConfig::from_json_str(r#"{ "destroy_timeout_ms": 0 }"#).unwrap_err();
        assert!(matches!(err, AmsError::Config(_)));
        let err = ManagerConfig::from_json_str(r#"{ "timeout": 10 }"#).unwrap_err();
        assert!(matches!(err, AmsError::Decode(_)));
    }

    #[test]
    fn overrides_patch_fields() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_DESTROY_TIMEOUT_MS, "750"),
            (ENV_AMS_CONTEXT_ID, "3"),
            (ENV_RUNNING_UNDER_TEST, "true"),
        ]);
        let config = ManagerConfig::default()
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.destroy_timeout, Duration::from_millis(750));
        assert_eq!(config.ams_context, Some(ContextId(3)));
        assert!(config.running_under_test);
        assert!(!config.is_protected_context(ContextId(3)));
    }

    #[test]
    fn bad_override_is_reported() {
        let err = ManagerConfig::default()
            .apply_overrides(|key| (key == ENV_DESTROY_TIMEOUT_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, AmsError::Config(_)));
    }

    #[test]
    fn management_context_is_protected() {
        let config = ManagerConfig::default().with_ams_context(ContextId(0));
        assert!(config.is_protected_context(ContextId(0)));
        assert!(!config.is_protected_context(ContextId(4)));
    }
}
