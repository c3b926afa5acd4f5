use std::fmt;

use serde::{Deserialize, Serialize};

/// Registry key of a proxy. Back-references between proxies use this key
/// instead of holding the other proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProxyId(pub u64);

/// Isolated execution context hosting one application instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContextId(pub u32);

/// Id assigned by an outside application manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalId(pub i32);

/// Installed package id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuiteId(pub i32);

impl SuiteId {
    /// Marks proxies that stand for no installed application.
    pub const UNUSED: SuiteId = SuiteId(-1);
}

/// On-screen surface. Zero means the application has not created one yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayId(pub u32);

impl DisplayId {
    pub const NONE: DisplayId = DisplayId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

macro_rules! display_inner {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        })*
    };
}

display_inner!(ProxyId, ContextId, ExternalId, SuiteId, DisplayId);
