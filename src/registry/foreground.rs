use std::sync::RwLock;

use crate::proxy::{ContextId, DisplayId, ProxyId};

/// Who currently owns the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForegroundEntry {
    pub owner: ProxyId,
    pub context: ContextId,
    pub display: DisplayId,
}

#[derive(Debug, Default)]
pub struct ForegroundSlot {
    inner: RwLock<Option<ForegroundEntry>>,
}

impl ForegroundSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new owner, returning the previous one.
    pub fn set(&self, entry: ForegroundEntry) -> Option<ForegroundEntry> {
        match self.inner.write() {
            Ok(mut guard) => guard.replace(entry),
            Err(poisoned) => poisoned.into_inner().replace(entry),
        }
    }

    pub fn clear(&self) -> Option<ForegroundEntry> {
        match self.inner.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    pub fn current(&self) -> Option<ForegroundEntry> {
        match self.inner.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn owner(&self) -> Option<ProxyId> {
        self.current().map(|entry| entry.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(owner: u64) -> ForegroundEntry {
        ForegroundEntry {
            owner: ProxyId(owner),
            context: ContextId(owner as u32),
            display: DisplayId(owner as u32 + 100),
        }
    }

    #[test]
    fn set_and_get_owner() {
        let slot = ForegroundSlot::new();
        assert!(slot.set(entry(1)).is_none());
        assert_eq!(slot.owner(), Some(ProxyId(1)));
        assert_eq!(slot.set(entry(2)), Some(entry(1)));
        assert_eq!(slot.current(), Some(entry(2)));
    }

    #[test]
    fn clear_empties_slot() {
        let slot = ForegroundSlot::new();
        slot.set(entry(1));
        assert_eq!(slot.clear(), Some(entry(1)));
        assert!(slot.current().is_none());
        assert!(slot.clear().is_none());
    }
}
