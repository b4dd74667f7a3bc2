//! Single-slot registry of the active session
//!
//! The device link is exclusive, so at most one session may hold it at a
//! time. A registry is cheap to clone; clones share the slot. Callers that
//! want process-wide exclusivity use [`global`].
//!
//! A lease that is leaked (for example with `std::mem::forget`) keeps the slot
//! occupied until [`SessionRegistry::release`] is called explicitly.

use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;

use crate::error::{Error, Result};

static GLOBAL: Lazy<SessionRegistry> = Lazy::new(SessionRegistry::new);

/// The process-wide registry
pub fn global() -> &'static SessionRegistry {
    &GLOBAL
}

#[derive(Debug, Default)]
struct Slot {
    next_lease: u64,
    holder: Option<(u64, String)>,
}

/// Holds the name of the active session, if any
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    slot: Arc<Mutex<Slot>>,
}

impl SessionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the slot for session `name`
    pub fn acquire(&self, name: &str) -> Result<SessionLease> {
        let mut slot = self.lock();
        if let Some((_, active)) = &slot.holder {
            return Err(Error::SessionAlreadyActive {
                active: active.clone(),
                requested: name.to_string(),
            });
        }
        slot.next_lease += 1;
        let id = slot.next_lease;
        slot.holder = Some((id, name.to_string()));
        log::debug!("Session `{}` acquired the registry", name);
        Ok(SessionLease {
            registry: self.clone(),
            id,
            released: false,
        })
    }

    /// Clear the slot unconditionally; a no-op when it is empty
    pub fn release(&self) {
        if let Some((_, name)) = self.lock().holder.take() {
            log::debug!("Session `{}` released from the registry", name);
        }
    }

    /// Name of the session holding the slot
    pub fn active(&self) -> Option<String> {
        self.lock().holder.as_ref().map(|(_, name)| name.clone())
    }

    /// Whether the slot is held
    pub fn is_active(&self) -> bool {
        self.lock().holder.is_some()
    }

    fn release_lease(&self, id: u64) {
        let mut slot = self.lock();
        if matches!(&slot.holder, Some((holder, _)) if *holder == id) {
            if let Some((_, name)) = slot.holder.take() {
                log::debug!("Session `{}` released from the registry", name);
            }
        }
    }
}

/// Proof of holding the registry slot; released on drop
#[derive(Debug)]
pub struct SessionLease {
    registry: SessionRegistry,
    id: u64,
    released: bool,
}

impl SessionLease {
    /// Give the slot back now
    ///
    /// Only clears the slot if this lease still holds it.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.release_lease(self.id);
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails() {
        let registry = SessionRegistry::new();
        let _lease = registry.acquire("first").unwrap();
        let err = registry.acquire("second").unwrap_err();
        assert!(matches!(
            err,
            Error::SessionAlreadyActive { ref active, ref requested }
                if active == "first" && requested == "second"
        ));
        assert_eq!(registry.active().as_deref(), Some("first"));
    }

    #[test]
    fn test_drop_releases() {
        let registry = SessionRegistry::new();
        {
            let _lease = registry.acquire("a").unwrap();
            assert!(registry.is_active());
        }
        assert!(!registry.is_active());
        registry.acquire("b").unwrap();
    }

    #[test]
    fn test_release_when_empty_is_noop() {
        let registry = SessionRegistry::new();
        registry.release();
        registry.release();
        assert!(!registry.is_active());
    }

    #[test]
    fn test_stale_lease_does_not_clear_new_holder() {
        let registry = SessionRegistry::new();
        let mut old = registry.acquire("old").unwrap();
        registry.release();
        let _new = registry.acquire("new").unwrap();
        old.release();
        assert_eq!(registry.active().as_deref(), Some("new"));
    }

    #[test]
    fn test_clones_share_slot() {
        let registry = SessionRegistry::new();
        let other = registry.clone();
        let _lease = registry.acquire("x").unwrap();
        assert!(other.acquire("y").is_err());
    }

    #[test]
    fn test_global_is_shared() {
        assert!(std::ptr::eq(global(), global()));
    }
}
