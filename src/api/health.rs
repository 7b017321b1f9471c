//! Shared health state for the /health endpoint.
//! Updated by DealSyncer, read by the API.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Sync progress shared between the background syncer and the API.
#[derive(Default)]
pub struct HealthState {
    /// True while a sync is running. Doubles as the overlap guard.
    pub sync_in_progress: AtomicBool,
    /// Unix seconds of the last successful sync (0 = never).
    pub last_sync_at: AtomicU64,
    /// Deals written by the last successful sync.
    pub last_sync_deals: AtomicU64,
    pub last_error: Mutex<Option<String>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the sync slot. Returns false if a sync is already running.
    pub fn try_begin_sync(&self) -> bool {
        self.sync_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_sync(&self) {
        self.sync_in_progress.store(false, Ordering::Release);
    }

    pub fn record_success(&self, at_secs: u64, deals: u64) {
        self.last_sync_at.store(at_secs, Ordering::Relaxed);
        self.last_sync_deals.store(deals, Ordering::Relaxed);
        if let Ok(mut err) = self.last_error.lock() {
            *err = None;
        }
    }

    pub fn record_failure(&self, message: String) {
        if let Ok(mut err) = self.last_error.lock() {
            *err = Some(message);
        }
    }

    pub fn sync_in_progress(&self) -> bool {
        self.sync_in_progress.load(Ordering::Acquire)
    }

    pub fn last_sync_at(&self) -> u64 {
        self.last_sync_at.load(Ordering::Relaxed)
    }

    pub fn last_sync_deals(&self) -> u64 {
        self.last_sync_deals.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_slot_is_exclusive() {
        let health = HealthState::new();
        assert!(health.try_begin_sync());
        assert!(!health.try_begin_sync());
        assert!(health.sync_in_progress());
        health.end_sync();
        assert!(health.try_begin_sync());
    }

    #[test]
    fn success_clears_previous_error() {
        let health = HealthState::new();
        health.record_failure("CRM down".to_string());
        assert_eq!(health.last_error().as_deref(), Some("CRM down"));
        health.record_success(1_700_000_000, 12);
        assert_eq!(health.last_error(), None);
        assert_eq!(health.last_sync_at(), 1_700_000_000);
        assert_eq!(health.last_sync_deals(), 12);
    }
}
