use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use chrono::Local;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::config::Config;
use crate::crm::CrmClient;
use crate::db::DealRepository;
use crate::error::{AppError, Result};
use crate::export::write_weekly_json;
use crate::metrics::{format_for_spreadsheet, resolve_current_week, MetricsEngine};
use crate::sheets::{SheetsPublisher, SheetsReport};

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub fetched: usize,
    pub stored: usize,
    pub total_in_store: i64,
    pub exported_to: Option<String>,
    pub sheets: Option<SheetsReport>,
}

/// Pulls deals from the CRM into the repository, then refreshes the JSON
/// export and the spreadsheet. Runs on a timer and on demand from `POST /sync`.
pub struct DealSyncer {
    cfg: Config,
    crm: Arc<CrmClient>,
    repo: DealRepository,
    engine: Arc<MetricsEngine>,
    health: Arc<HealthState>,
    sheets: Option<SheetsPublisher>,
}

/// Releases the health sync slot when dropped, including on early return.
struct SyncSlot<'a>(&'a HealthState);

impl Drop for SyncSlot<'_> {
    fn drop(&mut self) {
        self.0.end_sync();
    }
}

impl DealSyncer {
    pub fn new(
        cfg: Config,
        crm: Arc<CrmClient>,
        repo: DealRepository,
        engine: Arc<MetricsEngine>,
        health: Arc<HealthState>,
        sheets: Option<SheetsPublisher>,
    ) -> Self {
        Self { cfg, crm, repo, engine, health, sheets }
    }

    pub async fn run(self: Arc<Self>) {
        if self.cfg.sync_interval_secs == 0 {
            info!("SYNC_INTERVAL_SECS=0, background sync disabled; use POST /sync");
            return;
        }

        // First tick fires immediately, so the store is populated at startup.
        let mut ticker = interval(Duration::from_secs(self.cfg.sync_interval_secs));
        loop {
            ticker.tick().await;
            match self.sync_once().await {
                Ok(_) => {}
                Err(AppError::SyncInProgress) => warn!("Skipping scheduled sync, previous one still running"),
                Err(e) => error!("Deal sync failed: {e}"),
            }
        }
    }

    pub async fn sync_once(&self) -> Result<SyncReport> {
        if !self.health.try_begin_sync() {
            return Err(AppError::SyncInProgress);
        }
        let _slot = SyncSlot(&self.health);

        match self.sync_inner().await {
            Ok(report) => {
                self.health.record_success(now_secs(), report.stored as u64);
                info!(
                    fetched = report.fetched,
                    stored = report.stored,
                    total = report.total_in_store,
                    "Deal sync complete: {} fetched, {} stored, {} in store",
                    report.fetched,
                    report.stored,
                    report.total_in_store,
                );
                Ok(report)
            }
            Err(e) => {
                self.health.record_failure(e.to_string());
                Err(e)
            }
        }
    }

    async fn sync_inner(&self) -> Result<SyncReport> {
        let deals = self.crm.fetch_all_deals_with_history().await?;
        let stored = self.repo.upsert_deals(&deals).await?;
        let total_in_store = self.repo.count().await?;

        let mut report = SyncReport {
            fetched: deals.len(),
            stored,
            total_in_store,
            exported_to: None,
            sheets: None,
        };
        if self.cfg.metrics_export_path.is_none() && self.sheets.is_none() {
            return Ok(report);
        }

        // Outputs are computed over the whole store, not just this fetch.
        // Their failures are logged and do not undo a good sync.
        let all_deals = self.repo.load_all().await?;
        let window = resolve_current_week(self.cfg.report_weeks_back);
        let metrics = self.engine.compute_for_window(&all_deals, &window);

        if let Some(path) = &self.cfg.metrics_export_path {
            match write_weekly_json(path, &metrics).await {
                Ok(()) => {
                    info!(path = %path, week = %window.label, "Weekly metrics exported");
                    report.exported_to = Some(path.clone());
                }
                Err(e) => warn!("Weekly metrics export to {path} failed: {e}"),
            }
        }

        if let Some(sheets) = &self.sheets {
            let due = self.engine.due_summary(&all_deals, Local::now().date_naive());
            let rows = format_for_spreadsheet(&metrics);
            match sheets.publish(&all_deals, &rows, &due).await {
                Ok(sheets_report) => report.sheets = Some(sheets_report),
                Err(e) => warn!("Spreadsheet publish failed: {e}"),
            }
        }

        Ok(report)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::CrmAuth;

    async fn offline_syncer() -> DealSyncer {
        let cfg = Config::for_tests();
        let auth = Arc::new(CrmAuth::new(&cfg, reqwest::Client::new()));
        let crm = Arc::new(CrmClient::new(&cfg, auth).unwrap());
        let repo = DealRepository::in_memory().await.unwrap();
        DealSyncer::new(cfg, crm, repo, Arc::new(MetricsEngine::default()), Arc::new(HealthState::new()), None)
    }

    #[tokio::test]
    async fn failed_sync_records_error_and_releases_slot() {
        let syncer = offline_syncer().await;
        // No tokens on disk, so the CRM call fails before any network I/O.
        let err = syncer.sync_once().await.unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
        assert!(!syncer.health.sync_in_progress());
        assert!(syncer.health.last_error().is_some());
        assert_eq!(syncer.health.last_sync_at(), 0);
    }

    #[tokio::test]
    async fn overlapping_sync_is_rejected() {
        let syncer = offline_syncer().await;
        assert!(syncer.health.try_begin_sync());
        assert!(matches!(syncer.sync_once().await, Err(AppError::SyncInProgress)));
        syncer.health.end_sync();
    }
}
