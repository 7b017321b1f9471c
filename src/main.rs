mod api;
mod config;
mod crm;
mod db;
mod error;
mod export;
mod metrics;
mod sheets;
mod sync;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, CRM_REQUEST_TIMEOUT_SECS};
use crate::crm::{CrmAuth, CrmClient};
use crate::db::DealRepository;
use crate::error::Result;
use crate::metrics::{MetricsEngine, StageTaxonomy};
use crate::sheets::{ServiceAccountKey, SheetsAuth, SheetsClient, SheetsPublisher};
use crate::sync::DealSyncer;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let repo = DealRepository::connect(&cfg.db_path).await?;
    info!("{} deals in store", repo.count().await?);

    // --- Stage taxonomy ---
    let taxonomy = match &cfg.taxonomy_path {
        Some(path) => {
            let t = StageTaxonomy::from_json_file(path)?;
            info!("Stage taxonomy loaded from {path}");
            t
        }
        None => {
            info!("STAGE_TAXONOMY_PATH not set, using built-in stage taxonomy");
            StageTaxonomy::default()
        }
    };
    let engine = Arc::new(MetricsEngine::new(taxonomy));
    let health = Arc::new(HealthState::new());

    // --- CRM ---
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(CRM_REQUEST_TIMEOUT_SECS))
        .build()?;
    let auth = Arc::new(CrmAuth::new(&cfg, http.clone()));
    let crm = Arc::new(CrmClient::new(&cfg, Arc::clone(&auth))?);

    // --- Spreadsheet (optional) ---
    let sheets = match &cfg.spreadsheet_id {
        Some(id) => {
            let key = ServiceAccountKey::from_file(&cfg.sheets_credentials_path).await?;
            let client = SheetsClient::new(&cfg, id.clone(), SheetsAuth::new(key, http)?)?;
            info!("Publishing to spreadsheet {id}");
            Some(SheetsPublisher::new(client))
        }
        None => {
            info!("SPREADSHEET_ID not set, spreadsheet publishing disabled");
            None
        }
    };

    // Deal syncer (background, every SYNC_INTERVAL_SECS)
    let syncer = Arc::new(DealSyncer::new(
        cfg.clone(),
        Arc::clone(&crm),
        repo.clone(),
        Arc::clone(&engine),
        Arc::clone(&health),
        sheets,
    ));
    tokio::spawn(Arc::clone(&syncer).run());

    // HTTP API server
    let api_state = ApiState {
        repo,
        engine,
        syncer,
        crm,
        auth,
        health,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
