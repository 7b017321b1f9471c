use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::api::health::HealthState;
use crate::crm::{CrmAuth, CrmClient};
use crate::db::DealRepository;
use crate::error::{AppError, Result};
use crate::metrics::{
    format_for_spreadsheet, resolve_week, DueSummary, MetricsEngine, SheetRow, WeekWindow, WeeklyMetrics,
};
use crate::sync::{DealSyncer, SyncReport};
use crate::types::{Deal, Pipeline};

#[derive(Clone)]
pub struct ApiState {
    pub repo: DealRepository,
    pub engine: Arc<MetricsEngine>,
    pub syncer: Arc<DealSyncer>,
    pub crm: Arc<CrmClient>,
    pub auth: Arc<CrmAuth>,
    pub health: Arc<HealthState>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/deals", get(get_deals))
        .route("/stages", get(get_stages))
        .route("/crm/stages", get(get_crm_stages))
        .route("/metrics/week", get(get_week))
        .route("/metrics/weekly", get(get_weekly_metrics))
        .route("/metrics/weekly/sheet", get(get_weekly_sheet))
        .route("/metrics/due", get(get_due_summary))
        .route("/sync", post(post_sync))
        .route("/auth/url", get(get_auth_url))
        .route("/auth/callback", get(get_auth_callback))
        .route("/auth/refresh", post(post_auth_refresh))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct WeeklyQuery {
    pub weeks_back: Option<u32>,
    pub pipeline: Option<String>,
    /// `YYYY-MM-DD`; defaults to the server's local date.
    pub today: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DueQuery {
    pub today: Option<String>,
}

#[derive(Deserialize)]
pub struct AuthCallbackQuery {
    pub code: String,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub deals_in_store: i64,
    pub sync_in_progress: bool,
    pub last_sync_at: Option<u64>,
    pub last_sync_deals: u64,
    pub last_error: Option<String>,
}

#[derive(Serialize)]
pub struct WeekResponse {
    #[serde(flatten)]
    pub window: WeekWindow,
    /// Local-midnight epoch seconds of `start_date` / `end_date`.
    pub start_timestamp: Option<i64>,
    pub end_timestamp: Option<i64>,
}

#[derive(Serialize)]
pub struct StagesResponse {
    pub pipeline: Pipeline,
    pub closed: Vec<String>,
    pub won: Vec<String>,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub message: String,
    pub expiry_time: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>> {
    let deals_in_store = state.repo.count().await?;
    let last_sync_at = Some(state.health.last_sync_at()).filter(|&t| t > 0);
    Ok(Json(HealthResponse {
        deals_in_store,
        sync_in_progress: state.health.sync_in_progress(),
        last_sync_at,
        last_sync_deals: state.health.last_sync_deals(),
        last_error: state.health.last_error(),
    }))
}

async fn get_deals(State(state): State<ApiState>) -> Result<Json<Vec<Deal>>> {
    Ok(Json(state.repo.load_all().await?))
}

async fn get_stages(State(state): State<ApiState>) -> Json<Vec<StagesResponse>> {
    let taxonomy = state.engine.taxonomy();
    let stages = Pipeline::ALL
        .into_iter()
        .map(|pipeline| StagesResponse {
            pipeline,
            closed: taxonomy
                .closed_stages(pipeline.as_str())
                .into_iter()
                .map(String::from)
                .collect(),
            won: taxonomy
                .won_stages(pipeline.as_str())
                .into_iter()
                .map(String::from)
                .collect(),
        })
        .collect();
    Json(stages)
}

/// Stage names as currently configured in the CRM, for checking the
/// taxonomy against.
async fn get_crm_stages(State(state): State<ApiState>) -> Result<Json<Vec<String>>> {
    Ok(Json(state.crm.fetch_stages().await?))
}

async fn get_week(Query(params): Query<WeeklyQuery>) -> Result<Json<WeekResponse>> {
    let today = resolve_today(params.today.as_deref())?;
    let window = resolve_week(params.weeks_back.unwrap_or(0), today);
    Ok(Json(WeekResponse {
        start_timestamp: window.start_timestamp(),
        end_timestamp: window.end_timestamp(),
        window,
    }))
}

async fn get_weekly_metrics(
    State(state): State<ApiState>,
    Query(params): Query<WeeklyQuery>,
) -> Result<Json<Vec<WeeklyMetrics>>> {
    let metrics = weekly_metrics(&state, &params).await?;
    Ok(Json(metrics))
}

async fn get_weekly_sheet(
    State(state): State<ApiState>,
    Query(params): Query<WeeklyQuery>,
) -> Result<Json<Vec<SheetRow>>> {
    let metrics = weekly_metrics(&state, &params).await?;
    Ok(Json(format_for_spreadsheet(&metrics)))
}

async fn get_due_summary(
    State(state): State<ApiState>,
    Query(params): Query<DueQuery>,
) -> Result<Json<DueSummary>> {
    let today = resolve_today(params.today.as_deref())?;
    let deals = state.repo.load_all().await?;
    Ok(Json(state.engine.due_summary(&deals, today)))
}

async fn post_sync(State(state): State<ApiState>) -> Result<Json<SyncReport>> {
    Ok(Json(state.syncer.sync_once().await?))
}

async fn get_auth_url(State(state): State<ApiState>) -> Result<Redirect> {
    Ok(Redirect::temporary(&state.auth.authorization_url()?))
}

async fn get_auth_callback(
    State(state): State<ApiState>,
    Query(params): Query<AuthCallbackQuery>,
) -> Result<Json<AuthResponse>> {
    let tokens = state.auth.exchange_code(&params.code).await?;
    Ok(Json(AuthResponse {
        message: "Tokens saved successfully".to_string(),
        expiry_time: tokens.expiry_time,
    }))
}

async fn post_auth_refresh(State(state): State<ApiState>) -> Result<Json<AuthResponse>> {
    let tokens = state.auth.refresh().await?;
    Ok(Json(AuthResponse {
        message: "Access token refreshed".to_string(),
        expiry_time: tokens.expiry_time,
    }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn weekly_metrics(state: &ApiState, params: &WeeklyQuery) -> Result<Vec<WeeklyMetrics>> {
    // Validate before touching the database.
    let pipeline = params
        .pipeline
        .as_deref()
        .map(str::parse::<Pipeline>)
        .transpose()?;
    let today = resolve_today(params.today.as_deref())?;

    let deals = state.repo.load_all().await?;
    let metrics = state
        .engine
        .compute(&deals, params.weeks_back.unwrap_or(0), today);
    Ok(filter_pipeline(metrics, pipeline))
}

fn filter_pipeline(metrics: Vec<WeeklyMetrics>, pipeline: Option<Pipeline>) -> Vec<WeeklyMetrics> {
    match pipeline {
        Some(p) => metrics.into_iter().filter(|m| m.pipeline == p).collect(),
        None => metrics,
    }
}

fn resolve_today(raw: Option<&str>) -> Result<NaiveDate> {
    match raw {
        None => Ok(Local::now().date_naive()),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| AppError::InvalidRequest(format!("today must be YYYY-MM-DD, got {s:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn today_override_is_strict() {
        assert_eq!(
            resolve_today(Some("2025-09-10")).unwrap(),
            NaiveDate::from_ymd_opt(2025, 9, 10).unwrap()
        );
        assert!(matches!(resolve_today(Some("10/09/2025")), Err(AppError::InvalidRequest(_))));
        assert!(resolve_today(None).is_ok());
    }

    #[test]
    fn pipeline_filter_keeps_requested_pipeline() {
        let today = NaiveDate::from_ymd_opt(2025, 9, 10).unwrap();
        let metrics = MetricsEngine::default().compute(&[], 0, today);

        let qual = filter_pipeline(metrics.clone(), Some(Pipeline::Qual));
        assert_eq!(qual.len(), 1);
        assert_eq!(qual[0].pipeline, Pipeline::Qual);
        assert_eq!(filter_pipeline(metrics, None).len(), 3);
    }

    #[test]
    fn unknown_pipeline_is_a_contract_error() {
        let err = "Enterprise".parse::<Pipeline>().unwrap_err();
        assert!(matches!(err, AppError::UnknownPipeline(_)));
    }
}
