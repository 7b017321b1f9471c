use crate::error::{AppError, Result};

pub const CRM_API_URL: &str = "https://www.zohoapis.in/bigin/v2";
pub const CRM_ACCOUNTS_URL: &str = "https://accounts.zoho.in/oauth/v2";
pub const CRM_SCOPE: &str = "ZohoBigin.modules.ALL,ZohoBigin.settings.ALL";

/// Fields requested for every deal on the `Pipelines` listing.
pub const CRM_DEAL_FIELDS: &str =
    "Deal_Name,Id,Stage,Amount,Closing_Date,Contact_Name,Pipeline,Created_Time,Modified_Time";

/// Fields requested for each stage-history entry.
pub const CRM_HISTORY_FIELDS: &str = "Stage,Modified_Time,Changed_By";

/// Timeout for a single CRM request (seconds).
pub const CRM_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound on pages walked in one sync. Guards against a CRM that keeps
/// returning the same `next_page_token`.
pub const CRM_MAX_PAGES: usize = 1000;

/// Access tokens are refreshed this many seconds before their stated expiry.
pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

pub const SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4";
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Lifetime requested for a service-account assertion (Google caps it at 1h).
pub const SHEETS_ASSERTION_TTL_SECS: i64 = 3600;

// Worksheet tabs written after each sync.
pub const DEALS_TAB: &str = "Deals";
pub const WEEKLY_TAB: &str = "Weekly_Metrics";
pub const SUMMARY_TAB: &str = "pipeline_summary";
pub const TODOS_TAB: &str = "todos_summary";

#[derive(Debug, Clone)]
pub struct Config {
    pub crm_api_url: String,
    pub crm_accounts_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Where OAuth tokens are persisted between runs (TOKEN_PATH).
    pub token_path: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Background sync period; 0 leaves syncing to `POST /sync` (SYNC_INTERVAL_SECS).
    pub sync_interval_secs: u64,
    /// Optional JSON override of the built-in stage taxonomy (STAGE_TAXONOMY_PATH).
    pub taxonomy_path: Option<String>,
    /// Weekly metrics are written here after every sync when set (METRICS_EXPORT_PATH).
    pub metrics_export_path: Option<String>,
    /// Which week the post-sync export reports on, 0 = current (REPORT_WEEKS_BACK).
    pub report_weeks_back: u32,
    /// Target spreadsheet; publishing is off when unset (SPREADSHEET_ID).
    pub spreadsheet_id: Option<String>,
    /// Service-account key JSON (SHEETS_CREDENTIALS_PATH).
    pub sheets_credentials_path: String,
    pub sheets_api_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            crm_api_url: std::env::var("CRM_API_URL").unwrap_or_else(|_| CRM_API_URL.to_string()),
            crm_accounts_url: std::env::var("CRM_ACCOUNTS_URL")
                .unwrap_or_else(|_| CRM_ACCOUNTS_URL.to_string()),
            client_id: std::env::var("CRM_CLIENT_ID").unwrap_or_default(),
            client_secret: std::env::var("CRM_CLIENT_SECRET").unwrap_or_default(),
            redirect_uri: std::env::var("CRM_REDIRECT_URI")
                .unwrap_or_else(|_| "http://localhost:8000/auth/callback".to_string()),
            token_path: std::env::var("TOKEN_PATH")
                .unwrap_or_else(|_| "keys/crm_tokens.json".to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "deals.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            sync_interval_secs: std::env::var("SYNC_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse::<u64>()
                .map_err(|_| {
                    AppError::Config("SYNC_INTERVAL_SECS must be a whole number of seconds".to_string())
                })?,
            taxonomy_path: non_empty_var("STAGE_TAXONOMY_PATH"),
            metrics_export_path: non_empty_var("METRICS_EXPORT_PATH"),
            report_weeks_back: std::env::var("REPORT_WEEKS_BACK")
                .unwrap_or_else(|_| "0".to_string())
                .parse::<u32>()
                .map_err(|_| {
                    AppError::Config("REPORT_WEEKS_BACK must be a non-negative integer".to_string())
                })?,
            spreadsheet_id: non_empty_var("SPREADSHEET_ID"),
            sheets_credentials_path: std::env::var("SHEETS_CREDENTIALS_PATH")
                .unwrap_or_else(|_| "keys/spreadsheet_service_account.json".to_string()),
            sheets_api_url: std::env::var("SHEETS_API_URL").unwrap_or_else(|_| SHEETS_API_URL.to_string()),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
impl Config {
    /// Offline defaults: unreachable CRM, no background sync, no export.
    pub fn for_tests() -> Self {
        Self {
            crm_api_url: "http://127.0.0.1:9".to_string(),
            crm_accounts_url: "http://127.0.0.1:9".to_string(),
            client_id: "test-client".to_string(),
            client_secret: "test-secret".to_string(),
            redirect_uri: "http://localhost:8000/auth/callback".to_string(),
            token_path: std::env::temp_dir()
                .join(format!("pulse-{}-absent", std::process::id()))
                .join("tokens.json")
                .display()
                .to_string(),
            log_level: "info".to_string(),
            db_path: ":memory:".to_string(),
            api_port: 8000,
            sync_interval_secs: 0,
            taxonomy_path: None,
            metrics_export_path: None,
            report_weeks_back: 0,
            spreadsheet_id: None,
            sheets_credentials_path: "keys/absent.json".to_string(),
            sheets_api_url: "http://127.0.0.1:9/v4".to_string(),
        }
    }
}
