use std::time::Duration;

use reqwest::Url;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::{Config, CRM_REQUEST_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::sheets::auth::SheetsAuth;
use crate::sheets::layout::ValueRange;

/// Grid size of a freshly created tab.
const NEW_TAB_ROWS: u32 = 100;
const NEW_TAB_COLS: u32 = 20;

/// Values read/write client for a single spreadsheet.
pub struct SheetsClient {
    http: reqwest::Client,
    api_url: String,
    spreadsheet_id: String,
    auth: SheetsAuth,
}

impl SheetsClient {
    pub fn new(cfg: &Config, spreadsheet_id: String, auth: SheetsAuth) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(CRM_REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            api_url: cfg.sheets_api_url.trim_end_matches('/').to_string(),
            spreadsheet_id,
            auth,
        })
    }

    pub async fn worksheet_titles(&self) -> Result<Vec<String>> {
        let url = self.endpoint(&[&self.spreadsheet_id])?;
        let req = self
            .http
            .get(url)
            .query(&[("fields", "sheets.properties.title")]);
        let body = self.send(req).await?;
        Ok(parse_sheet_titles(&body))
    }

    pub async fn add_worksheet(&self, title: &str) -> Result<()> {
        let url = self.endpoint(&[&format!("{}:batchUpdate", self.spreadsheet_id)])?;
        let body = json!({
            "requests": [{
                "addSheet": {
                    "properties": {
                        "title": title,
                        "gridProperties": { "rowCount": NEW_TAB_ROWS, "columnCount": NEW_TAB_COLS }
                    }
                }
            }]
        });
        self.send(self.http.post(url).json(&body)).await?;
        info!(tab = title, "Created spreadsheet tab");
        Ok(())
    }

    /// Creates each missing tab in `titles`.
    pub async fn ensure_worksheets(&self, titles: &[&str]) -> Result<()> {
        let existing = self.worksheet_titles().await?;
        for title in titles {
            if !existing.iter().any(|t| t == title) {
                self.add_worksheet(title).await?;
            }
        }
        Ok(())
    }

    /// Cell values of `range`, rows trimmed of trailing blanks as the API
    /// returns them. An untouched range is an empty grid.
    pub async fn get_values(&self, range: &str) -> Result<Vec<Vec<Value>>> {
        let url = self.values_url(range)?;
        let body = self.send(self.http.get(url)).await?;
        Ok(parse_value_grid(&body))
    }

    pub async fn batch_update_values(&self, data: &[ValueRange]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let url = self.endpoint(&[&self.spreadsheet_id, "values:batchUpdate"])?;
        let body = json!({ "valueInputOption": "RAW", "data": data });
        self.send(self.http.post(url).json(&body)).await?;
        debug!(ranges = data.len(), "Spreadsheet ranges updated");
        Ok(())
    }

    /// Appends rows after the last non-empty row of the table at `range`.
    pub async fn append_values(&self, range: &str, rows: Vec<Vec<Value>>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let url = self.endpoint(&[&self.spreadsheet_id, "values", &format!("{range}:append")])?;
        let req = self
            .http
            .post(url)
            .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
            .json(&json!({ "values": rows }));
        self.send(req).await?;
        debug!(range, "Spreadsheet rows appended");
        Ok(())
    }

    fn values_url(&self, range: &str) -> Result<Url> {
        self.endpoint(&[&self.spreadsheet_id, "values", range])
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        endpoint_url(&self.api_url, segments)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value> {
        let token = self.auth.access_token().await?;
        let resp = req.bearer_auth(token).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let path = resp.url().path().to_string();
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::Sheets(format!("{path} returned {status}: {text}")));
        }
        Ok(resp.json().await?)
    }
}

/// `{api}/spreadsheets/{segments..}` with each segment percent-encoded.
pub fn endpoint_url(api_url: &str, segments: &[&str]) -> Result<Url> {
    let mut url =
        Url::parse(api_url).map_err(|e| AppError::Config(format!("invalid SHEETS_API_URL {api_url}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| AppError::Config(format!("SHEETS_API_URL cannot take a path: {api_url}")))?
        .pop_if_empty()
        .push("spreadsheets")
        .extend(segments);
    Ok(url)
}

pub fn parse_sheet_titles(body: &Value) -> Vec<String> {
    body.get("sheets")
        .and_then(|s| s.as_array())
        .map(|sheets| {
            sheets
                .iter()
                .filter_map(|s| s.pointer("/properties/title").and_then(|t| t.as_str()))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_value_grid(body: &Value) -> Vec<Vec<Value>> {
    body.get("values")
        .and_then(|v| v.as_array())
        .map(|rows| {
            rows.iter()
                .map(|row| row.as_array().cloned().unwrap_or_default())
                .collect()
        })
        .unwrap_or_default()
}
