use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::metrics::{format_for_spreadsheet, sheet_values, SheetRow, WeeklyMetrics};

/// File layout of a weekly export: full metrics, the flat sheet rows, and the
/// same rows as a header-first string grid ready to paste into a sheet.
#[derive(Debug, Serialize)]
pub struct WeeklyExport<'a> {
    pub generated_at: String,
    pub metrics: &'a [WeeklyMetrics],
    pub sheet: Vec<SheetRow>,
    pub values: Vec<Vec<String>>,
}

impl<'a> WeeklyExport<'a> {
    pub fn new(metrics: &'a [WeeklyMetrics], generated_at: String) -> Self {
        let sheet = format_for_spreadsheet(metrics);
        let values = sheet_values(&sheet);
        Self {
            generated_at,
            metrics,
            sheet,
            values,
        }
    }
}

/// Write `metrics` as pretty JSON, replacing any previous export.
pub async fn write_weekly_json(path: impl AsRef<Path>, metrics: &[WeeklyMetrics]) -> Result<()> {
    let path = path.as_ref();
    let export = WeeklyExport::new(metrics, chrono::Local::now().to_rfc3339());
    let body = serde_json::to_vec_pretty(&export)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    // Write-then-rename so readers never see a half-written file.
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
