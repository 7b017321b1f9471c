use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{DEALS_TAB, SUMMARY_TAB, TODOS_TAB, WEEKLY_TAB};
use crate::error::Result;
use crate::metrics::{sheet_values, DueSummary, SheetRow};
use crate::sheets::client::SheetsClient;
use crate::sheets::layout::{
    anchored_range, deal_rows, due_today_rows, existing_keys, overdue_marker, overdue_rows, plan_upsert,
    quote_tab, summary_blocks, weekly_rows, ValueRange, DEAL_COLUMNS, DUE_TODAY_TABLE,
};
use crate::types::Deal;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SheetsReport {
    pub deals_updated: usize,
    pub deals_appended: usize,
    pub weekly_rows: usize,
    pub summaries_written: usize,
    pub tables_written: usize,
}

/// Mirrors the deal store, the weekly rows and the due dashboard into the
/// configured spreadsheet.
pub struct SheetsPublisher {
    client: SheetsClient,
}

impl SheetsPublisher {
    pub fn new(client: SheetsClient) -> Self {
        Self { client }
    }

    pub async fn publish(&self, deals: &[Deal], weekly: &[SheetRow], due: &DueSummary) -> Result<SheetsReport> {
        self.client
            .ensure_worksheets(&[DEALS_TAB, WEEKLY_TAB, SUMMARY_TAB, TODOS_TAB])
            .await?;

        let mut report = SheetsReport::default();

        let header: Vec<String> = DEAL_COLUMNS.iter().map(|c| c.to_string()).collect();
        let (updated, appended) = self.upsert_tab(DEALS_TAB, &header, 1, deal_rows(deals)).await?;
        report.deals_updated = updated;
        report.deals_appended = appended;

        let grid = sheet_values(weekly);
        let header = grid.first().cloned().unwrap_or_default();
        let (updated, appended) = self.upsert_tab(WEEKLY_TAB, &header, 2, weekly_rows(&grid)).await?;
        report.weekly_rows = updated + appended;

        report.summaries_written = self.write_summaries(due).await?;
        report.tables_written = self.write_todos(due).await?;

        info!(
            deals_updated = report.deals_updated,
            deals_appended = report.deals_appended,
            weekly_rows = report.weekly_rows,
            "Spreadsheet published"
        );
        Ok(report)
    }

    /// Rewrites rows whose key is already on the tab and appends the rest.
    /// An empty tab gets `header` first.
    async fn upsert_tab(
        &self,
        tab: &str,
        header: &[String],
        key_cols: usize,
        rows: Vec<(String, Vec<Value>)>,
    ) -> Result<(usize, usize)> {
        let tab_range = quote_tab(tab);
        let grid = self.client.get_values(&tab_range).await?;
        if grid.is_empty() {
            let header_row = header.iter().cloned().map(Value::String).collect();
            self.client.append_values(&tab_range, vec![header_row]).await?;
        }

        let plan = plan_upsert(tab, header.len(), &existing_keys(&grid, key_cols), rows);
        let counts = (plan.updates.len(), plan.appends.len());
        self.client.batch_update_values(&plan.updates).await?;
        self.client.append_values(&tab_range, plan.appends).await?;
        Ok(counts)
    }

    async fn write_summaries(&self, due: &DueSummary) -> Result<usize> {
        let grid = self.client.get_values(&quote_tab(SUMMARY_TAB)).await?;
        let mut data = Vec::new();
        for (marker, values) in summary_blocks(due) {
            match anchored_range(SUMMARY_TAB, &grid, marker, None) {
                Some(range) => data.push(ValueRange { range, values: vec![values] }),
                None => warn!(tab = SUMMARY_TAB, marker, "Summary marker not found, block skipped"),
            }
        }
        self.client.batch_update_values(&data).await?;
        Ok(data.len())
    }

    /// Due-today rows always start in column A; each overdue table sits
    /// under its own marker's column.
    async fn write_todos(&self, due: &DueSummary) -> Result<usize> {
        let grid = self.client.get_values(&quote_tab(TODOS_TAB)).await?;
        let mut tables = vec![(DUE_TODAY_TABLE, Some(1), due_today_rows(due))];
        tables.extend(
            due.pipelines
                .iter()
                .map(|p| (overdue_marker(p.pipeline), None, overdue_rows(&p.overdue))),
        );

        let mut data = Vec::new();
        for (marker, column, values) in tables {
            if values.is_empty() {
                continue;
            }
            match anchored_range(TODOS_TAB, &grid, marker, column) {
                Some(range) => data.push(ValueRange { range, values }),
                None => warn!(tab = TODOS_TAB, marker, "Table marker not found, table skipped"),
            }
        }
        self.client.batch_update_values(&data).await?;
        Ok(data.len())
    }
}
