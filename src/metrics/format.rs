use serde::Serialize;

use crate::metrics::engine::WeeklyMetrics;

pub const SHEET_HEADER: [&str; 6] = [
    "Week",
    "Pipeline",
    "New Deals",
    "Closed Deals",
    "Total Movements",
    "Win %",
];

/// One presentation row of the weekly sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetRow {
    #[serde(rename = "Week")]
    pub week: String,
    #[serde(rename = "Pipeline")]
    pub pipeline: String,
    #[serde(rename = "New Deals")]
    pub new_deals: usize,
    #[serde(rename = "Closed Deals")]
    pub closed_deals: usize,
    #[serde(rename = "Total Movements")]
    pub total_movements: usize,
    #[serde(rename = "Win %")]
    pub win_percentage: String,
}

pub fn format_for_spreadsheet(metrics: &[WeeklyMetrics]) -> Vec<SheetRow> {
    metrics
        .iter()
        .map(|m| SheetRow {
            week: m.week_label.clone(),
            pipeline: m.pipeline.to_string(),
            new_deals: m.new_deals_count,
            closed_deals: m.closed_deals_count,
            total_movements: m.total_movements_count,
            win_percentage: format!("{:.1}%", m.win_percentage),
        })
        .collect()
}

/// Header plus rows as a cell grid, the shape spreadsheet range updates take.
pub fn sheet_values(rows: &[SheetRow]) -> Vec<Vec<String>> {
    let header = SHEET_HEADER.iter().map(|h| h.to_string()).collect();
    std::iter::once(header)
        .chain(rows.iter().map(|r| {
            vec![
                r.week.clone(),
                r.pipeline.clone(),
                r.new_deals.to_string(),
                r.closed_deals.to_string(),
                r.total_movements.to_string(),
                r.win_percentage.clone(),
            ]
        }))
        .collect()
}
