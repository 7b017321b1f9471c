//! Pure row and range building for the spreadsheet tabs.
//!
//! Tabs keyed by id (deals, weekly rows) are upserted: rows whose key is
//! already present are rewritten in place, the rest are appended. The
//! summary tabs are hand-built dashboards; values land three rows below a
//! marker cell such as `Sales_Summary`.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::metrics::DueSummary;
use crate::types::{DateValue, Deal, Pipeline};

pub const DEAL_COLUMNS: [&str; 8] = [
    "id",
    "deal_name",
    "amount",
    "stage",
    "contact_id",
    "contact_name",
    "closing_date",
    "stage_history",
];

pub const OVERALL_SUMMARY: &str = "Overall_Summary";
pub const DUE_TODAY_TABLE: &str = "Due_Today";

/// Rows between a marker cell and the first value row beneath it.
const MARKER_OFFSET: usize = 3;

/// A range write, in the shape `values:batchUpdate` takes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueRange {
    pub range: String,
    pub values: Vec<Vec<Value>>,
}

#[derive(Debug, Default, PartialEq)]
pub struct UpsertPlan {
    pub updates: Vec<ValueRange>,
    pub appends: Vec<Vec<Value>>,
}

/// 1-indexed column number to letters: 1 → A, 27 → AA.
pub fn column_letter(mut n: usize) -> String {
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Tab name as it must appear in A1 notation.
pub fn quote_tab(tab: &str) -> String {
    if tab.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        tab.to_string()
    } else {
        format!("'{}'", tab.replace('\'', "''"))
    }
}

/// `Deals!A5:H5`
pub fn row_range(tab: &str, row: usize, width: usize) -> String {
    format!("{}!A{row}:{}{row}", quote_tab(tab), column_letter(width))
}

pub fn deal_row(deal: &Deal) -> Vec<Value> {
    let text = |v: &Option<String>| v.clone().map_or(Value::Null, Value::String);
    let history = if deal.stage_history.is_empty() {
        Value::Null
    } else {
        serde_json::to_string(&deal.stage_history).map_or(Value::Null, Value::String)
    };
    vec![
        Value::String(deal.id.clone()),
        text(&deal.deal_name),
        deal.amount.map_or(Value::Null, Value::from),
        text(&deal.stage),
        text(&deal.contact_id),
        text(&deal.contact_name),
        date_cell(deal.closing_date.as_ref()),
        history,
    ]
}

/// Deal rows keyed by id.
pub fn deal_rows(deals: &[Deal]) -> Vec<(String, Vec<Value>)> {
    deals.iter().map(|d| (d.id.clone(), deal_row(d))).collect()
}

/// Weekly sheet rows keyed by `week|pipeline`, from a header-first grid.
pub fn weekly_rows(grid: &[Vec<String>]) -> Vec<(String, Vec<Value>)> {
    grid.iter()
        .skip(1)
        .map(|row| {
            let key = row.iter().take(2).cloned().collect::<Vec<_>>().join("|");
            (key, row.iter().cloned().map(Value::String).collect())
        })
        .collect()
}

/// Keys of the data rows of a tab (row 1 is the header), joining the first
/// `key_cols` cells with `|`.
pub fn existing_keys(grid: &[Vec<Value>], key_cols: usize) -> Vec<String> {
    grid.iter()
        .skip(1)
        .map(|row| {
            (0..key_cols)
                .map(|i| row.get(i).map(cell_text).unwrap_or_default())
                .collect::<Vec<_>>()
                .join("|")
        })
        .collect()
}

/// Split keyed rows into in-place updates and appends. Existing keys map to
/// sheet row `index + 2`; when a key repeats in `rows`, the last one wins.
pub fn plan_upsert(
    tab: &str,
    width: usize,
    existing: &[String],
    rows: Vec<(String, Vec<Value>)>,
) -> UpsertPlan {
    let mut row_of: HashMap<&str, usize> = HashMap::new();
    for (i, key) in existing.iter().enumerate() {
        if !key.is_empty() {
            row_of.entry(key.as_str()).or_insert(i + 2);
        }
    }

    let mut plan = UpsertPlan::default();
    let mut update_at: HashMap<usize, usize> = HashMap::new();
    let mut append_at: HashMap<String, usize> = HashMap::new();

    for (key, values) in rows {
        if let Some(&row) = row_of.get(key.as_str()) {
            match update_at.get(&row) {
                Some(&i) => plan.updates[i].values = vec![values],
                None => {
                    update_at.insert(row, plan.updates.len());
                    plan.updates.push(ValueRange {
                        range: row_range(tab, row, width),
                        values: vec![values],
                    });
                }
            }
        } else if let Some(&i) = append_at.get(&key) {
            plan.appends[i] = values;
        } else {
            append_at.insert(key, plan.appends.len());
            plan.appends.push(values);
        }
    }
    plan
}

/// 1-indexed `(row, col)` of the first cell whose text equals `needle`.
pub fn find_cell(grid: &[Vec<Value>], needle: &str) -> Option<(usize, usize)> {
    grid.iter().enumerate().find_map(|(r, row)| {
        row.iter()
            .position(|cell| cell.as_str() == Some(needle))
            .map(|c| (r + 1, c + 1))
    })
}

/// Start cell for values under `marker`. The column is the marker's own
/// unless `column` pins it.
pub fn anchored_range(tab: &str, grid: &[Vec<Value>], marker: &str, column: Option<usize>) -> Option<String> {
    let (row, col) = find_cell(grid, marker)?;
    Some(format!(
        "{}!{}{}",
        quote_tab(tab),
        column_letter(column.unwrap_or(col)),
        row + MARKER_OFFSET
    ))
}

pub fn summary_marker(pipeline: Pipeline) -> &'static str {
    match pipeline {
        Pipeline::Sales => "Sales_Summary",
        Pipeline::Qual => "Quals_Summary",
        Pipeline::SloMo => "Slowmo_Summary",
    }
}

pub fn overdue_marker(pipeline: Pipeline) -> &'static str {
    match pipeline {
        Pipeline::Sales => "Sales_Overdue",
        Pipeline::Qual => "Quals_Overdue",
        Pipeline::SloMo => "Slowmo_Overdue",
    }
}

/// `[total, overdue, due today]` per summary marker, overall first.
pub fn summary_blocks(due: &DueSummary) -> Vec<(&'static str, Vec<Value>)> {
    let mut blocks = vec![(
        OVERALL_SUMMARY,
        vec![due.total_deals.into(), due.total_overdue.into(), due.total_due_today.into()],
    )];
    blocks.extend(due.pipelines.iter().map(|p| {
        (
            summary_marker(p.pipeline),
            vec![p.total.into(), p.overdue.len().into(), p.due_today.len().into()],
        )
    }));
    blocks
}

/// `[deal name, stage, pipeline]` for every deal due today.
pub fn due_today_rows(due: &DueSummary) -> Vec<Vec<Value>> {
    due.due_today
        .iter()
        .map(|d| vec![opt_cell(&d.deal_name), opt_cell(&d.stage), opt_cell(&d.pipeline)])
        .collect()
}

/// `[deal name, stage, closing date]` rows for an overdue table.
pub fn overdue_rows(deals: &[Deal]) -> Vec<Vec<Value>> {
    deals
        .iter()
        .map(|d| vec![opt_cell(&d.deal_name), opt_cell(&d.stage), date_cell(d.closing_date.as_ref())])
        .collect()
}

fn opt_cell(v: &Option<String>) -> Value {
    v.clone().map_or(Value::Null, Value::String)
}

fn date_cell(v: Option<&DateValue>) -> Value {
    v.map_or(Value::Null, |d| Value::String(d.as_text()))
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsEngine;
    use crate::types::StageHistoryEntry;
    use chrono::NaiveDate;
    use serde_json::json;

    fn deal(id: &str, pipeline: &str, closing: &str) -> Deal {
        Deal {
            id: id.to_string(),
            deal_name: Some(format!("Deal {id}")),
            stage: Some("Negotiation".to_string()),
            pipeline: Some(pipeline.to_string()),
            closing_date: Some(DateValue::from(closing)),
            ..Default::default()
        }
    }

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(8), "H");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(52), "AZ");
        assert_eq!(column_letter(703), "AAA");
    }

    #[test]
    fn tab_quoting() {
        assert_eq!(quote_tab("Deals"), "Deals");
        assert_eq!(quote_tab("Weekly Metrics"), "'Weekly Metrics'");
        assert_eq!(quote_tab("Bob's"), "'Bob''s'");
        assert_eq!(row_range("Deals", 5, 8), "Deals!A5:H5");
    }

    #[test]
    fn deal_row_matches_columns() {
        let mut d = deal("5725767000000423001", "Sales", "2025-09-30");
        d.amount = Some(1200.5);
        d.contact_name = Some("Jo Doe".to_string());
        d.stage_history = vec![StageHistoryEntry {
            stage_name: Some("Won".to_string()),
            modified_time: Some(DateValue::from("2025-09-10")),
        }];
        let row = deal_row(&d);
        assert_eq!(row.len(), DEAL_COLUMNS.len());
        // Ids stay text: 19-digit CRM ids do not survive a float cell.
        assert_eq!(row[0], json!("5725767000000423001"));
        assert_eq!(row[2], json!(1200.5));
        assert_eq!(row[4], Value::Null);
        assert_eq!(row[5], json!("Jo Doe"));
        assert_eq!(row[6], json!("2025-09-30"));
        let history: Value = serde_json::from_str(row[7].as_str().unwrap()).unwrap();
        assert_eq!(history[0]["stage_name"], "Won");

        assert_eq!(deal_row(&Deal::default())[7], Value::Null);
    }

    #[test]
    fn upsert_updates_known_ids_and_appends_new_ones() {
        let grid = vec![
            vec![json!("id"), json!("deal_name")],
            vec![json!("10"), json!("old")],
            vec![],
            vec![json!(12), json!("numeric id cell")],
        ];
        let existing = existing_keys(&grid, 1);
        assert_eq!(existing, vec!["10", "", "12"]);

        let rows = vec![
            ("12".to_string(), vec![json!("12"), json!("b")]),
            ("99".to_string(), vec![json!("99"), json!("new")]),
            ("10".to_string(), vec![json!("10"), json!("a")]),
        ];
        let plan = plan_upsert("Deals", 8, &existing, rows);
        assert_eq!(
            plan.updates,
            vec![
                ValueRange { range: "Deals!A4:H4".to_string(), values: vec![vec![json!("12"), json!("b")]] },
                ValueRange { range: "Deals!A2:H2".to_string(), values: vec![vec![json!("10"), json!("a")]] },
            ]
        );
        assert_eq!(plan.appends, vec![vec![json!("99"), json!("new")]]);
    }

    #[test]
    fn repeated_keys_collapse_to_last_row() {
        let existing = vec!["1".to_string()];
        let rows = vec![
            ("1".to_string(), vec![json!("first")]),
            ("2".to_string(), vec![json!("a")]),
            ("1".to_string(), vec![json!("second")]),
            ("2".to_string(), vec![json!("b")]),
        ];
        let plan = plan_upsert("Deals", 1, &existing, rows);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].values, vec![vec![json!("second")]]);
        assert_eq!(plan.appends, vec![vec![json!("b")]]);
    }

    #[test]
    fn weekly_rows_key_on_week_and_pipeline() {
        let grid = vec![
            vec!["Week".to_string(), "Pipeline".to_string(), "Win %".to_string()],
            vec!["2025_september_week_2nd".to_string(), "Sales".to_string(), "50.0%".to_string()],
        ];
        let rows = weekly_rows(&grid);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "2025_september_week_2nd|Sales");
        assert_eq!(rows[0].1[2], json!("50.0%"));

        let sheet = vec![
            vec![json!("Week"), json!("Pipeline")],
            vec![json!("2025_september_week_2nd"), json!("Sales")],
        ];
        assert_eq!(existing_keys(&sheet, 2), vec!["2025_september_week_2nd|Sales"]);
    }

    #[test]
    fn markers_anchor_three_rows_below() {
        let grid = vec![
            vec![json!("Dashboard")],
            vec![json!(""), json!(""), json!("Sales_Summary")],
        ];
        assert_eq!(find_cell(&grid, "Sales_Summary"), Some((2, 3)));
        assert_eq!(
            anchored_range("pipeline_summary", &grid, "Sales_Summary", None).as_deref(),
            Some("pipeline_summary!C5")
        );
        assert_eq!(
            anchored_range("todos", &grid, "Sales_Summary", Some(1)).as_deref(),
            Some("todos!A5")
        );
        assert_eq!(anchored_range("todos", &grid, "Quals_Summary", None), None);
    }

    #[test]
    fn summary_and_due_tables_follow_due_summary() {
        let today = NaiveDate::from_ymd_opt(2025, 9, 10).unwrap();
        let deals = vec![
            deal("1", "Sales", "2025-09-01"),
            deal("2", "Sales", "2025-09-10"),
            deal("3", "SloMo", "2025-09-05"),
            deal("4", "Qual", "2025-12-01"),
            deal("5", "Elsewhere", "2025-09-10"),
        ];
        let due = MetricsEngine::default().due_summary(&deals, today);

        let blocks = summary_blocks(&due);
        assert_eq!(blocks[0], (OVERALL_SUMMARY, vec![json!(5), json!(2), json!(2)]));
        assert_eq!(blocks[1], ("Sales_Summary", vec![json!(2), json!(1), json!(1)]));
        assert_eq!(blocks[2], ("Quals_Summary", vec![json!(1), json!(0), json!(0)]));
        assert_eq!(blocks[3], ("Slowmo_Summary", vec![json!(1), json!(1), json!(0)]));

        let today_rows = due_today_rows(&due);
        assert_eq!(today_rows.len(), 2);
        assert_eq!(today_rows[0], vec![json!("Deal 2"), json!("Negotiation"), json!("Sales")]);
        assert_eq!(today_rows[1][2], json!("Elsewhere"));

        let slomo = &due.pipelines[2];
        assert_eq!(overdue_marker(slomo.pipeline), "Slowmo_Overdue");
        assert_eq!(
            overdue_rows(&slomo.overdue),
            vec![vec![json!("Deal 3"), json!("Negotiation"), json!("2025-09-05")]]
        );
    }
}
