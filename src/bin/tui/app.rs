use std::collections::HashSet;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// API response types (mirror routes.rs shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DealResponse {
    pub id: String,
    pub deal_name: Option<String>,
    pub amount: Option<f64>,
    pub stage: Option<String>,
    pub contact_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WeeklyMetricsResponse {
    pub week_label: String,
    pub week_start: String,
    pub week_end: String,
    pub pipeline: String,
    pub new_deals_count: usize,
    pub closed_deals_count: usize,
    pub won_deals_count: usize,
    pub total_movements_count: usize,
    pub win_percentage: f64,
    #[serde(default)]
    pub closed_deals_list: Vec<DealResponse>,
    #[serde(default)]
    pub won_deals_list: Vec<DealResponse>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DueSummaryResponse {
    pub total_deals: usize,
    pub total_overdue: usize,
    pub total_due_today: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HealthResponse {
    pub deals_in_store: i64,
    pub sync_in_progress: bool,
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Error(String),
    Connecting,
}

/// Oldest week the dashboard will step back to.
pub const MAX_WEEKS_BACK: u32 = 52;

#[derive(Debug, Clone)]
pub struct AppState {
    pub status: ConnectionStatus,
    pub weeks_back: u32,
    pub weekly: Vec<WeeklyMetricsResponse>,
    pub due: DueSummaryResponse,
    pub health: HealthResponse,
    pub selected: usize,
    pub last_refresh: std::time::Instant,
    pub base_url: String,
}

impl AppState {
    pub fn new(base_url: String) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            weeks_back: 0,
            weekly: Vec::new(),
            due: DueSummaryResponse::default(),
            health: HealthResponse::default(),
            selected: 0,
            last_refresh: std::time::Instant::now(),
            base_url,
        }
    }

    /// One week further into the past.
    pub fn older_week(&mut self) {
        self.weeks_back = (self.weeks_back + 1).min(MAX_WEEKS_BACK);
    }

    /// One week closer to the current one.
    pub fn newer_week(&mut self) {
        self.weeks_back = self.weeks_back.saturating_sub(1);
    }

    pub fn select_next(&mut self) {
        let max = self.weekly.len().saturating_sub(1);
        self.selected = (self.selected + 1).min(max);
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn selected_metrics(&self) -> Option<&WeeklyMetricsResponse> {
        self.weekly.get(self.selected)
    }

    /// Label of the week on screen, or a placeholder before the first fetch.
    pub fn week_label(&self) -> &str {
        self.weekly.first().map_or("—", |m| m.week_label.as_str())
    }

    pub async fn refresh(&mut self, client: &reqwest::Client) {
        let weekly_url = format!("{}/metrics/weekly?weeks_back={}", self.base_url, self.weeks_back);
        let due_url = format!("{}/metrics/due", self.base_url);
        let health_url = format!("{}/health", self.base_url);

        let (weekly_res, due_res, health_res) = tokio::join!(
            client.get(&weekly_url).send(),
            client.get(&due_url).send(),
            client.get(&health_url).send(),
        );

        let weekly_resp = match weekly_res.and_then(|r| r.error_for_status()) {
            Ok(r) => r,
            Err(e) => {
                self.status = ConnectionStatus::Error(format!("{e}"));
                return;
            }
        };

        match weekly_resp.json::<Vec<WeeklyMetricsResponse>>().await {
            Ok(weekly) => {
                self.weekly = weekly;
                self.selected = self.selected.min(self.weekly.len().saturating_sub(1));
                self.status = ConnectionStatus::Connected;
                self.last_refresh = std::time::Instant::now();

                if let Ok(d) = due_res {
                    if let Ok(due) = d.json::<DueSummaryResponse>().await {
                        self.due = due;
                    }
                }
                if let Ok(h) = health_res {
                    if let Ok(health) = h.json::<HealthResponse>().await {
                        self.health = health;
                    }
                }
            }
            Err(e) => {
                self.status = ConnectionStatus::Error(format!("parse error: {e}"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

pub fn format_win_percentage(v: f64) -> String {
    format!("{v:.1}%")
}

pub fn format_amount(amount: Option<f64>) -> String {
    match amount {
        Some(a) if a >= 1_000_000.0 => format!("{:.1}M", a / 1_000_000.0),
        Some(a) if a >= 1_000.0 => format!("{:.1}k", a / 1_000.0),
        Some(a) => format!("{a:.0}"),
        None => "—".to_string(),
    }
}

/// "2025-09-08 → 2025-09-13"
pub fn format_week_range(start: &str, end: &str) -> String {
    format!("{start} → {end}")
}

/// Human label for a week label like `2025_september_week_2nd`.
pub fn humanize_week_label(label: &str) -> String {
    let parts: Vec<&str> = label.split('_').collect();
    match parts.as_slice() {
        [year, month, "week", nth] => {
            let mut month_chars = month.chars();
            let month = match month_chars.next() {
                Some(first) => first.to_uppercase().chain(month_chars).collect::<String>(),
                None => String::new(),
            };
            format!("{month} {year}, {nth} week")
        }
        _ => label.to_string(),
    }
}

/// Ids of won deals, for marking rows in the closed list.
pub fn won_ids(metrics: &WeeklyMetricsResponse) -> HashSet<&str> {
    metrics.won_deals_list.iter().map(|d| d.id.as_str()).collect()
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn week_navigation_is_bounded() {
        let mut app = AppState::new("http://localhost:8000".to_string());
        app.newer_week();
        assert_eq!(app.weeks_back, 0);
        app.older_week();
        app.older_week();
        assert_eq!(app.weeks_back, 2);
        app.weeks_back = MAX_WEEKS_BACK;
        app.older_week();
        assert_eq!(app.weeks_back, MAX_WEEKS_BACK);
    }

    #[test]
    fn selection_stays_within_rows() {
        let mut app = AppState::new(String::new());
        app.select_next();
        assert_eq!(app.selected, 0);
        app.weekly = vec![WeeklyMetricsResponse::default(); 3];
        app.select_next();
        app.select_next();
        app.select_next();
        assert_eq!(app.selected, 2);
        app.select_prev();
        assert_eq!(app.selected_metrics().map(|_| app.selected), Some(1));
    }

    #[test]
    fn formats_values() {
        assert_eq!(format_win_percentage(66.7), "66.7%");
        assert_eq!(format_win_percentage(0.0), "0.0%");
        assert_eq!(format_amount(Some(2_500_000.0)), "2.5M");
        assert_eq!(format_amount(Some(12_300.0)), "12.3k");
        assert_eq!(format_amount(Some(950.0)), "950");
        assert_eq!(format_amount(None), "—");
        assert_eq!(truncate("Acme Renewal", 6), "Acme …");
        assert_eq!(truncate("Acme", 6), "Acme");
    }

    #[test]
    fn humanizes_week_labels() {
        assert_eq!(humanize_week_label("2025_september_week_2nd"), "September 2025, 2nd week");
        assert_eq!(humanize_week_label("unexpected"), "unexpected");
    }

    #[test]
    fn parses_weekly_payload() {
        let raw = r#"[{
            "week_label": "2025_september_week_2nd",
            "week_start": "2025-09-08",
            "week_end": "2025-09-13",
            "pipeline": "Sales",
            "new_deals_count": 1,
            "closed_deals_count": 2,
            "won_deals_count": 1,
            "total_movements_count": 3,
            "win_percentage": 50.0,
            "new_deals_list": [],
            "closed_deals_list": [{"id": "D1", "deal_name": "Acme", "amount": 100.0, "stage": "Won"},
                                  {"id": "D2", "deal_name": null, "amount": null, "stage": "Lost"}],
            "won_deals_list": [{"id": "D1", "deal_name": "Acme", "amount": 100.0, "stage": "Won"}],
            "movements_list": []
        }]"#;
        let weekly: Vec<WeeklyMetricsResponse> = serde_json::from_str(raw).unwrap();
        assert_eq!(weekly[0].closed_deals_list.len(), 2);
        let won = won_ids(&weekly[0]);
        assert!(won.contains("D1"));
        assert!(!won.contains("D2"));
    }
}
