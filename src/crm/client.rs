use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{Config, CRM_DEAL_FIELDS, CRM_HISTORY_FIELDS, CRM_MAX_PAGES, CRM_REQUEST_TIMEOUT_SECS};
use crate::crm::auth::CrmAuth;
use crate::error::{AppError, Result};
use crate::types::{DateValue, Deal, StageHistoryEntry};

/// Read-only client for the CRM's deal ("Pipelines") module.
pub struct CrmClient {
    http: reqwest::Client,
    api_url: String,
    auth: Arc<CrmAuth>,
}

impl CrmClient {
    pub fn new(cfg: &Config, auth: Arc<CrmAuth>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(CRM_REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            api_url: cfg.crm_api_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    /// Every deal record, walking `next_page_token` until the CRM stops
    /// returning one.
    pub async fn fetch_all_deals(&self) -> Result<Vec<Value>> {
        let mut deals = Vec::new();
        let mut page_token: Option<String> = None;

        for page in 1..=CRM_MAX_PAGES {
            let body = self.get_json(self.deals_page(page_token.as_deref())).await?;
            let items = body
                .get("data")
                .and_then(|d| d.as_array())
                .cloned()
                .unwrap_or_default();
            deals.extend(items);
            debug!(page, total = deals.len(), "Fetched CRM deal page");

            page_token = next_page_token(&body);
            if page_token.is_none() {
                return Ok(deals);
            }
        }

        warn!("Stopped paging after {CRM_MAX_PAGES} pages; result may be incomplete");
        Ok(deals)
    }

    pub async fn fetch_stage_history(&self, deal_id: &str) -> Result<Vec<StageHistoryEntry>> {
        let req = self
            .http
            .get(format!("{}/Pipelines/{}/Stage_History", self.api_url, deal_id))
            .query(&[("fields", CRM_HISTORY_FIELDS)]);
        let body = self.get_json(req).await?;
        Ok(parse_stage_history(&body))
    }

    /// Stage names configured on the CRM's deal module, in pick-list order.
    pub async fn fetch_stages(&self) -> Result<Vec<String>> {
        let req = self
            .http
            .get(format!("{}/settings/fields", self.api_url))
            .query(&[("module", "Pipelines")]);
        let body = self.get_json(req).await?;
        Ok(parse_stage_field(&body))
    }

    fn deals_page(&self, page_token: Option<&str>) -> reqwest::RequestBuilder {
        let req = self
            .http
            .get(format!("{}/Pipelines", self.api_url))
            .query(&[("fields", CRM_DEAL_FIELDS)]);
        match page_token {
            Some(token) => req.query(&[("page_token", token)]),
            None => req,
        }
    }

    /// All deals with their stage history attached. A deal whose history
    /// cannot be fetched keeps an empty history rather than failing the sync.
    pub async fn fetch_all_deals_with_history(&self) -> Result<Vec<Deal>> {
        let raw = self.fetch_all_deals().await?;
        let total = raw.len();
        let mut deals = Vec::with_capacity(total);
        let mut skipped = 0usize;

        for (i, item) in raw.iter().enumerate() {
            let Some(mut deal) = parse_crm_deal(item) else {
                skipped += 1;
                continue;
            };
            debug!("[{}/{}] Fetching stage history for deal {}", i + 1, total, deal.id);
            match self.fetch_stage_history(&deal.id).await {
                Ok(history) => deal.stage_history = history,
                Err(e) => warn!(deal_id = %deal.id, "Stage history fetch failed: {e}"),
            }
            deals.push(deal);
        }

        info!(fetched = deals.len(), skipped, "CRM fetch complete");
        Ok(deals)
    }

    async fn get_json(&self, req: reqwest::RequestBuilder) -> Result<Value> {
        let token = self.auth.access_token().await?;
        let resp = req
            .header("Authorization", format!("Zoho-oauthtoken {token}"))
            .send()
            .await?;

        let status = resp.status();
        // The CRM answers an empty page or history with 204 and no body.
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        if !status.is_success() {
            let path = resp.url().path().to_string();
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::Crm(format!("GET {path} returned {status}: {text}")));
        }
        Ok(resp.json().await?)
    }
}

fn next_page_token(body: &Value) -> Option<String> {
    body.get("info")
        .and_then(|i| i.get("next_page_token"))
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
}

/// Map a raw CRM deal record. Returns `None` only when the record has no id.
pub fn parse_crm_deal(v: &Value) -> Option<Deal> {
    let id = match v.get("id")? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    let contact = v.get("Contact_Name").filter(|c| c.is_object());

    Some(Deal {
        id,
        deal_name: str_field(v, "Deal_Name"),
        amount: v
            .get("Amount")
            .and_then(|a| a.as_f64().or_else(|| a.as_str().and_then(|s| s.parse().ok()))),
        stage: str_field(v, "Stage"),
        contact_id: contact.and_then(|c| match c.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }),
        contact_name: contact.and_then(|c| str_field(c, "name")),
        pipeline: v
            .get("Pipeline")
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
            .map(|s| s.to_string()),
        closing_date: date_field(v, "Closing_Date"),
        created_time: date_field(v, "Created_Time"),
        modified_time: date_field(v, "Modified_Time"),
        stage_history: Vec::new(),
    })
}

/// Stage history entries from a `Stage_History` response body.
pub fn parse_stage_history(body: &Value) -> Vec<StageHistoryEntry> {
    body.get("data")
        .and_then(|d| d.as_array())
        .map(|entries| {
            entries
                .iter()
                .map(|e| StageHistoryEntry {
                    stage_name: str_field(e, "Stage"),
                    modified_time: date_field(e, "Modified_Time"),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Pick-list values of the `Stage` field from a `settings/fields` body.
pub fn parse_stage_field(body: &Value) -> Vec<String> {
    let Some(fields) = body.get("fields").and_then(|f| f.as_array()) else {
        return Vec::new();
    };
    fields
        .iter()
        .filter(|f| {
            f.get("field_label")
                .and_then(|l| l.as_str())
                .is_some_and(|l| l.eq_ignore_ascii_case("stage"))
        })
        .filter_map(|f| f.get("pick_list_values").and_then(|p| p.as_array()))
        .flatten()
        .filter_map(|v| str_field(v, "display_value").or_else(|| str_field(v, "actual_value")))
        .collect()
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(|s| s.as_str()).map(|s| s.to_string())
}

/// Dates are kept as the CRM sent them; the metrics normalizer interprets them.
fn date_field(v: &Value, key: &str) -> Option<DateValue> {
    v.get(key)
        .and_then(|s| s.as_str())
        .filter(|s| !s.is_empty())
        .map(DateValue::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_deal() {
        let raw = json!({
            "id": "5725767000000423001",
            "Deal_Name": "Acme rollout",
            "Amount": 12000.5,
            "Stage": "Won",
            "Closing_Date": "2025-09-30",
            "Contact_Name": { "id": "5725767000000400017", "name": "Jo Doe" },
            "Pipeline": { "name": "Sales", "id": "1" },
            "Created_Time": "2025-09-09T11:20:00+05:30",
            "Modified_Time": "2025-09-10T10:00:00+05:30"
        });
        let deal = parse_crm_deal(&raw).unwrap();
        assert_eq!(deal.id, "5725767000000423001");
        assert_eq!(deal.deal_name.as_deref(), Some("Acme rollout"));
        assert_eq!(deal.amount, Some(12000.5));
        assert_eq!(deal.contact_id.as_deref(), Some("5725767000000400017"));
        assert_eq!(deal.contact_name.as_deref(), Some("Jo Doe"));
        assert_eq!(deal.pipeline.as_deref(), Some("Sales"));
        assert_eq!(deal.closing_date, Some(DateValue::from("2025-09-30")));
        assert!(deal.stage_history.is_empty());
    }

    #[test]
    fn tolerates_sparse_deal() {
        let raw = json!({ "id": 42, "Contact_Name": null, "Pipeline": null, "Amount": "n/a" });
        let deal = parse_crm_deal(&raw).unwrap();
        assert_eq!(deal.id, "42");
        assert_eq!(deal.amount, None);
        assert_eq!(deal.contact_id, None);
        assert_eq!(deal.pipeline, None);
        assert_eq!(deal.created_time, None);
    }

    #[test]
    fn rejects_deal_without_id() {
        assert!(parse_crm_deal(&json!({ "Deal_Name": "x" })).is_none());
        assert!(parse_crm_deal(&json!({ "id": "" })).is_none());
    }

    #[test]
    fn parses_history_entries_in_stored_order() {
        let body = json!({
            "data": [
                { "Stage": "Lost", "Modified_Time": "2025-09-12T09:00:00+05:30" },
                { "Stage": "Won", "Modified_Time": "" },
                { "Modified_Time": "2025-09-01T09:00:00+05:30" }
            ]
        });
        let history = parse_stage_history(&body);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].stage_name.as_deref(), Some("Lost"));
        assert_eq!(history[1].modified_time, None);
        assert_eq!(history[2].stage_name, None);
    }

    #[test]
    fn empty_history_body() {
        assert!(parse_stage_history(&Value::Null).is_empty());
        assert!(parse_stage_history(&json!({ "data": "nope" })).is_empty());
    }

    #[test]
    fn parses_stage_pick_list() {
        let body = json!({
            "fields": [
                { "field_label": "Deal Name", "pick_list_values": [] },
                {
                    "field_label": "Stage",
                    "api_name": "Stage",
                    "pick_list_values": [
                        { "display_value": "Qualification", "actual_value": "Qualification" },
                        { "actual_value": "Closed Won" },
                        { "display_value": "Closed Lost", "actual_value": "Closed Lost" }
                    ]
                }
            ]
        });
        assert_eq!(parse_stage_field(&body), vec!["Qualification", "Closed Won", "Closed Lost"]);
        assert!(parse_stage_field(&Value::Null).is_empty());
    }

    fn offline_client() -> CrmClient {
        let cfg = Config::for_tests();
        let auth = Arc::new(CrmAuth::new(&cfg, reqwest::Client::new()));
        CrmClient::new(&cfg, auth).unwrap()
    }

    #[test]
    fn page_token_is_query_encoded() {
        let client = offline_client();
        let req = client.deals_page(Some("a+b&c=d/e")).build().unwrap();
        let url = req.url();
        assert_eq!(url.path(), "/Pipelines");
        assert!(url.as_str().contains("page_token=a%2Bb%26c%3Dd%2Fe"));

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("fields".to_string(), CRM_DEAL_FIELDS.to_string()));
        assert_eq!(pairs[1], ("page_token".to_string(), "a+b&c=d/e".to_string()));
    }

    #[test]
    fn first_page_has_no_token() {
        let req = offline_client().deals_page(None).build().unwrap();
        assert!(req.url().query_pairs().all(|(k, _)| k != "page_token"));
    }

    #[test]
    fn page_token_detection() {
        assert_eq!(
            next_page_token(&json!({ "info": { "next_page_token": "abc", "more_records": true } })),
            Some("abc".to_string())
        );
        assert_eq!(next_page_token(&json!({ "info": { "next_page_token": null } })), None);
        assert_eq!(next_page_token(&json!({ "info": { "next_page_token": "" } })), None);
        assert_eq!(next_page_token(&Value::Null), None);
    }
}
