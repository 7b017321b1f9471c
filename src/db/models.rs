use tracing::warn;

use crate::types::{DateValue, Deal, StageHistoryEntry};

/// Row of the `deals` table (see migrations/0001_create_deals.sql).
#[derive(Debug, sqlx::FromRow)]
pub struct DealRow {
    pub id: String,
    pub deal_name: Option<String>,
    pub amount: Option<f64>,
    pub stage: Option<String>,
    pub contact_id: Option<String>,
    pub contact_name: Option<String>,
    pub pipeline: Option<String>,
    pub closing_date: Option<String>,
    pub created_time: Option<String>,
    pub modified_time: Option<String>,
    pub stage_history: Option<String>,
    pub synced_at: i64,
}

impl DealRow {
    pub fn from_deal(deal: &Deal, synced_at: i64) -> serde_json::Result<Self> {
        let stage_history = if deal.stage_history.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&deal.stage_history)?)
        };
        Ok(Self {
            id: deal.id.clone(),
            deal_name: deal.deal_name.clone(),
            amount: deal.amount,
            stage: deal.stage.clone(),
            contact_id: deal.contact_id.clone(),
            contact_name: deal.contact_name.clone(),
            pipeline: deal.pipeline.clone(),
            closing_date: deal.closing_date.as_ref().map(DateValue::as_text),
            created_time: deal.created_time.as_ref().map(DateValue::as_text),
            modified_time: deal.modified_time.as_ref().map(DateValue::as_text),
            stage_history,
            synced_at,
        })
    }

    /// Corrupt history JSON loads as an empty history; the deal itself is kept.
    pub fn into_deal(self) -> Deal {
        let stage_history = match self.stage_history.as_deref() {
            None | Some("") => Vec::new(),
            Some(raw) => serde_json::from_str::<Vec<StageHistoryEntry>>(raw).unwrap_or_else(|e| {
                warn!(deal_id = %self.id, "Unreadable stage_history, treating as empty: {e}");
                Vec::new()
            }),
        };
        Deal {
            id: self.id,
            deal_name: self.deal_name,
            amount: self.amount,
            stage: self.stage,
            contact_id: self.contact_id,
            contact_name: self.contact_name,
            pipeline: self.pipeline,
            closing_date: self.closing_date.map(DateValue::Text),
            created_time: self.created_time.map(DateValue::Text),
            modified_time: self.modified_time.map(DateValue::Text),
            stage_history,
        }
    }
}
