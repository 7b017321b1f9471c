use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Pipeline {
    Sales,
    Qual,
    SloMo,
}

impl Pipeline {
    /// Reporting order.
    pub const ALL: [Pipeline; 3] = [Pipeline::Sales, Pipeline::Qual, Pipeline::SloMo];

    pub fn as_str(self) -> &'static str {
        match self {
            Pipeline::Sales => "Sales",
            Pipeline::Qual => "Qual",
            Pipeline::SloMo => "SloMo",
        }
    }

    /// Exact, case-sensitive match against the CRM pipeline name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }
}

impl std::fmt::Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Pipeline {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| AppError::UnknownPipeline(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Date values as they arrive from the CRM or the database
// ---------------------------------------------------------------------------

/// A date or timestamp in whichever shape the source produced it.
///
/// Deserialization tries the structured forms first, so an RFC 3339 string
/// lands in `DateTime` and a bare `YYYY-MM-DD` in `Date`. Anything else is
/// kept verbatim as `Text` and left for the normalizer to interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateValue {
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
    Text(String),
}

impl DateValue {
    /// Text form used for storage. Structured values render as ISO-8601.
    pub fn as_text(&self) -> String {
        match self {
            DateValue::DateTime(dt) => dt.to_rfc3339(),
            DateValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            DateValue::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for DateValue {
    fn from(s: &str) -> Self {
        DateValue::Text(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Deal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageHistoryEntry {
    pub stage_name: Option<String>,
    pub modified_time: Option<DateValue>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Deal {
    pub id: String,
    pub deal_name: Option<String>,
    pub amount: Option<f64>,
    pub stage: Option<String>,
    pub contact_id: Option<String>,
    pub contact_name: Option<String>,
    /// Raw pipeline name. See [`Deal::pipeline`] for the recognized set.
    pub pipeline: Option<String>,
    pub closing_date: Option<DateValue>,
    pub created_time: Option<DateValue>,
    pub modified_time: Option<DateValue>,
    #[serde(default)]
    pub stage_history: Vec<StageHistoryEntry>,
}

impl Deal {
    pub fn pipeline(&self) -> Option<Pipeline> {
        self.pipeline.as_deref().and_then(Pipeline::from_name)
    }
}
