use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::types::Pipeline;

/// Closed stages of one pipeline, split by outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PipelineStages {
    #[serde(default)]
    pub won: BTreeSet<String>,
    #[serde(default)]
    pub lost: BTreeSet<String>,
}

impl PipelineStages {
    fn new(won: &[&str], lost: &[&str]) -> Self {
        Self {
            won: won.iter().map(|s| s.to_string()).collect(),
            lost: lost.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Which stages count as closed, and which of those as won, per pipeline.
///
/// Closed is always `won ∪ lost`, so the won set is a subset by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTaxonomy {
    pipelines: HashMap<Pipeline, PipelineStages>,
}

impl Default for StageTaxonomy {
    fn default() -> Self {
        let pipelines = HashMap::from([
            (
                Pipeline::Sales,
                PipelineStages::new(&["Won", "Closed Won"], &["Lost", "Closed Lost"]),
            ),
            (
                Pipeline::Qual,
                PipelineStages::new(&["Qualified"], &["Disqualified", "Not Interested"]),
            ),
            (
                Pipeline::SloMo,
                PipelineStages::new(&["Won", "Closed Won"], &["Lost", "Closed Lost", "Dormant"]),
            ),
        ]);
        Self { pipelines }
    }
}

impl StageTaxonomy {
    /// Parse a taxonomy document of the form
    /// `{ "Sales": { "won": [..], "lost": [..] }, ... }`.
    /// Pipelines missing from the document have no closed stages.
    pub fn from_json(raw: &str) -> Result<Self> {
        let doc: HashMap<String, PipelineStages> = serde_json::from_str(raw)
            .map_err(|e| AppError::Config(format!("stage taxonomy: {e}")))?;
        let mut pipelines = HashMap::with_capacity(doc.len());
        for (name, stages) in doc {
            let pipeline: Pipeline = name.parse()?;
            pipelines.insert(pipeline, stages);
        }
        Ok(Self { pipelines })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("cannot read stage taxonomy {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Closed stage names for a pipeline name; empty for unknown pipelines.
    pub fn closed_stages(&self, pipeline: &str) -> BTreeSet<&str> {
        self.stages_for(pipeline)
            .map(|s| s.won.iter().chain(&s.lost).map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Won stage names for a pipeline name; empty for unknown pipelines.
    pub fn won_stages(&self, pipeline: &str) -> BTreeSet<&str> {
        self.stages_for(pipeline)
            .map(|s| s.won.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn is_closed(&self, pipeline: Pipeline, stage: &str) -> bool {
        self.pipelines
            .get(&pipeline)
            .is_some_and(|s| s.won.contains(stage) || s.lost.contains(stage))
    }

    pub fn is_won(&self, pipeline: Pipeline, stage: &str) -> bool {
        self.pipelines
            .get(&pipeline)
            .is_some_and(|s| s.won.contains(stage))
    }

    fn stages_for(&self, pipeline: &str) -> Option<&PipelineStages> {
        Pipeline::from_name(pipeline).and_then(|p| self.pipelines.get(&p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn won_is_subset_of_closed() {
        let taxonomy = StageTaxonomy::default();
        for pipeline in Pipeline::ALL {
            let closed = taxonomy.closed_stages(pipeline.as_str());
            let won = taxonomy.won_stages(pipeline.as_str());
            assert!(!won.is_empty(), "{pipeline} has no won stages");
            assert!(won.is_subset(&closed), "{pipeline}");
        }
    }

    #[test]
    fn unknown_pipeline_is_empty() {
        let taxonomy = StageTaxonomy::default();
        assert!(taxonomy.closed_stages("Enterprise").is_empty());
        assert!(taxonomy.won_stages("sales").is_empty());
    }

    #[test]
    fn membership_checks() {
        let taxonomy = StageTaxonomy::default();
        assert!(taxonomy.is_closed(Pipeline::Sales, "Lost"));
        assert!(!taxonomy.is_won(Pipeline::Sales, "Lost"));
        assert!(taxonomy.is_won(Pipeline::Sales, "Won"));
        assert!(!taxonomy.is_closed(Pipeline::Sales, "Negotiation"));
        // Stage names are case-sensitive.
        assert!(!taxonomy.is_closed(Pipeline::Sales, "won"));
    }

    #[test]
    fn loads_from_json() {
        let taxonomy = StageTaxonomy::from_json(
            r#"{ "Qual": { "won": ["Handed Over"], "lost": ["Junk"] } }"#,
        )
        .unwrap();
        assert!(taxonomy.is_won(Pipeline::Qual, "Handed Over"));
        assert!(taxonomy.is_closed(Pipeline::Qual, "Junk"));
        assert!(taxonomy.closed_stages("Sales").is_empty());
    }

    #[test]
    fn rejects_unknown_pipeline_in_json() {
        let err = StageTaxonomy::from_json(r#"{ "Enterprise": { "won": ["Won"] } }"#).unwrap_err();
        assert!(matches!(err, AppError::UnknownPipeline(name) if name == "Enterprise"));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = StageTaxonomy::from_json("{ not json").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
