use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use crate::metrics::calendar::{resolve_week, WeekWindow};
use crate::metrics::normalize::normalize;
use crate::metrics::taxonomy::StageTaxonomy;
use crate::types::{Deal, Pipeline, StageHistoryEntry};

// ---------------------------------------------------------------------------
// Output shapes
// ---------------------------------------------------------------------------

/// One pipeline's numbers for one reporting week.
#[derive(Debug, Clone, Serialize)]
pub struct WeeklyMetrics {
    pub week_label: String,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub pipeline: Pipeline,
    pub new_deals_count: usize,
    pub closed_deals_count: usize,
    pub won_deals_count: usize,
    pub total_movements_count: usize,
    pub win_percentage: f64,
    pub new_deals_list: Vec<Deal>,
    pub closed_deals_list: Vec<Deal>,
    pub won_deals_list: Vec<Deal>,
    pub movements_list: Vec<Deal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineDueSummary {
    pub pipeline: Pipeline,
    pub total: usize,
    pub overdue: Vec<Deal>,
    pub due_today: Vec<Deal>,
}

/// Closing-date snapshot relative to a given day.
#[derive(Debug, Clone, Serialize)]
pub struct DueSummary {
    pub today: NaiveDate,
    /// Every deal, including ones with no recognized pipeline.
    pub total_deals: usize,
    pub total_overdue: usize,
    pub total_due_today: usize,
    pub due_today: Vec<Deal>,
    pub pipelines: Vec<PipelineDueSummary>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Classifies deals into weekly new / closed / won / moved buckets.
///
/// Holds no mutable state; one instance can serve concurrent callers.
#[derive(Debug, Clone, Default)]
pub struct MetricsEngine {
    taxonomy: StageTaxonomy,
}

impl MetricsEngine {
    pub fn new(taxonomy: StageTaxonomy) -> Self {
        Self { taxonomy }
    }

    pub fn taxonomy(&self) -> &StageTaxonomy {
        &self.taxonomy
    }

    /// Metrics for the week `weeks_back` weeks before `today`, one entry per
    /// pipeline in [`Pipeline::ALL`] order.
    pub fn compute(&self, deals: &[Deal], weeks_back: u32, today: NaiveDate) -> Vec<WeeklyMetrics> {
        let window = resolve_week(weeks_back, today);
        self.compute_for_window(deals, &window)
    }

    pub fn compute_for_window(&self, deals: &[Deal], window: &WeekWindow) -> Vec<WeeklyMetrics> {
        Pipeline::ALL
            .into_iter()
            .map(|pipeline| self.pipeline_metrics(pipeline, deals, window))
            .collect()
    }

    fn pipeline_metrics(&self, pipeline: Pipeline, deals: &[Deal], window: &WeekWindow) -> WeeklyMetrics {
        // A deal id counts once per bucket; the first record seen for an id wins.
        let mut seen_ids: HashSet<&str> = HashSet::new();
        let pipeline_deals: Vec<&Deal> = deals
            .iter()
            .filter(|d| d.pipeline() == Some(pipeline))
            .filter(|d| seen_ids.insert(d.id.as_str()))
            .collect();

        let mut new_deals = Vec::new();
        let mut closed_deals = Vec::new();
        let mut won_deals = Vec::new();
        let mut movements = Vec::new();

        for &deal in &pipeline_deals {
            match normalize(deal.created_time.as_ref()) {
                Some(created) if window.contains(created) => new_deals.push(deal.clone()),
                Some(_) => {}
                None if deal.created_time.is_some() => {
                    debug!(deal_id = %deal.id, "unparseable created_time, skipped for new deals");
                }
                None => {}
            }

            if let Some(entry) = self.closing_entry(pipeline, deal, window) {
                closed_deals.push(deal.clone());
                let won = entry
                    .stage_name
                    .as_deref()
                    .is_some_and(|name| self.taxonomy.is_won(pipeline, name));
                if won {
                    won_deals.push(deal.clone());
                }
            }

            if first_movement(deal, window).is_some() {
                movements.push(deal.clone());
            }
        }

        WeeklyMetrics {
            week_label: window.label.clone(),
            week_start: window.start_date,
            week_end: window.end_date,
            pipeline,
            new_deals_count: new_deals.len(),
            closed_deals_count: closed_deals.len(),
            won_deals_count: won_deals.len(),
            total_movements_count: movements.len(),
            win_percentage: win_percentage(won_deals.len(), closed_deals.len()),
            new_deals_list: new_deals,
            closed_deals_list: closed_deals,
            won_deals_list: won_deals,
            movements_list: movements,
        }
    }

    /// The history entry that closed `deal` inside `window`, if any.
    ///
    /// The deal must currently sit in a closed stage. Its history is scanned
    /// in stored order and the first closed-stage entry dated inside the
    /// window wins, even if the history is not chronological.
    fn closing_entry<'a>(
        &self,
        pipeline: Pipeline,
        deal: &'a Deal,
        window: &WeekWindow,
    ) -> Option<&'a StageHistoryEntry> {
        let stage = deal.stage.as_deref()?;
        if !self.taxonomy.is_closed(pipeline, stage) {
            return None;
        }
        deal.stage_history.iter().find(|entry| {
            let closed_stage = entry
                .stage_name
                .as_deref()
                .is_some_and(|name| self.taxonomy.is_closed(pipeline, name));
            closed_stage && entry_in_window(entry, window)
        })
    }

    /// Overdue and due-today deals by closing date, with unfiltered totals.
    pub fn due_summary(&self, deals: &[Deal], today: NaiveDate) -> DueSummary {
        let mut overdue: Vec<&Deal> = Vec::new();
        let mut due_today: Vec<&Deal> = Vec::new();

        for deal in deals {
            match normalize(deal.closing_date.as_ref()) {
                Some(closing) if closing < today => overdue.push(deal),
                Some(closing) if closing == today => due_today.push(deal),
                _ => {}
            }
        }

        let pipelines = Pipeline::ALL
            .into_iter()
            .map(|pipeline| {
                let in_pipeline = |d: &&&Deal| d.pipeline() == Some(pipeline);
                PipelineDueSummary {
                    pipeline,
                    total: deals.iter().filter(|d| d.pipeline() == Some(pipeline)).count(),
                    overdue: overdue.iter().filter(in_pipeline).map(|&d| d.clone()).collect(),
                    due_today: due_today.iter().filter(in_pipeline).map(|&d| d.clone()).collect(),
                }
            })
            .collect();

        DueSummary {
            today,
            total_deals: deals.len(),
            total_overdue: overdue.len(),
            total_due_today: due_today.len(),
            due_today: due_today.into_iter().cloned().collect(),
            pipelines,
        }
    }
}

fn entry_in_window(entry: &StageHistoryEntry, window: &WeekWindow) -> bool {
    normalize(entry.modified_time.as_ref()).is_some_and(|d| window.contains(d))
}

/// First history entry of any stage dated inside the window.
fn first_movement<'a>(deal: &'a Deal, window: &WeekWindow) -> Option<&'a StageHistoryEntry> {
    deal.stage_history.iter().find(|entry| entry_in_window(entry, window))
}

/// `won / closed` as a percentage rounded to one decimal; 0 when nothing closed.
pub fn win_percentage(won: usize, closed: usize) -> f64 {
    if closed == 0 {
        return 0.0;
    }
    let pct = won as f64 / closed as f64 * 100.0;
    // Ties go to the even digit: 1/16 is 6.2, not 6.3.
    (pct * 10.0).round_ties_even() / 10.0
}
