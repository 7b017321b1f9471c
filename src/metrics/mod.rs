pub mod calendar;
pub mod engine;
pub mod format;
pub mod normalize;
pub mod taxonomy;

pub use calendar::{resolve_current_week, resolve_week, WeekWindow};
pub use engine::{DueSummary, MetricsEngine, WeeklyMetrics};
pub use format::{format_for_spreadsheet, sheet_values, SheetRow};
pub use taxonomy::StageTaxonomy;
