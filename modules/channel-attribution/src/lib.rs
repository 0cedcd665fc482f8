//! Multi-touch channel attribution.
//!
//! Builds customer journeys from conversion and session tables, scores them
//! in bounded batches with the IHC attribution API, and reports cost and
//! attributed revenue per channel and day.

pub mod batch;
pub mod config;
pub mod error;
pub mod extract;
pub mod grouping;
pub mod journey;
pub mod pipeline;
pub mod report;
pub mod scoring;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod types;

pub use batch::{split_into_batches, Batch, BatchLimits};
pub use config::{PipelineConfig, RunConfig, ScorerConfig};
pub use error::{ConfigError, PipelineError};
pub use extract::{DateWindow, ExtractedData};
pub use journey::build_journeys;
pub use pipeline::{Pipeline, RunReport, RunStatus};
pub use report::build_channel_report;
pub use scoring::{AttributionScorer, BatchOutcome, BatchStatus};
pub use store::{AttributionStore, PgAttributionStore, UpsertSummary};
pub use types::{
    AttributionScore, ChannelReportRow, Conversion, JourneyTouchpoint, SessionCost, SessionTouch,
};
