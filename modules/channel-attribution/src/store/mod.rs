// Store boundary for the attribution pipeline.
//
// The pipeline only ever talks to `AttributionStore`. Production runs use
// PgAttributionStore; tests use testing::MemoryStore.

mod postgres;

pub(crate) use postgres::is_identifier;
pub use postgres::{PgAttributionStore, UpsertTable, ATTRIBUTION_TABLE, CHANNEL_REPORT_TABLE};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::types::{AttributionScore, ChannelReportRow, Conversion, SessionCost, SessionTouch};

#[async_trait]
pub trait AttributionStore: Send + Sync {
    // --- Reads ---

    /// Conversions with `conv_date` in `[start, end]`.
    async fn conversions_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Conversion>>;

    /// All session touches for the given users.
    async fn session_touches_for_users(&self, user_ids: &[String]) -> Result<Vec<SessionTouch>>;

    /// Cost rows for the given sessions.
    async fn session_costs_for_sessions(&self, session_ids: &[String]) -> Result<Vec<SessionCost>>;

    /// Persisted attribution scores for the given conversions.
    async fn scores_for_conversions(&self, conversion_ids: &[String]) -> Result<Vec<AttributionScore>>;

    // --- Upserts ---

    /// Insert or overwrite scores keyed on `(conversion_id, session_id)`.
    ///
    /// Row failures are reported in the summary rather than aborting the
    /// remaining rows. `Err` is reserved for failures that prevent any write.
    async fn upsert_scores(&self, scores: &[AttributionScore]) -> Result<UpsertSummary>;

    /// Insert or overwrite report rows keyed on `(channel_name, date)`.
    async fn upsert_channel_report(&self, rows: &[ChannelReportRow]) -> Result<UpsertSummary>;
}

/// Result of a best-effort upsert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertSummary {
    pub written: usize,
    pub failures: Vec<RowFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowFailure {
    /// Conflict key of the row, joined with `/`.
    pub key: String,
    pub error: String,
}

impl UpsertSummary {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record_failure(&mut self, key: impl Into<String>, error: impl ToString) {
        self.failures.push(RowFailure {
            key: key.into(),
            error: error.to_string(),
        });
    }
}
