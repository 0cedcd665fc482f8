//! One attribution run: extract → build → split → score → report.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::batch::split_into_batches;
use crate::config::RunConfig;
use crate::error::PipelineError;
use crate::extract::extract;
use crate::journey::build_journeys;
use crate::report::{write_channel_report, ReportOutcome};
use crate::scoring::{score_batch, AttributionScorer, BatchOutcome, BatchStatus};
use crate::store::AttributionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every batch scored and every row written.
    Succeeded,
    /// The run finished but some batches or rows did not make it. Re-running
    /// the same window is safe.
    PartiallySucceeded,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub conversions: usize,
    pub touchpoints: usize,
    pub batches: Vec<BatchOutcome>,
    pub report: ReportOutcome,
    /// Human-readable problems that did not abort the run.
    pub warnings: Vec<String>,
}

pub struct Pipeline {
    store: Arc<dyn AttributionStore>,
    scorer: Arc<dyn AttributionScorer>,
    config: RunConfig,
}

impl Pipeline {
    pub fn new(store: Arc<dyn AttributionStore>, scorer: Arc<dyn AttributionScorer>, config: RunConfig) -> Self {
        Self {
            store,
            scorer,
            config,
        }
    }

    /// Run the pipeline once for the configured window.
    ///
    /// Errors only when extraction or the score read-back fails. Batch
    /// failures are collected into the report.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let window = self.config.window;
        info!(run_id = run_id.as_str(), window = %window, "Attribution run starting");

        let data = extract(self.store.as_ref(), &window).await?;

        let touchpoints = build_journeys(&data.conversions, &data.touches);
        let touchpoint_count = touchpoints.len();
        let batches = split_into_batches(touchpoints, &self.config.limits);
        info!(
            run_id = run_id.as_str(),
            touchpoints = touchpoint_count,
            batches = batches.len(),
            oversized = batches.iter().filter(|b| b.oversized).count(),
            "Journeys batched"
        );

        let store = self.store.as_ref();
        let scorer = self.scorer.as_ref();
        let concurrency = self.config.scoring_concurrency.max(1);
        let mut outcomes: Vec<BatchOutcome> = stream::iter(batches.iter().enumerate().map(
            |(index, batch)| async move { score_batch(store, scorer, index, batch).await },
        ))
        .buffer_unordered(concurrency)
        .collect()
        .await;
        outcomes.sort_by_key(|o| o.index);

        // Every batch is terminal here; the report reads back what they wrote.
        let report = write_channel_report(store, &data).await?;

        let warnings = collect_warnings(&outcomes, &report);
        let status = if warnings.is_empty() {
            RunStatus::Succeeded
        } else {
            RunStatus::PartiallySucceeded
        };

        for warning in &warnings {
            warn!(run_id = run_id.as_str(), "{warning}");
        }
        info!(
            run_id = run_id.as_str(),
            ?status,
            batches = outcomes.len(),
            clean_batches = outcomes.iter().filter(|o| o.is_clean()).count(),
            report_rows = report.rows.len(),
            "Attribution run finished"
        );

        Ok(RunReport {
            run_id,
            status,
            conversions: data.conversions.len(),
            touchpoints: touchpoint_count,
            batches: outcomes,
            report,
            warnings,
        })
    }
}

fn collect_warnings(outcomes: &[BatchOutcome], report: &ReportOutcome) -> Vec<String> {
    let mut warnings = Vec::new();

    for outcome in outcomes {
        match &outcome.status {
            BatchStatus::Scored { summary } if !summary.is_clean() => warnings.push(format!(
                "batch {}: {} of {} scores not saved",
                outcome.index,
                summary.failures.len(),
                summary.failures.len() + summary.written
            )),
            BatchStatus::Scored { .. } => {}
            BatchStatus::Rejected { reasons } => warnings.push(format!(
                "batch {}: scorer rejected records ({}), {} conversions unscored",
                outcome.index,
                reasons.join("; "),
                outcome.conversions
            )),
            BatchStatus::Failed { error } => warnings.push(format!(
                "batch {}: {error}, {} conversions unscored",
                outcome.index, outcome.conversions
            )),
        }
    }

    if !report.summary.is_clean() {
        warnings.push(format!(
            "channel report: {} of {} rows not saved",
            report.summary.failures.len(),
            report.rows.len()
        ));
    }

    warnings
}
