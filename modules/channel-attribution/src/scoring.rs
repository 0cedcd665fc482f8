//! Scoring: submit batches to the attribution scorer and persist the results.

use std::collections::HashSet;

use async_trait::async_trait;
use ihc_client::{IhcClient, IhcError, IhcResponse, IhcScore};
use tracing::{info, warn};

use crate::batch::Batch;
use crate::store::{AttributionStore, UpsertSummary};
use crate::types::AttributionScore;

/// The external scorer, seen as a function over one batch.
#[async_trait]
pub trait AttributionScorer: Send + Sync {
    async fn score(&self, batch: &Batch) -> Result<IhcResponse, IhcError>;
}

#[async_trait]
impl AttributionScorer for IhcClient {
    async fn score(&self, batch: &Batch) -> Result<IhcResponse, IhcError> {
        self.compute_ihc(&batch.touchpoints).await
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub index: usize,
    pub conversions: usize,
    pub touchpoints: usize,
    pub status: BatchStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchStatus {
    /// Scores were accepted and written. Row-level write failures, if any,
    /// are listed in the summary.
    Scored { summary: UpsertSummary },
    /// The scorer reported rejected records. Nothing was written.
    Rejected { reasons: Vec<String> },
    /// Transport, protocol or store failure. Nothing was written and the
    /// batch can be retried by re-running the window.
    Failed { error: String },
}

impl BatchOutcome {
    /// True when every score for this batch reached the store.
    pub fn is_clean(&self) -> bool {
        matches!(&self.status, BatchStatus::Scored { summary } if summary.is_clean())
    }
}

// ---------------------------------------------------------------------------
// Scoring a batch
// ---------------------------------------------------------------------------

/// Score one batch and upsert its scores.
///
/// Never fails: every problem is folded into the returned outcome so one
/// batch cannot stop its siblings.
pub async fn score_batch(
    store: &dyn AttributionStore,
    scorer: &dyn AttributionScorer,
    index: usize,
    batch: &Batch,
) -> BatchOutcome {
    let outcome = |status| BatchOutcome {
        index,
        conversions: batch.conversion_ids().len(),
        touchpoints: batch.len(),
        status,
    };

    let scores = match scorer.score(batch).await {
        Ok(IhcResponse::Scored { status_code, scores }) => {
            info!(batch = index, status_code, scores = scores.len(), "Batch scored");
            scores
        }
        Ok(IhcResponse::PartialFailure { errors }) => {
            let reasons: Vec<String> = errors.into_iter().map(|e| e.message).collect();
            warn!(batch = index, ?reasons, "Scorer reported partial failure, batch not written");
            return outcome(BatchStatus::Rejected { reasons });
        }
        Err(e) => {
            warn!(batch = index, error = %e, status = ?e.status(), "Scoring request failed");
            return outcome(BatchStatus::Failed {
                error: e.to_string(),
            });
        }
    };

    let scores = match validate_scores(batch, scores) {
        Ok(scores) => scores,
        Err(e) => {
            warn!(batch = index, error = %e, "Scorer returned invalid scores, batch not written");
            return outcome(BatchStatus::Failed { error: e });
        }
    };

    match store.upsert_scores(&scores).await {
        Ok(summary) => {
            if !summary.is_clean() {
                warn!(
                    batch = index,
                    written = summary.written,
                    failed = summary.failures.len(),
                    "Some attribution scores were not saved"
                );
            }
            outcome(BatchStatus::Scored { summary })
        }
        Err(e) => {
            warn!(batch = index, error = %e, "Saving attribution scores failed");
            outcome(BatchStatus::Failed {
                error: format!("{e:#}"),
            })
        }
    }
}

/// Check scorer output against the submitted batch.
///
/// Every score must name a touchpoint from the batch, carry finite weights,
/// and have `ihc` within `[0, 1]`. One bad score rejects the whole batch.
pub fn validate_scores(batch: &Batch, scores: Vec<IhcScore>) -> Result<Vec<AttributionScore>, String> {
    let submitted = batch.submitted_pairs();
    let mut seen: HashSet<(&str, &str)> = HashSet::with_capacity(scores.len());

    for score in &scores {
        let pair = (score.conversion_id.as_str(), score.session_id.as_str());
        if !submitted.contains(&pair) {
            return Err(format!(
                "score for {}/{} does not match any submitted touchpoint",
                score.conversion_id, score.session_id
            ));
        }
        let weights = [score.initializer, score.holder, score.closer, score.ihc];
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(format!(
                "score for {}/{} has a non-finite weight",
                score.conversion_id, score.session_id
            ));
        }
        if !(0.0..=1.0).contains(&score.ihc) {
            return Err(format!(
                "score for {}/{} has ihc {} outside [0, 1]",
                score.conversion_id, score.session_id, score.ihc
            ));
        }
        if !seen.insert(pair) {
            return Err(format!(
                "duplicate score for {}/{}",
                score.conversion_id, score.session_id
            ));
        }
    }

    Ok(scores.into_iter().map(AttributionScore::from).collect())
}
