//! Channel reporting: per-channel, per-day cost and attributed revenue.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::extract::ExtractedData;
use crate::grouping::{fold_by_key, group_by_key};
use crate::store::{AttributionStore, UpsertSummary};
use crate::types::{AttributionScore, ChannelReportRow};

#[derive(Debug, Clone, PartialEq)]
pub struct ReportOutcome {
    pub rows: Vec<ChannelReportRow>,
    pub summary: UpsertSummary,
}

/// Re-read the run's scores, build the report and upsert it.
///
/// Failing to read scores back is fatal; row write failures are returned in
/// the summary.
pub async fn write_channel_report(
    store: &dyn AttributionStore,
    data: &ExtractedData,
) -> Result<ReportOutcome, PipelineError> {
    let conversion_ids = data.conversion_ids();
    let scores = if conversion_ids.is_empty() {
        Vec::new()
    } else {
        store
            .scores_for_conversions(&conversion_ids)
            .await
            .map_err(PipelineError::ScoreReadBack)?
    };

    let rows = build_channel_report(data, &scores);
    if rows.is_empty() {
        info!("No channel activity to report");
        return Ok(ReportOutcome {
            rows,
            summary: UpsertSummary::default(),
        });
    }

    let summary = match store.upsert_channel_report(&rows).await {
        Ok(summary) => summary,
        Err(e) => {
            warn!(error = %e, "Saving channel report failed");
            let mut summary = UpsertSummary::default();
            for row in &rows {
                summary.record_failure(format!("{}/{}", row.channel_name, row.date), format!("{e:#}"));
            }
            summary
        }
    };

    info!(
        rows = rows.len(),
        scores = scores.len(),
        written = summary.written,
        failed = summary.failures.len(),
        "Channel report written"
    );

    Ok(ReportOutcome { rows, summary })
}

#[derive(Debug, Default)]
struct ChannelTotals {
    cost: f64,
    ihc: f64,
    ihc_revenue: f64,
}

impl ChannelTotals {
    fn into_row(self, channel_name: String, date: NaiveDate) -> ChannelReportRow {
        ChannelReportRow {
            channel_name,
            date,
            cost: self.cost,
            ihc: self.ihc,
            ihc_revenue: self.ihc_revenue,
            cpo: ratio(self.cost, self.ihc),
            roas: ratio(self.ihc_revenue, self.cost),
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    (denominator != 0.0).then(|| numerator / denominator)
}

/// Aggregate touches, costs, scores and revenue per `(channel_name, date)`.
///
/// Every touch counts, scored or not. Missing cost, score or revenue counts
/// as zero. Cost is summed over the joined `(touch, score)` rows, so a
/// session scored for several conversions contributes its cost once per
/// score. Rows come back in key order.
pub fn build_channel_report(data: &ExtractedData, scores: &[AttributionScore]) -> Vec<ChannelReportRow> {
    let mut costs: HashMap<&str, f64> = HashMap::with_capacity(data.costs.len());
    for cost in &data.costs {
        match costs.entry(cost.session_id.as_str()) {
            Entry::Vacant(slot) => {
                slot.insert(cost.cost);
            }
            Entry::Occupied(_) => {
                debug!(session_id = %cost.session_id, "Duplicate cost row, keeping the first");
            }
        }
    }

    let revenue: HashMap<&str, f64> = data
        .conversions
        .iter()
        .map(|c| (c.conversion_id.as_str(), c.revenue))
        .collect();

    let scores_by_session = group_by_key(scores.iter(), |s| s.session_id.as_str());

    fold_by_key(
        data.touches.iter(),
        |t| (t.channel_name.clone(), t.event_date),
        |totals: &mut ChannelTotals, touch| {
            let session_cost = costs.get(touch.session_id.as_str()).copied().unwrap_or(0.0);

            // One joined row per score, or a single unscored row.
            let session_scores = scores_by_session
                .get(touch.session_id.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            if session_scores.is_empty() {
                totals.cost += session_cost;
                return;
            }
            for score in session_scores {
                let conv_revenue = revenue.get(score.conversion_id.as_str()).copied().unwrap_or(0.0);
                totals.cost += session_cost;
                totals.ihc += score.ihc;
                totals.ihc_revenue += score.ihc * conv_revenue;
            }
        },
    )
    .into_iter()
    .map(|((channel_name, date), totals)| totals.into_row(channel_name, date))
    .collect()
}
