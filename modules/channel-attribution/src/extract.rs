//! Journey extraction: the three source record sets for a date window.

use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use tracing::info;

use crate::error::PipelineError;
use crate::store::AttributionStore;
use crate::types::{Conversion, SessionCost, SessionTouch};

/// Inclusive date range of conversions to attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedData {
    pub conversions: Vec<Conversion>,
    pub touches: Vec<SessionTouch>,
    pub costs: Vec<SessionCost>,
}

impl ExtractedData {
    /// Distinct conversion ids, ascending.
    pub fn conversion_ids(&self) -> Vec<String> {
        distinct(self.conversions.iter().map(|c| c.conversion_id.as_str()))
    }
}

/// Read conversions in `window`, every touch of their users, and the costs of
/// those touches. Any store error is fatal for the run.
pub async fn extract(
    store: &dyn AttributionStore,
    window: &DateWindow,
) -> Result<ExtractedData, PipelineError> {
    let conversions = store
        .conversions_between(window.start, window.end)
        .await
        .map_err(PipelineError::Extraction)?;

    if conversions.is_empty() {
        info!(window = %window, "No conversions in window");
        return Ok(ExtractedData::default());
    }

    let user_ids = distinct(conversions.iter().map(|c| c.user_id.as_str()));
    let touches = store
        .session_touches_for_users(&user_ids)
        .await
        .map_err(PipelineError::Extraction)?;

    let costs = if touches.is_empty() {
        Vec::new()
    } else {
        let session_ids = distinct(touches.iter().map(|t| t.session_id.as_str()));
        store
            .session_costs_for_sessions(&session_ids)
            .await
            .map_err(PipelineError::Extraction)?
    };

    info!(
        window = %window,
        conversions = conversions.len(),
        users = user_ids.len(),
        touches = touches.len(),
        costs = costs.len(),
        "Extracted source data"
    );

    Ok(ExtractedData {
        conversions,
        touches,
        costs,
    })
}

fn distinct<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<String> {
    ids.collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}
