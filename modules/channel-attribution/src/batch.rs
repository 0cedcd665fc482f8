//! Splits the touchpoint set into scorer-sized batches.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashSet};

use crate::grouping::group_by_key;
use crate::types::JourneyTouchpoint;

/// Size limits for a scoring batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// A journey with at least this many touches is scored on its own.
    pub max_customer_journeys: usize,
    /// Touch budget for a packed batch.
    pub max_sessions: usize,
}

/// A unit of submission to the scorer. Journeys are never split across
/// batches.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub touchpoints: Vec<JourneyTouchpoint>,
    /// True when this batch holds a single journey isolated for its size.
    pub oversized: bool,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.touchpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.touchpoints.is_empty()
    }

    pub fn conversion_ids(&self) -> BTreeSet<&str> {
        self.touchpoints
            .iter()
            .map(|t| t.conversion_id.as_str())
            .collect()
    }

    /// Every `(conversion_id, session_id)` submitted in this batch.
    pub fn submitted_pairs(&self) -> HashSet<(&str, &str)> {
        self.touchpoints
            .iter()
            .map(|t| (t.conversion_id.as_str(), t.session_id.as_str()))
            .collect()
    }
}

/// Partition `touchpoints` into batches.
///
/// Oversized journeys come first, largest first (ties by conversion_id).
/// The rest are packed greedily in conversion_id order while the running
/// touch count stays within `max_sessions`.
pub fn split_into_batches(touchpoints: Vec<JourneyTouchpoint>, limits: &BatchLimits) -> Vec<Batch> {
    let journeys = group_by_key(touchpoints, |t| t.conversion_id.clone());

    let (mut oversized, normal): (Vec<_>, Vec<_>) = journeys
        .into_values()
        .partition(|journey| journey.len() >= limits.max_customer_journeys);
    oversized.sort_by_key(|journey| Reverse(journey.len()));

    let mut batches: Vec<Batch> = oversized
        .into_iter()
        .map(|touchpoints| Batch {
            touchpoints,
            oversized: true,
        })
        .collect();

    let mut current: Vec<JourneyTouchpoint> = Vec::new();
    for journey in normal {
        if !current.is_empty() && current.len() + journey.len() > limits.max_sessions {
            batches.push(Batch {
                touchpoints: std::mem::take(&mut current),
                oversized: false,
            });
        }
        current.extend(journey);
    }
    if !current.is_empty() {
        batches.push(Batch {
            touchpoints: current,
            oversized: false,
        });
    }

    batches
}
