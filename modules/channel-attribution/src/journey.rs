//! Journey construction: conversions joined to the touches that led to them.

use crate::grouping::group_by_key;
use crate::types::{Conversion, JourneyTouchpoint, SessionTouch, TIMESTAMP_FORMAT};

/// Build the touchpoint set for every conversion.
///
/// A touch belongs to a conversion when it comes from the same user and
/// happened at or before the conversion time. Conversions left with no touch
/// are dropped; a journey with a single touch is kept.
///
/// Output is grouped by conversion_id (ascending). Inside a journey, touches
/// are ordered by `(event_timestamp, session_id)` and the latest touch is
/// flagged as the converting one. When several touches share the latest
/// timestamp the lowest session_id wins.
pub fn build_journeys(
    conversions: &[Conversion],
    touches: &[SessionTouch],
) -> Vec<JourneyTouchpoint> {
    let touches_by_user = group_by_key(touches.iter(), |t| t.user_id.as_str());

    let mut pairs: Vec<(&Conversion, &SessionTouch)> = Vec::new();
    for conversion in conversions {
        let cutoff = conversion.conv_timestamp();
        let Some(user_touches) = touches_by_user.get(conversion.user_id.as_str()) else {
            continue;
        };
        pairs.extend(
            user_touches
                .iter()
                .filter(|t| t.event_timestamp() <= cutoff)
                .map(|t| (conversion, *t)),
        );
    }

    group_by_key(pairs, |(c, _)| c.conversion_id.clone())
        .into_iter()
        .flat_map(|(conversion_id, pairs)| {
            let touches = pairs.into_iter().map(|(_, t)| t).collect();
            journey_touchpoints(&conversion_id, touches)
        })
        .collect()
}

fn journey_touchpoints(conversion_id: &str, mut touches: Vec<&SessionTouch>) -> Vec<JourneyTouchpoint> {
    touches.sort_by(|a, b| {
        a.event_timestamp()
            .cmp(&b.event_timestamp())
            .then_with(|| a.session_id.cmp(&b.session_id))
    });

    let Some(last) = touches.last() else {
        return Vec::new();
    };
    let latest = last.event_timestamp();
    let terminal = touches
        .iter()
        .position(|t| t.event_timestamp() == latest)
        .unwrap_or(touches.len() - 1);

    touches
        .into_iter()
        .enumerate()
        .map(|(i, t)| JourneyTouchpoint {
            conversion_id: conversion_id.to_string(),
            session_id: t.session_id.clone(),
            timestamp: t.event_timestamp().format(TIMESTAMP_FORMAT).to_string(),
            channel_label: t.channel_name.clone(),
            holder_engagement: t.holder_engagement,
            closer_engagement: t.closer_engagement,
            conversion: i == terminal,
            impression_interaction: t.impression_interaction,
        })
        .collect()
}
