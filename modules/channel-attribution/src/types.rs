//! Record types flowing through the attribution pipeline.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Serialize, Serializer};

use ihc_client::IhcScore;

/// Wire format for journey timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Source records (read-only snapshots of the store)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Conversion {
    pub conversion_id: String,
    pub user_id: String,
    pub conv_date: NaiveDate,
    pub conv_time: NaiveTime,
    pub revenue: f64,
}

impl Conversion {
    pub fn conv_timestamp(&self) -> NaiveDateTime {
        self.conv_date.and_time(self.conv_time)
    }
}

/// One marketing touchpoint (a session) for a user.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SessionTouch {
    pub session_id: String,
    pub user_id: String,
    pub event_date: NaiveDate,
    pub event_time: NaiveTime,
    pub channel_name: String,
    pub holder_engagement: bool,
    pub closer_engagement: bool,
    pub impression_interaction: bool,
}

impl SessionTouch {
    pub fn event_timestamp(&self) -> NaiveDateTime {
        self.event_date.and_time(self.event_time)
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SessionCost {
    pub session_id: String,
    pub cost: f64,
}

// ---------------------------------------------------------------------------
// Journeys
// ---------------------------------------------------------------------------

/// A touchpoint as submitted to the scorer. Flags go over the wire as 0/1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JourneyTouchpoint {
    pub conversion_id: String,
    pub session_id: String,
    pub timestamp: String,
    pub channel_label: String,
    #[serde(serialize_with = "as_flag")]
    pub holder_engagement: bool,
    #[serde(serialize_with = "as_flag")]
    pub closer_engagement: bool,
    #[serde(serialize_with = "as_flag")]
    pub conversion: bool,
    #[serde(serialize_with = "as_flag")]
    pub impression_interaction: bool,
}

fn as_flag<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}

// ---------------------------------------------------------------------------
// Scores and report rows (persisted)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct AttributionScore {
    pub conversion_id: String,
    pub session_id: String,
    pub initializer: f64,
    pub holder: f64,
    pub closer: f64,
    pub ihc: f64,
}

impl From<IhcScore> for AttributionScore {
    fn from(s: IhcScore) -> Self {
        Self {
            conversion_id: s.conversion_id,
            session_id: s.session_id,
            initializer: s.initializer,
            holder: s.holder,
            closer: s.closer,
            ihc: s.ihc,
        }
    }
}

/// Aggregated metrics for one channel on one day.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ChannelReportRow {
    pub channel_name: String,
    pub date: NaiveDate,
    pub cost: f64,
    pub ihc: f64,
    pub ihc_revenue: f64,
    /// Cost per attributed order. `None` when no attribution landed here.
    #[sqlx(rename = "CPO")]
    pub cpo: Option<f64>,
    /// Return on ad spend. `None` when the channel had no cost.
    #[sqlx(rename = "ROAS")]
    pub roas: Option<f64>,
}
