// Test doubles for the attribution pipeline.
//
// - MemoryStore (AttributionStore): in-memory tables with upsert semantics
// - MockScorer (AttributionScorer): even-split scores, scripted failures
//
// Plus record constructors so tests read as data.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use ihc_client::{IhcError, IhcResponse, IhcScore, PartialFailureError};

use crate::batch::Batch;
use crate::scoring::AttributionScorer;
use crate::store::{AttributionStore, UpsertSummary};
use crate::types::{AttributionScore, ChannelReportRow, Conversion, SessionCost, SessionTouch};

// ---------------------------------------------------------------------------
// Record constructors
// ---------------------------------------------------------------------------

/// `date` is `YYYY-MM-DD`, `time` is `HH:MM`.
pub fn conversion(id: &str, user: &str, date: &str, time: &str, revenue: f64) -> Conversion {
    Conversion {
        conversion_id: id.to_string(),
        user_id: user.to_string(),
        conv_date: parse_date(date),
        conv_time: parse_time(time),
        revenue,
    }
}

pub fn touch(session: &str, user: &str, date: &str, time: &str, channel: &str) -> SessionTouch {
    SessionTouch {
        session_id: session.to_string(),
        user_id: user.to_string(),
        event_date: parse_date(date),
        event_time: parse_time(time),
        channel_name: channel.to_string(),
        holder_engagement: false,
        closer_engagement: false,
        impression_interaction: false,
    }
}

pub fn cost(session: &str, cost: f64) -> SessionCost {
    SessionCost {
        session_id: session.to_string(),
        cost,
    }
}

fn parse_date(date: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("test date must be YYYY-MM-DD")
}

fn parse_time(time: &str) -> NaiveTime {
    NaiveTime::parse_from_str(time, "%H:%M").expect("test time must be HH:MM")
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    conversions: Vec<Conversion>,
    touches: Vec<SessionTouch>,
    costs: Vec<SessionCost>,
    scores: BTreeMap<(String, String), AttributionScore>,
    report: BTreeMap<(String, NaiveDate), ChannelReportRow>,
}

/// In-memory store. Reads filter like the SQL queries; upserts overwrite on
/// the same conflict keys as Postgres.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_reads: bool,
    fail_score_reads: bool,
    fail_score_writes: bool,
    fail_report_writes: bool,
    reject_score_writes_for: HashSet<String>,
    read_calls: Mutex<Vec<&'static str>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversions(self, rows: Vec<Conversion>) -> Self {
        self.tables.lock().unwrap().conversions.extend(rows);
        self
    }

    pub fn with_touches(self, rows: Vec<SessionTouch>) -> Self {
        self.tables.lock().unwrap().touches.extend(rows);
        self
    }

    pub fn with_costs(self, rows: Vec<SessionCost>) -> Self {
        self.tables.lock().unwrap().costs.extend(rows);
        self
    }

    /// Seed an already-persisted score.
    pub fn with_score(self, score: AttributionScore) -> Self {
        let key = (score.conversion_id.clone(), score.session_id.clone());
        self.tables.lock().unwrap().scores.insert(key, score);
        self
    }

    /// Make every source read fail, as if the database were unreachable.
    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    /// Make the score read-back fail.
    pub fn failing_score_reads(mut self) -> Self {
        self.fail_score_reads = true;
        self
    }

    /// Make every score upsert fail outright.
    pub fn failing_score_writes(mut self) -> Self {
        self.fail_score_writes = true;
        self
    }

    /// Make every channel report upsert fail outright.
    pub fn failing_report_writes(mut self) -> Self {
        self.fail_report_writes = true;
        self
    }

    /// Reject score rows for this conversion on write.
    pub fn rejecting_score_writes_for(mut self, conversion_id: &str) -> Self {
        self.reject_score_writes_for.insert(conversion_id.to_string());
        self
    }

    pub fn scores(&self) -> Vec<AttributionScore> {
        self.tables.lock().unwrap().scores.values().cloned().collect()
    }

    pub fn report_rows(&self) -> Vec<ChannelReportRow> {
        self.tables.lock().unwrap().report.values().cloned().collect()
    }

    /// Names of the read methods called, in order.
    pub fn read_calls(&self) -> Vec<&'static str> {
        self.read_calls.lock().unwrap().clone()
    }

    fn record_read(&self, name: &'static str) -> Result<()> {
        self.read_calls.lock().unwrap().push(name);
        if self.fail_reads {
            bail!("connection refused");
        }
        Ok(())
    }
}

#[async_trait]
impl AttributionStore for MemoryStore {
    async fn conversions_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Conversion>> {
        self.record_read("conversions_between")?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .conversions
            .iter()
            .filter(|c| c.conv_date >= start && c.conv_date <= end)
            .cloned()
            .collect())
    }

    async fn session_touches_for_users(&self, user_ids: &[String]) -> Result<Vec<SessionTouch>> {
        self.record_read("session_touches_for_users")?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .touches
            .iter()
            .filter(|t| user_ids.contains(&t.user_id))
            .cloned()
            .collect())
    }

    async fn session_costs_for_sessions(&self, session_ids: &[String]) -> Result<Vec<SessionCost>> {
        self.record_read("session_costs_for_sessions")?;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .costs
            .iter()
            .filter(|c| session_ids.contains(&c.session_id))
            .cloned()
            .collect())
    }

    async fn scores_for_conversions(&self, conversion_ids: &[String]) -> Result<Vec<AttributionScore>> {
        self.record_read("scores_for_conversions")?;
        if self.fail_score_reads {
            bail!("statement timeout");
        }
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .scores
            .values()
            .filter(|s| conversion_ids.contains(&s.conversion_id))
            .cloned()
            .collect())
    }

    async fn upsert_scores(&self, scores: &[AttributionScore]) -> Result<UpsertSummary> {
        if self.fail_score_writes {
            bail!("connection reset");
        }
        let mut tables = self.tables.lock().unwrap();
        let mut summary = UpsertSummary::default();
        for score in scores {
            let key = format!("{}/{}", score.conversion_id, score.session_id);
            if self.reject_score_writes_for.contains(&score.conversion_id) {
                summary.record_failure(key, "value violates check constraint");
                continue;
            }
            tables
                .scores
                .insert((score.conversion_id.clone(), score.session_id.clone()), score.clone());
            summary.written += 1;
        }
        Ok(summary)
    }

    async fn upsert_channel_report(&self, rows: &[ChannelReportRow]) -> Result<UpsertSummary> {
        if self.fail_report_writes {
            bail!("permission denied for table channel_reporting");
        }
        let mut tables = self.tables.lock().unwrap();
        for row in rows {
            tables
                .report
                .insert((row.channel_name.clone(), row.date), row.clone());
        }
        Ok(UpsertSummary {
            written: rows.len(),
            failures: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// MockScorer
// ---------------------------------------------------------------------------

enum Scripted {
    PartialFailure(String),
    Transport(String),
    Garbage,
}

/// Scores each journey by splitting `ihc` evenly over its touches. Batches
/// containing a scripted conversion fail the scripted way instead.
#[derive(Default)]
pub struct MockScorer {
    scripted: Vec<(String, Scripted)>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn partial_failure_for(mut self, conversion_id: &str, reason: &str) -> Self {
        self.scripted
            .push((conversion_id.to_string(), Scripted::PartialFailure(reason.to_string())));
        self
    }

    pub fn transport_failure_for(mut self, conversion_id: &str) -> Self {
        self.scripted.push((
            conversion_id.to_string(),
            Scripted::Transport("connection reset by peer".to_string()),
        ));
        self
    }

    /// Return a score for a touchpoint that was never submitted.
    pub fn garbage_for(mut self, conversion_id: &str) -> Self {
        self.scripted.push((conversion_id.to_string(), Scripted::Garbage));
        self
    }

    /// Conversion ids of every batch submitted, in call order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttributionScorer for MockScorer {
    async fn score(&self, batch: &Batch) -> Result<IhcResponse, IhcError> {
        let ids: Vec<String> = batch.conversion_ids().into_iter().map(str::to_string).collect();
        self.calls.lock().unwrap().push(ids.clone());

        for (conversion_id, behaviour) in &self.scripted {
            if !ids.contains(conversion_id) {
                continue;
            }
            match behaviour {
                Scripted::PartialFailure(reason) => {
                    return Ok(IhcResponse::PartialFailure {
                        errors: vec![PartialFailureError::from(serde_json::Value::String(
                            reason.clone(),
                        ))],
                    });
                }
                Scripted::Transport(message) => return Err(IhcError::Network(message.clone())),
                Scripted::Garbage => {
                    return Ok(IhcResponse::Scored {
                        status_code: 200,
                        scores: vec![IhcScore {
                            conversion_id: conversion_id.clone(),
                            session_id: "never-submitted".to_string(),
                            initializer: 0.0,
                            holder: 0.0,
                            closer: 0.0,
                            ihc: 1.0,
                        }],
                    });
                }
            }
        }

        let scores = batch
            .touchpoints
            .iter()
            .map(|tp| {
                let journey_len = batch
                    .touchpoints
                    .iter()
                    .filter(|other| other.conversion_id == tp.conversion_id)
                    .count();
                let share = 1.0 / journey_len as f64;
                IhcScore {
                    conversion_id: tp.conversion_id.clone(),
                    session_id: tp.session_id.clone(),
                    initializer: share / 3.0,
                    holder: share / 3.0,
                    closer: share / 3.0,
                    ihc: share,
                }
            })
            .collect();

        Ok(IhcResponse::Scored {
            status_code: 200,
            scores,
        })
    }
}
