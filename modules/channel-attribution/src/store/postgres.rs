//! Postgres-backed AttributionStore.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgArguments;
use sqlx::{PgPool, Postgres};
use tracing::{info, warn};

use super::{AttributionStore, UpsertSummary};
use crate::types::{AttributionScore, ChannelReportRow, Conversion, SessionCost, SessionTouch};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

// ---------------------------------------------------------------------------
// Upsert statements
// ---------------------------------------------------------------------------

/// A target table for insert-or-update. Every column outside the conflict
/// key is overwritten on conflict.
#[derive(Debug, Clone, Copy)]
pub struct UpsertTable {
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub conflict_key: &'static [&'static str],
}

pub const ATTRIBUTION_TABLE: UpsertTable = UpsertTable {
    table: "attribution_customer_journey",
    columns: &["conversion_id", "session_id", "initializer", "holder", "closer", "ihc"],
    conflict_key: &["conversion_id", "session_id"],
};

pub const CHANNEL_REPORT_TABLE: UpsertTable = UpsertTable {
    table: "channel_reporting",
    columns: &["channel_name", "date", "cost", "ihc", "ihc_revenue", "CPO", "ROAS"],
    conflict_key: &["channel_name", "date"],
};

impl UpsertTable {
    /// `INSERT … ON CONFLICT … DO UPDATE` for a single row.
    pub fn statement(&self, schema: &str) -> String {
        let quote = |c: &&str| format!("\"{c}\"");
        let columns: Vec<String> = self.columns.iter().map(quote).collect();
        let placeholders: Vec<String> = (1..=self.columns.len()).map(|i| format!("${i}")).collect();
        let conflict: Vec<String> = self.conflict_key.iter().map(quote).collect();
        let updates: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !self.conflict_key.contains(c))
            .map(|c| format!("\"{c}\" = EXCLUDED.\"{c}\""))
            .collect();

        format!(
            "INSERT INTO {schema}.{table} ({columns}) VALUES ({placeholders}) \
             ON CONFLICT ({conflict}) DO UPDATE SET {updates}",
            table = self.table,
            columns = columns.join(", "),
            placeholders = placeholders.join(", "),
            conflict = conflict.join(", "),
            updates = updates.join(", "),
        )
    }
}

/// A row that can be written through an [`UpsertTable`] statement. Binds
/// must follow the table's column order.
trait UpsertRow: Sync {
    const TABLE: UpsertTable;

    fn key(&self) -> String;

    fn bind<'q>(&'q self, query: PgQuery<'q>) -> PgQuery<'q>;
}

impl UpsertRow for AttributionScore {
    const TABLE: UpsertTable = ATTRIBUTION_TABLE;

    fn key(&self) -> String {
        format!("{}/{}", self.conversion_id, self.session_id)
    }

    fn bind<'q>(&'q self, query: PgQuery<'q>) -> PgQuery<'q> {
        query
            .bind(&self.conversion_id)
            .bind(&self.session_id)
            .bind(self.initializer)
            .bind(self.holder)
            .bind(self.closer)
            .bind(self.ihc)
    }
}

impl UpsertRow for ChannelReportRow {
    const TABLE: UpsertTable = CHANNEL_REPORT_TABLE;

    fn key(&self) -> String {
        format!("{}/{}", self.channel_name, self.date)
    }

    fn bind<'q>(&'q self, query: PgQuery<'q>) -> PgQuery<'q> {
        query
            .bind(&self.channel_name)
            .bind(self.date)
            .bind(self.cost)
            .bind(self.ihc)
            .bind(self.ihc_revenue)
            .bind(self.cpo)
            .bind(self.roas)
    }
}

// ---------------------------------------------------------------------------
// PgAttributionStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgAttributionStore {
    pool: PgPool,
    schema: String,
}

impl PgAttributionStore {
    /// `schema` is interpolated into SQL, so it must be a plain identifier.
    pub fn new(pool: PgPool, schema: &str) -> Result<Self> {
        if !is_identifier(schema) {
            bail!("invalid schema name: {schema:?}");
        }
        Ok(Self {
            pool,
            schema: schema.to_string(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema and tables if they do not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        let s = &self.schema;
        let statements = [
            format!("CREATE SCHEMA IF NOT EXISTS {s}"),
            format!(
                r#"CREATE TABLE IF NOT EXISTS {s}.conversions (
                    conv_id    TEXT PRIMARY KEY,
                    user_id    TEXT NOT NULL,
                    conv_date  DATE NOT NULL,
                    conv_time  TIME NOT NULL,
                    revenue    DOUBLE PRECISION NOT NULL DEFAULT 0
                )"#
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS {s}.session_sources (
                    session_id             TEXT PRIMARY KEY,
                    user_id                TEXT NOT NULL,
                    event_date             DATE NOT NULL,
                    event_time             TIME NOT NULL,
                    channel_name           TEXT NOT NULL,
                    holder_engagement      BOOLEAN NOT NULL DEFAULT FALSE,
                    closer_engagement      BOOLEAN NOT NULL DEFAULT FALSE,
                    impression_interaction BOOLEAN NOT NULL DEFAULT FALSE
                )"#
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS {s}.session_costs (
                    session_id TEXT PRIMARY KEY,
                    cost       DOUBLE PRECISION NOT NULL DEFAULT 0
                )"#
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS {s}.attribution_customer_journey (
                    conversion_id TEXT NOT NULL,
                    session_id    TEXT NOT NULL,
                    initializer   DOUBLE PRECISION NOT NULL,
                    holder        DOUBLE PRECISION NOT NULL,
                    closer        DOUBLE PRECISION NOT NULL,
                    ihc           DOUBLE PRECISION NOT NULL,
                    PRIMARY KEY (conversion_id, session_id)
                )"#
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS {s}.channel_reporting (
                    channel_name TEXT NOT NULL,
                    date         DATE NOT NULL,
                    cost         DOUBLE PRECISION NOT NULL,
                    ihc          DOUBLE PRECISION NOT NULL,
                    ihc_revenue  DOUBLE PRECISION NOT NULL,
                    "CPO"        DOUBLE PRECISION,
                    "ROAS"       DOUBLE PRECISION,
                    PRIMARY KEY (channel_name, date)
                )"#
            ),
        ];

        for statement in &statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        info!(schema = s.as_str(), "Attribution tables ready");
        Ok(())
    }

    async fn upsert_rows<R: UpsertRow>(&self, rows: &[R]) -> Result<UpsertSummary> {
        let sql = R::TABLE.statement(&self.schema);
        let mut summary = UpsertSummary::default();

        for row in rows {
            match row.bind(sqlx::query(&sql)).execute(&self.pool).await {
                Ok(_) => summary.written += 1,
                Err(e) => {
                    warn!(table = R::TABLE.table, key = %row.key(), error = %e, "Upsert failed");
                    summary.record_failure(row.key(), e);
                }
            }
        }

        Ok(summary)
    }
}

#[async_trait]
impl AttributionStore for PgAttributionStore {
    async fn conversions_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Conversion>> {
        let rows = sqlx::query_as::<_, Conversion>(&format!(
            r#"
            SELECT conv_id AS conversion_id, user_id, conv_date, conv_time,
                   COALESCE(revenue, 0)::float8 AS revenue
            FROM {}.conversions
            WHERE conv_date BETWEEN $1 AND $2
            ORDER BY conv_id
            "#,
            self.schema
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn session_touches_for_users(&self, user_ids: &[String]) -> Result<Vec<SessionTouch>> {
        let rows = sqlx::query_as::<_, SessionTouch>(&format!(
            r#"
            SELECT session_id, user_id, event_date, event_time, channel_name,
                   COALESCE(holder_engagement::int, 0) <> 0 AS holder_engagement,
                   COALESCE(closer_engagement::int, 0) <> 0 AS closer_engagement,
                   COALESCE(impression_interaction::int, 0) <> 0 AS impression_interaction
            FROM {}.session_sources
            WHERE user_id = ANY($1)
            ORDER BY session_id
            "#,
            self.schema
        ))
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn session_costs_for_sessions(&self, session_ids: &[String]) -> Result<Vec<SessionCost>> {
        let rows = sqlx::query_as::<_, SessionCost>(&format!(
            r#"
            SELECT session_id, COALESCE(cost, 0)::float8 AS cost
            FROM {}.session_costs
            WHERE session_id = ANY($1)
            ORDER BY session_id
            "#,
            self.schema
        ))
        .bind(session_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn scores_for_conversions(&self, conversion_ids: &[String]) -> Result<Vec<AttributionScore>> {
        let rows = sqlx::query_as::<_, AttributionScore>(&format!(
            r#"
            SELECT conversion_id, session_id, initializer, holder, closer, ihc
            FROM {}.attribution_customer_journey
            WHERE conversion_id = ANY($1)
            ORDER BY conversion_id, session_id
            "#,
            self.schema
        ))
        .bind(conversion_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn upsert_scores(&self, scores: &[AttributionScore]) -> Result<UpsertSummary> {
        self.upsert_rows(scores).await
    }

    async fn upsert_channel_report(&self, rows: &[ChannelReportRow]) -> Result<UpsertSummary> {
        self.upsert_rows(rows).await
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
