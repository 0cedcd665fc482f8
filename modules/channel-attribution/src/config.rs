use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::batch::BatchLimits;
use crate::error::ConfigError;
use crate::extract::DateWindow;
use crate::store::is_identifier;

pub const DEFAULT_SCHEMA: &str = "data_aws";
pub const DEFAULT_SCORING_CONCURRENCY: usize = 4;
pub const DEFAULT_SCORING_TIMEOUT_SECS: u64 = 120;

/// Everything one pipeline run needs besides its collaborators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunConfig {
    pub window: DateWindow,
    pub limits: BatchLimits,
    /// Upper bound on in-flight scoring requests.
    pub scoring_concurrency: usize,
}

/// Connection settings for the IHC scorer.
#[derive(Debug, Clone)]
pub struct ScorerConfig {
    pub base_url: String,
    pub api_key: String,
    pub conv_type_id: String,
    pub timeout: Duration,
}

/// Application configuration.
///
/// Values come from the environment (after loading `.env`). The
/// `IHC_CONFIG` variable may hold a JSON object with the same keys, as the
/// scheduler's variable store provides; individual variables win over it.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,
    pub db_schema: String,
    pub scorer: ScorerConfig,
    pub run: RunConfig,
}

impl PipelineConfig {
    /// Load from the environment. `overrides` (e.g. command-line flags) win
    /// over everything else.
    pub fn from_env(overrides: &[(&str, String)]) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let blob: HashMap<String, String> = match std::env::var("IHC_CONFIG") {
            Ok(raw) => parse_blob(&raw)?,
            Err(_) => HashMap::new(),
        };

        let config = Self::from_lookup(|key| {
            overrides
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
                .or_else(|| std::env::var(key).ok())
                .or_else(|| blob.get(key).cloned())
        })?;
        config.log_keys();
        Ok(config)
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let db_schema = lookup("DB_SCHEMA").unwrap_or_else(|| DEFAULT_SCHEMA.to_string());
        if !is_identifier(&db_schema) {
            return Err(ConfigError::Invalid {
                key: "DB_SCHEMA",
                message: format!("{db_schema:?} is not a plain identifier"),
            });
        }

        let window = DateWindow {
            start: parse_value("START_DATE", &required("START_DATE")?)?,
            end: parse_value("END_DATE", &required("END_DATE")?)?,
        };
        if window.start > window.end {
            return Err(ConfigError::Invalid {
                key: "END_DATE",
                message: format!("{} is before START_DATE {}", window.end, window.start),
            });
        }

        let limits = BatchLimits {
            max_customer_journeys: positive("MAX_CUSTOMER_JOURNEYS", &required("MAX_CUSTOMER_JOURNEYS")?)?,
            max_sessions: positive("MAX_SESSIONS", &required("MAX_SESSIONS")?)?,
        };

        let scoring_concurrency = match lookup("SCORING_CONCURRENCY") {
            Some(v) => positive("SCORING_CONCURRENCY", &v)?,
            None => DEFAULT_SCORING_CONCURRENCY,
        };
        let timeout_secs: u64 = match lookup("SCORING_TIMEOUT_SECS") {
            Some(v) => parse_value("SCORING_TIMEOUT_SECS", &v)?,
            None => DEFAULT_SCORING_TIMEOUT_SECS,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            db_schema,
            scorer: ScorerConfig {
                base_url: lookup("IHC_BASE_URL").unwrap_or_else(|| ihc_client::DEFAULT_BASE_URL.to_string()),
                api_key: required("API_KEY")?,
                conv_type_id: required("CONV_TYPE_ID")?,
                timeout: Duration::from_secs(timeout_secs),
            },
            run: RunConfig {
                window,
                limits,
                scoring_concurrency,
            },
        })
    }

    fn log_keys(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  DB_SCHEMA: {}", self.db_schema);
        tracing::info!("  IHC_BASE_URL: {}", self.scorer.base_url);
        tracing::info!("  CONV_TYPE_ID: {}", self.scorer.conv_type_id);
        tracing::info!("  API_KEY: {}", preview(&self.scorer.api_key));
        tracing::info!("  MAX_CUSTOMER_JOURNEYS: {}", self.run.limits.max_customer_journeys);
        tracing::info!("  MAX_SESSIONS: {}", self.run.limits.max_sessions);
        tracing::info!("  WINDOW: {}", self.run.window);
        tracing::info!("  SCORING_CONCURRENCY: {}", self.run.scoring_concurrency);
    }
}

/// First few characters of a secret, safe to log.
fn preview(val: &str) -> String {
    let head: String = val.chars().take(5).collect();
    format!("{head}...({} chars)", val.chars().count())
}

/// Flatten a JSON object into string values. Numbers and booleans keep their
/// JSON text.
fn parse_blob(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| ConfigError::Invalid {
        key: "IHC_CONFIG",
        message: e.to_string(),
    })?;
    let serde_json::Value::Object(map) = value else {
        return Err(ConfigError::Invalid {
            key: "IHC_CONFIG",
            message: "expected a JSON object".to_string(),
        });
    };

    Ok(map
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        message: format!("{raw:?}: {e}"),
    })
}

fn positive(key: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match parse_value::<usize>(key, raw)? {
        0 => Err(ConfigError::Invalid {
            key,
            message: "must be greater than zero".to_string(),
        }),
        n => Ok(n),
    }
}
