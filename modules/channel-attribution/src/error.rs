use thiserror::Error;

/// Failures that abort a run. Everything else is reported per batch.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Extraction failed: {0:#}")]
    Extraction(#[source] anyhow::Error),

    #[error("Reading back attribution scores failed: {0:#}")]
    ScoreReadBack(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{key} is invalid: {message}")]
    Invalid { key: &'static str, message: String },
}
