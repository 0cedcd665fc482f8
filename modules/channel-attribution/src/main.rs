use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use channel_attribution::{PgAttributionStore, Pipeline, PipelineConfig, RunStatus};
use ihc_client::IhcClient;

#[derive(Parser)]
#[command(name = "attribution")]
#[command(about = "Score customer journeys with IHC and refresh the channel report")]
struct Cli {
    /// First conversion date to attribute (overrides START_DATE)
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Last conversion date to attribute (overrides END_DATE)
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Create the schema and tables before running
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("Error: {e:#}");
        return ExitCode::from(1);
    }

    match run(Cli::parse()).await {
        Ok(RunStatus::Succeeded) => ExitCode::SUCCESS,
        Ok(RunStatus::PartiallySucceeded) => ExitCode::from(2),
        Err(e) => {
            error!("Attribution run failed: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("channel_attribution=info".parse()?)
        .add_directive("ihc_client=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

async fn run(cli: Cli) -> Result<RunStatus> {
    info!("Channel attribution starting...");

    let mut overrides = Vec::new();
    if let Some(start) = cli.start_date {
        overrides.push(("START_DATE", start.to_string()));
    }
    if let Some(end) = cli.end_date {
        overrides.push(("END_DATE", end.to_string()));
    }
    let config = PipelineConfig::from_env(&overrides)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.run.scoring_concurrency as u32 + 1)
        .connect(&config.database_url)
        .await?;
    let store = PgAttributionStore::new(pool, &config.db_schema)?;

    if cli.migrate {
        store.migrate().await?;
    }

    let scorer = IhcClient::new(
        &config.scorer.base_url,
        &config.scorer.api_key,
        &config.scorer.conv_type_id,
        config.scorer.timeout,
    )?;

    let pipeline = Pipeline::new(Arc::new(store), Arc::new(scorer), config.run);
    let report = pipeline.run().await?;

    info!(
        run_id = report.run_id.as_str(),
        conversions = report.conversions,
        touchpoints = report.touchpoints,
        batches = report.batches.len(),
        report_rows = report.report.rows.len(),
        warnings = report.warnings.len(),
        "Run summary"
    );

    Ok(report.status)
}
