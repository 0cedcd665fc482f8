//! End-to-end pipeline runs against MemoryStore and MockScorer.
//! No network, no database.

use std::sync::Arc;

use chrono::NaiveDate;

use channel_attribution::testing::{conversion, cost, touch, MemoryStore, MockScorer};
use channel_attribution::{
    BatchLimits, BatchStatus, DateWindow, Pipeline, PipelineError, RunConfig, RunStatus,
};

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn run_config(max_customer_journeys: usize, max_sessions: usize) -> RunConfig {
    RunConfig {
        window: DateWindow {
            start: date("2024-03-01"),
            end: date("2024-03-31"),
        },
        limits: BatchLimits {
            max_customer_journeys,
            max_sessions,
        },
        scoring_concurrency: 2,
    }
}

/// Three conversions with two touches each.
fn three_journeys() -> MemoryStore {
    MemoryStore::new()
        .with_conversions(vec![
            conversion("C1", "U1", "2024-03-02", "12:00", 100.0),
            conversion("C2", "U2", "2024-03-02", "12:00", 40.0),
            conversion("C3", "U3", "2024-03-02", "12:00", 10.0),
        ])
        .with_touches(vec![
            touch("S1", "U1", "2024-03-01", "09:00", "google"),
            touch("S2", "U1", "2024-03-02", "11:00", "email"),
            touch("S3", "U2", "2024-03-01", "09:00", "google"),
            touch("S4", "U2", "2024-03-02", "11:30", "direct"),
            touch("S5", "U3", "2024-03-01", "10:00", "google"),
            touch("S6", "U3", "2024-03-02", "11:45", "email"),
        ])
        .with_costs(vec![cost("S1", 8.0), cost("S3", 2.0), cost("S5", 10.0), cost("S6", 4.0)])
}

fn pipeline(store: &Arc<MemoryStore>, scorer: &Arc<MockScorer>, config: RunConfig) -> Pipeline {
    Pipeline::new(store.clone(), scorer.clone(), config)
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_run_scores_every_journey_and_reports_channels() {
    let store = Arc::new(three_journeys());
    let scorer = Arc::new(MockScorer::new());

    let report = pipeline(&store, &scorer, run_config(100, 5)).run().await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert!(report.warnings.is_empty());
    assert_eq!(report.conversions, 3);
    assert_eq!(report.touchpoints, 6);
    assert_eq!(store.scores().len(), 6);

    let rows = store.report_rows();
    let keys: Vec<_> = rows
        .iter()
        .map(|r| (r.channel_name.as_str(), r.date.to_string()))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("direct", "2024-03-02".to_string()),
            ("email", "2024-03-02".to_string()),
            ("google", "2024-03-01".to_string()),
        ]
    );

    let google = &rows[2];
    assert_eq!(google.cost, 20.0);
    assert_eq!(google.ihc, 1.5);
    assert_eq!(google.ihc_revenue, 75.0);
    assert_eq!(google.cpo, Some(20.0 / 1.5));
    assert_eq!(google.roas, Some(75.0 / 20.0));

    let direct = &rows[0];
    assert_eq!(direct.cost, 0.0);
    assert_eq!(direct.roas, None);
}

// Scenario B: {2, 2, 2} with MAX_SESSIONS = 5 → batches of 4 and 2.
#[tokio::test]
async fn journeys_are_packed_under_the_session_limit() {
    let store = Arc::new(three_journeys());
    let scorer = Arc::new(MockScorer::new());

    let report = pipeline(&store, &scorer, run_config(100, 5)).run().await.unwrap();

    let sizes: Vec<_> = report.batches.iter().map(|b| b.touchpoints).collect();
    assert_eq!(sizes, vec![4, 2]);

    let mut calls = scorer.calls();
    calls.sort();
    assert_eq!(
        calls,
        vec![
            vec!["C1".to_string(), "C2".to_string()],
            vec!["C3".to_string()]
        ]
    );
}

#[tokio::test]
async fn oversized_journey_is_scored_alone_first() {
    let store = Arc::new(three_journeys().with_touches(vec![
        touch("S7", "U2", "2024-03-01", "07:00", "display"),
        touch("S8", "U2", "2024-03-01", "08:00", "display"),
    ]));
    let scorer = Arc::new(MockScorer::new());

    let report = pipeline(&store, &scorer, run_config(4, 5)).run().await.unwrap();

    assert_eq!(report.batches[0].conversions, 1);
    assert_eq!(report.batches[0].touchpoints, 4);
    assert_eq!(report.batches[1].conversions, 2);
    assert!(scorer.calls().contains(&vec!["C2".to_string()]));
}

// ---------------------------------------------------------------------------
// Failure isolation
// ---------------------------------------------------------------------------

// Scenario C: a partial failure writes nothing for its batch only.
#[tokio::test]
async fn partial_failure_skips_only_its_batch() {
    let store = Arc::new(three_journeys());
    let scorer = Arc::new(MockScorer::new().partial_failure_for("C3", "S6: unknown channel"));

    let report = pipeline(&store, &scorer, run_config(100, 5)).run().await.unwrap();

    assert_eq!(report.status, RunStatus::PartiallySucceeded);
    let rejected = report
        .batches
        .iter()
        .find(|b| matches!(b.status, BatchStatus::Rejected { .. }))
        .expect("one batch should be rejected");
    assert_eq!(
        rejected.status,
        BatchStatus::Rejected {
            reasons: vec!["S6: unknown channel".to_string()]
        }
    );

    let scored: Vec<_> = store.scores().into_iter().map(|s| s.conversion_id).collect();
    assert!(!scored.contains(&"C3".to_string()));
    assert_eq!(scored.iter().filter(|id| *id == "C1").count(), 2);
    assert_eq!(scored.iter().filter(|id| *id == "C2").count(), 2);
    assert!(report.warnings.iter().any(|w| w.contains("S6: unknown channel")));
}

#[tokio::test]
async fn transport_failure_is_reported_not_fatal() {
    let store = Arc::new(three_journeys());
    let scorer = Arc::new(MockScorer::new().transport_failure_for("C1"));

    let report = pipeline(&store, &scorer, run_config(100, 5)).run().await.unwrap();

    assert_eq!(report.status, RunStatus::PartiallySucceeded);
    assert!(matches!(report.batches[0].status, BatchStatus::Failed { .. }));
    assert!(report.batches[1].is_clean());
    let scored: Vec<_> = store.scores().into_iter().map(|s| s.conversion_id).collect();
    assert_eq!(scored, vec!["C3".to_string(), "C3".to_string()]);

    // Unscored touches still show up in the report with their cost.
    let google = store
        .report_rows()
        .into_iter()
        .find(|r| r.channel_name == "google")
        .unwrap();
    assert_eq!(google.cost, 20.0);
    assert_eq!(google.ihc, 0.5);
}

#[tokio::test]
async fn invalid_scores_reject_the_batch() {
    let store = Arc::new(three_journeys());
    let scorer = Arc::new(MockScorer::new().garbage_for("C3"));

    let report = pipeline(&store, &scorer, run_config(100, 5)).run().await.unwrap();

    assert_eq!(report.status, RunStatus::PartiallySucceeded);
    assert!(matches!(report.batches[1].status, BatchStatus::Failed { .. }));
    assert!(store.scores().iter().all(|s| s.conversion_id != "C3"));
}

#[tokio::test]
async fn row_write_failures_surface_as_warnings() {
    let store = Arc::new(three_journeys().rejecting_score_writes_for("C2"));
    let scorer = Arc::new(MockScorer::new());

    let report = pipeline(&store, &scorer, run_config(100, 5)).run().await.unwrap();

    assert_eq!(report.status, RunStatus::PartiallySucceeded);
    let BatchStatus::Scored { summary } = &report.batches[0].status else {
        panic!("first batch should still be scored");
    };
    assert_eq!(summary.written, 2);
    assert_eq!(summary.failures.len(), 2);
    assert!(report.warnings[0].contains("2 of 4 scores not saved"));
    assert_eq!(store.scores().len(), 4);
}

#[tokio::test]
async fn failed_score_write_marks_every_batch_failed() {
    let store = Arc::new(three_journeys().failing_score_writes());
    let scorer = Arc::new(MockScorer::new());

    let report = pipeline(&store, &scorer, run_config(100, 5)).run().await.unwrap();

    assert_eq!(report.status, RunStatus::PartiallySucceeded);
    assert!(report
        .batches
        .iter()
        .all(|b| matches!(&b.status, BatchStatus::Failed { error } if error.contains("connection reset"))));
    assert_eq!(report.warnings.len(), 2);
    assert!(report.warnings[0].starts_with("batch 0: connection reset"));
    assert!(store.scores().is_empty());

    // The report still covers every touch, with costs and no attribution.
    assert_eq!(store.report_rows().len(), 3);
    assert!(store.report_rows().iter().all(|r| r.ihc == 0.0));
}

#[tokio::test]
async fn failed_report_write_is_a_run_warning() {
    let store = Arc::new(three_journeys().failing_report_writes());
    let scorer = Arc::new(MockScorer::new());

    let report = pipeline(&store, &scorer, run_config(100, 5)).run().await.unwrap();

    assert_eq!(report.status, RunStatus::PartiallySucceeded);
    assert!(report.batches.iter().all(|b| b.is_clean()));
    assert_eq!(report.report.rows.len(), 3);
    assert_eq!(report.report.summary.written, 0);
    assert_eq!(report.report.summary.failures.len(), 3);
    assert_eq!(report.report.summary.failures[0].key, "direct/2024-03-02");
    assert_eq!(
        report.warnings,
        vec!["channel report: 3 of 3 rows not saved".to_string()]
    );
    assert!(store.report_rows().is_empty());
    assert_eq!(store.scores().len(), 6);
}

#[tokio::test]
async fn repeat_purchases_add_shared_session_cost_per_conversion() {
    let store = Arc::new(three_journeys().with_conversions(vec![conversion(
        "C4", "U1", "2024-03-03", "12:00", 60.0,
    )]));
    let scorer = Arc::new(MockScorer::new());

    pipeline(&store, &scorer, run_config(100, 5)).run().await.unwrap();

    // S1 (cost 8) now leads to both C1 and C4.
    let google = store
        .report_rows()
        .into_iter()
        .find(|r| r.channel_name == "google")
        .unwrap();
    assert_eq!(google.cost, 28.0);
    assert_eq!(google.ihc, 2.0);
    assert_eq!(google.ihc_revenue, 105.0);
}

#[tokio::test]
async fn unreachable_store_fails_before_scoring() {
    let store = Arc::new(three_journeys().failing_reads());
    let scorer = Arc::new(MockScorer::new());

    let err = pipeline(&store, &scorer, run_config(100, 5)).run().await.unwrap_err();

    assert!(matches!(err, PipelineError::Extraction(_)));
    assert!(scorer.calls().is_empty());
    assert!(store.report_rows().is_empty());
}

#[tokio::test]
async fn score_read_back_failure_is_fatal() {
    let store = Arc::new(three_journeys().failing_score_reads());
    let scorer = Arc::new(MockScorer::new());

    let err = pipeline(&store, &scorer, run_config(100, 5)).run().await.unwrap_err();

    assert!(matches!(err, PipelineError::ScoreReadBack(_)));
    assert!(store.report_rows().is_empty());
}

// ---------------------------------------------------------------------------
// Windows and re-runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_window_does_no_work() {
    let store = Arc::new(three_journeys());
    let scorer = Arc::new(MockScorer::new());
    let mut config = run_config(100, 5);
    config.window = DateWindow {
        start: date("2023-01-01"),
        end: date("2023-01-31"),
    };

    let report = pipeline(&store, &scorer, config).run().await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert!(report.batches.is_empty());
    assert!(scorer.calls().is_empty());
    assert!(store.report_rows().is_empty());
    assert_eq!(store.read_calls(), vec!["conversions_between"]);
}

#[tokio::test]
async fn rerunning_a_window_is_idempotent() {
    let store = Arc::new(three_journeys());
    let scorer = Arc::new(MockScorer::new());
    let p = pipeline(&store, &scorer, run_config(100, 5));

    p.run().await.unwrap();
    let first_scores = store.scores();
    let first_rows = store.report_rows();

    p.run().await.unwrap();

    assert_eq!(store.scores(), first_scores);
    assert_eq!(store.report_rows(), first_rows);
}

#[tokio::test]
async fn conversion_outside_window_is_not_scored() {
    let store = Arc::new(three_journeys().with_conversions(vec![conversion(
        "C0", "U1", "2024-02-28", "12:00", 500.0,
    )]));
    let scorer = Arc::new(MockScorer::new());

    pipeline(&store, &scorer, run_config(100, 5)).run().await.unwrap();

    assert!(store.scores().iter().all(|s| s.conversion_id != "C0"));
}
