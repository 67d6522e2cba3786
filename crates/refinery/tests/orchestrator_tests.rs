//! End-to-end tests for job submission, processing, and lifecycle.
//!
//! Workers are `sh` scripts, so these tests only run on unix.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use refinery::audit::{AuditSource, ColumnHealth};
use refinery::engine::{HttpBackend, ProcessingEngine};
use refinery::{EngineKind, JobStatus, RefineryError};

use common::{assert_audit_iff_completed, TestHarness, STANDARD_AUDIT};

const WAIT: Duration = Duration::from_secs(20);
const CSV: &[u8] = b"id,amount\n1,10\n1,10\n2,\n";

#[tokio::test]
async fn test_standard_job_completes_with_audit() {
    let harness = TestHarness::new();
    let worker = harness.completing_worker(STANDARD_AUDIT);
    let orchestrator = harness.orchestrator_for_worker(&worker);

    let job = orchestrator
        .upload("alice", "sales.csv", CSV, EngineKind::Standard)
        .unwrap();
    let done = orchestrator.wait_for_terminal(&job.id, WAIT).await.unwrap();

    assert_eq!(done.status, JobStatus::Completed, "log: {}", done.log);
    assert_audit_iff_completed(&done);
    let audit = done.audit.as_ref().unwrap();
    assert_eq!(audit.rows_before, 100);
    assert_eq!(audit.rows_after, 98);
    assert_eq!(audit.duplicates_removed, 2);
    assert_eq!(audit.quality_score, 97);
    assert_eq!(audit.source, AuditSource::Engine);
    assert!(done.log.contains("Completed by local-process"));

    let download = orchestrator.download("alice", &job.id).unwrap();
    assert!(download.path.is_file());
    assert_eq!(download.filename, "cleaned_sales.csv");
    assert_eq!(
        std::fs::read_to_string(&download.path).unwrap(),
        "id,amount\n1,10\n"
    );

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_snake_case_worker_audit_is_normalized() {
    let harness = TestHarness::new();
    let worker = harness.completing_worker(
        r#"{"rows_before":4,"rows_after":3,"duplicates_removed":1,"empty_rows_removed":0,"quality_score":88.6,"column_profile":{"amount":{"type":"float64","null_count":1,"null_pct":33.3,"unique_count":2}},"outliers_found":0,"renamed_columns":{}}"#,
    );
    let orchestrator = harness.orchestrator_for_worker(&worker);

    let job = orchestrator
        .upload("alice", "ledger.csv", CSV, EngineKind::Standard)
        .unwrap();
    let done = orchestrator.wait_for_terminal(&job.id, WAIT).await.unwrap();

    let audit = done.audit.expect("completed job has an audit");
    assert_eq!(audit.rows_after, 3);
    assert_eq!(audit.quality_score, 89);
    assert_eq!(audit.column_profile["amount"].health, ColumnHealth::Critical);
    assert!(audit.engine_specific_insights.contains_key("outliers_found"));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_malformed_worker_output_fails_with_log() {
    let harness = TestHarness::new();
    let worker = harness.write_worker("garbage", "echo 'Traceback: something broke'\nexit 0");
    let orchestrator = harness.orchestrator_for_worker(&worker);

    let job = orchestrator
        .upload("alice", "sales.csv", CSV, EngineKind::Standard)
        .unwrap();
    let done = orchestrator.wait_for_terminal(&job.id, WAIT).await.unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    assert_audit_iff_completed(&done);
    assert!(!done.log.trim().is_empty());
    assert!(done.log.contains("not a valid result document"));
    assert!(done.log.contains("Traceback"));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_worker_failure_document_is_not_trusted() {
    let harness = TestHarness::new();
    let worker = harness.write_worker(
        "reject",
        r#"echo '{"status":"failed","error":"Unsupported file type","audit":{"rowsBefore":1,"rowsAfter":1}}'
exit 1"#,
    );
    let orchestrator = harness.orchestrator_for_worker(&worker);

    let job = orchestrator
        .upload("alice", "sales.csv", CSV, EngineKind::Standard)
        .unwrap();
    let done = orchestrator.wait_for_terminal(&job.id, WAIT).await.unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.audit.is_none());
    assert!(done.log.contains("Unsupported file type"));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_completed_document_missing_required_counts_fails() {
    let harness = TestHarness::new();
    let worker = harness.completing_worker(r#"{"rowsBefore":10,"qualityScore":50}"#);
    let orchestrator = harness.orchestrator_for_worker(&worker);

    let job = orchestrator
        .upload("alice", "sales.csv", CSV, EngineKind::Standard)
        .unwrap();
    let done = orchestrator.wait_for_terminal(&job.id, WAIT).await.unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    assert_audit_iff_completed(&done);
    assert!(done.log.contains("rowsAfter"));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_hung_worker_fails_with_timeout() {
    let harness = TestHarness::new();
    let worker = harness.write_worker("hang", "sleep 30");
    let standard: Arc<dyn ProcessingEngine> =
        Arc::new(harness.local_engine(&worker, Duration::from_millis(300)));
    let premium: Arc<dyn ProcessingEngine> =
        Arc::new(harness.remote_engine(None, Duration::ZERO, Duration::from_secs(1)));
    let orchestrator = harness.orchestrator(harness.config(), standard, premium);

    let job = orchestrator
        .upload("alice", "sales.csv", CSV, EngineKind::Standard)
        .unwrap();
    let done = orchestrator.wait_for_terminal(&job.id, WAIT).await.unwrap();

    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.log.contains("Timeout"));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_submit_returns_while_engine_is_running() {
    let harness = TestHarness::new();
    let worker = harness.completing_worker(STANDARD_AUDIT);
    let standard: Arc<dyn ProcessingEngine> =
        Arc::new(harness.local_engine(&worker, Duration::from_secs(30)));
    let premium: Arc<dyn ProcessingEngine> = Arc::new(harness.remote_engine(
        None,
        Duration::from_millis(800),
        Duration::from_secs(1),
    ));
    let orchestrator = harness.orchestrator(harness.config(), standard, premium);

    let job = orchestrator
        .upload("alice", "sales.csv", CSV, EngineKind::Premium)
        .unwrap();

    assert_eq!(job.status, JobStatus::Processing);
    let polled = orchestrator.get_job("alice", &job.id).unwrap();
    assert_eq!(polled.status, JobStatus::Processing);
    assert!(polled.audit.is_none());

    let listed = orchestrator.list_jobs("alice");
    assert_eq!(listed.len(), 1);
    assert!(listed[0].audit.is_none());

    let done = orchestrator.wait_for_terminal(&job.id, WAIT).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_premium_with_unreachable_delegate_uses_fallback() {
    let harness = TestHarness::new();
    let worker = harness.completing_worker(STANDARD_AUDIT);
    let delegate: Arc<dyn ProcessingEngine> =
        Arc::new(HttpBackend::new("http://127.0.0.1:9/process"));
    let standard: Arc<dyn ProcessingEngine> =
        Arc::new(harness.local_engine(&worker, Duration::from_secs(30)));
    let premium: Arc<dyn ProcessingEngine> = Arc::new(harness.remote_engine(
        Some(delegate),
        Duration::ZERO,
        Duration::from_secs(5),
    ));
    let orchestrator = harness.orchestrator(harness.config(), standard, premium);

    let job = orchestrator
        .upload("alice", "sales.csv", CSV, EngineKind::Premium)
        .unwrap();
    let done = orchestrator.wait_for_terminal(&job.id, WAIT).await.unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_audit_iff_completed(&done);
    let audit = done.audit.as_ref().unwrap();
    assert!(audit.is_fallback());
    assert_eq!(audit.rows_before, 100);
    assert_eq!(audit.rows_after, 100);
    assert_eq!(audit.column_profile.len(), 1);
    assert_eq!(audit.sample_after.len(), 1);
    assert_eq!(audit.engine_specific_insights["fallbackUsed"], true);
    assert_eq!(
        audit.engine_specific_insights["blendingInsights"]["matchType"],
        "Inner Join"
    );
    assert!(done.log.contains("Fallback audit used"));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_premium_delegate_timeout_completes_with_synthetic_profile() {
    let harness = TestHarness::new();
    let slow = harness.write_worker("slow", "sleep 30");
    let delegate: Arc<dyn ProcessingEngine> =
        Arc::new(harness.local_engine(&slow, Duration::from_secs(60)));
    let standard: Arc<dyn ProcessingEngine> =
        Arc::new(harness.local_engine(&slow, Duration::from_secs(60)));
    let premium: Arc<dyn ProcessingEngine> = Arc::new(harness.remote_engine(
        Some(delegate),
        Duration::ZERO,
        Duration::from_millis(300),
    ));
    let orchestrator = harness.orchestrator(harness.config(), standard, premium);

    let job = orchestrator
        .upload("alice", "sales.csv", CSV, EngineKind::Premium)
        .unwrap();
    let done = orchestrator.wait_for_terminal(&job.id, WAIT).await.unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    let audit = done.audit.as_ref().unwrap();
    assert!(!audit.column_profile.is_empty());
    assert!(audit.column_profile.contains_key("sales"));
    assert!(audit.engine_specific_insights["fallbackReason"]
        .as_str()
        .unwrap()
        .contains("timed out"));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_premium_with_local_delegate_keeps_real_audit() {
    let harness = TestHarness::new();
    let worker = harness.completing_worker(STANDARD_AUDIT);
    let delegate: Arc<dyn ProcessingEngine> =
        Arc::new(harness.local_engine(&worker, Duration::from_secs(30)));
    let premium: Arc<dyn ProcessingEngine> = Arc::new(harness.remote_engine(
        Some(Arc::clone(&delegate)),
        Duration::ZERO,
        Duration::from_secs(30),
    ));
    let orchestrator = harness.orchestrator(harness.config(), delegate, premium);

    let job = orchestrator
        .upload("alice", "sales.csv", CSV, EngineKind::Premium)
        .unwrap();
    let done = orchestrator.wait_for_terminal(&job.id, WAIT).await.unwrap();

    let audit = done.audit.expect("premium jobs always complete");
    assert!(!audit.is_fallback());
    assert_eq!(audit.rows_after, 98);
    assert_eq!(audit.engine_kind, EngineKind::Premium);
    assert_eq!(audit.engine_specific_insights["fallbackUsed"], false);
    assert_eq!(
        audit.engine_specific_insights["blendingInsights"]["recordsMatched"],
        98
    );
    assert!(orchestrator.download("alice", &job.id).is_ok());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_upload_rejects_disallowed_extension() {
    let harness = TestHarness::new();
    let worker = harness.completing_worker(STANDARD_AUDIT);
    let orchestrator = harness.orchestrator_for_worker(&worker);

    let err = orchestrator
        .upload("alice", "notes.txt", b"hello", EngineKind::Standard)
        .unwrap_err();
    assert!(matches!(err, RefineryError::UploadRejected { .. }));

    let err = orchestrator
        .upload("alice", "", b"hello", EngineKind::Standard)
        .unwrap_err();
    assert!(matches!(err, RefineryError::UploadRejected { .. }));

    assert!(harness.upload_files().is_empty());
    assert!(orchestrator.list_jobs("alice").is_empty());

    // Extension matching ignores case.
    let job = orchestrator
        .upload("alice", "REPORT.XLSX", CSV, EngineKind::Standard)
        .unwrap();
    assert_eq!(job.file_type, "xlsx");

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_owner_checks_on_every_job_operation() {
    let harness = TestHarness::new();
    let worker = harness.completing_worker(STANDARD_AUDIT);
    let orchestrator = harness.orchestrator_for_worker(&worker);

    let job = orchestrator
        .upload("alice", "sales.csv", CSV, EngineKind::Standard)
        .unwrap();
    orchestrator.wait_for_terminal(&job.id, WAIT).await.unwrap();

    assert!(matches!(
        orchestrator.get_job("mallory", &job.id),
        Err(RefineryError::Unauthorized { .. })
    ));
    assert!(matches!(
        orchestrator.download("mallory", &job.id),
        Err(RefineryError::Unauthorized { .. })
    ));
    assert!(matches!(
        orchestrator.delete_job("mallory", &job.id),
        Err(RefineryError::Unauthorized { .. })
    ));
    assert!(orchestrator.list_jobs("mallory").is_empty());

    // Nothing was touched by the rejected calls.
    assert!(orchestrator.download("alice", &job.id).is_ok());
    assert!(matches!(
        orchestrator.get_job("alice", "no-such-job"),
        Err(RefineryError::JobNotFound(_))
    ));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_delete_removes_input_and_output() {
    let harness = TestHarness::new();
    let worker = harness.completing_worker(STANDARD_AUDIT);
    let orchestrator = harness.orchestrator_for_worker(&worker);

    let job = orchestrator
        .upload("alice", "sales.csv", CSV, EngineKind::Standard)
        .unwrap();
    orchestrator.wait_for_terminal(&job.id, WAIT).await.unwrap();
    assert_eq!(harness.upload_files().len(), 1);
    assert_eq!(harness.output_files().len(), 1);

    let removed = orchestrator.delete_job("alice", &job.id).unwrap();
    assert_eq!(removed.len(), 2);
    assert!(harness.upload_files().is_empty());
    assert!(harness.output_files().is_empty());
    assert!(orchestrator.list_jobs("alice").is_empty());
    assert!(matches!(
        orchestrator.get_job("alice", &job.id),
        Err(RefineryError::JobNotFound(_))
    ));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_same_named_uploads_keep_separate_outputs() {
    let harness = TestHarness::new();
    let worker = harness.write_worker(
        "copy",
        &format!(
            "cp \"$1\" \"$2\"\ncat <<'JSON'\n{{\"status\":\"completed\",\"audit\":{}}}\nJSON",
            STANDARD_AUDIT
        ),
    );
    let orchestrator = harness.orchestrator_for_worker(&worker);

    let first = orchestrator
        .upload("alice", "sales.csv", b"id\n1\n", EngineKind::Standard)
        .unwrap();
    let second = orchestrator
        .upload("alice", "sales.csv", b"id\n2\n", EngineKind::Standard)
        .unwrap();
    for id in [&first.id, &second.id] {
        let done = orchestrator.wait_for_terminal(id, WAIT).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed, "log: {}", done.log);
    }

    let first_download = orchestrator.download("alice", &first.id).unwrap();
    let second_download = orchestrator.download("alice", &second.id).unwrap();
    assert_ne!(first_download.path, second_download.path);
    assert_eq!(std::fs::read(&first_download.path).unwrap(), b"id\n1\n");
    assert_eq!(std::fs::read(&second_download.path).unwrap(), b"id\n2\n");
    assert_eq!(harness.output_files().len(), 2);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_delete_keeps_legacy_output_of_another_job() {
    let harness = TestHarness::new();
    let worker = harness.completing_worker(STANDARD_AUDIT);
    let orchestrator = harness.orchestrator_for_worker(&worker);

    std::fs::create_dir_all(&harness.output_dir).unwrap();
    let legacy = harness.output_dir.join("processed-sales.csv");
    std::fs::write(&legacy, "id\n7\n").unwrap();

    let job = orchestrator
        .upload("alice", "sales.csv", CSV, EngineKind::Standard)
        .unwrap();
    orchestrator.wait_for_terminal(&job.id, WAIT).await.unwrap();
    orchestrator.delete_job("alice", &job.id).unwrap();

    assert_eq!(harness.output_files(), vec![legacy.clone()]);
    assert_eq!(std::fs::read(&legacy).unwrap(), b"id\n7\n");

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_delete_without_artifacts_succeeds() {
    let harness = TestHarness::new();
    let worker = harness.write_worker("garbage", "echo nope");
    let orchestrator = harness.orchestrator_for_worker(&worker);

    let job = orchestrator
        .upload("alice", "sales.csv", CSV, EngineKind::Standard)
        .unwrap();
    orchestrator.wait_for_terminal(&job.id, WAIT).await.unwrap();
    std::fs::remove_file(&job.input_path).unwrap();

    let removed = orchestrator.delete_job("alice", &job.id).unwrap();
    assert!(removed.is_empty());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_delete_in_flight_discards_late_result() {
    let harness = TestHarness::new();
    let worker = harness.write_worker(
        "late",
        &format!(
            "sleep 1\nprintf 'id\\n1\\n' > \"$2\"\necho '{{\"status\":\"completed\",\"audit\":{}}}'",
            STANDARD_AUDIT
        ),
    );
    let orchestrator = harness.orchestrator_for_worker(&worker);
    let mut events = orchestrator.subscribe();

    let job = orchestrator
        .upload("alice", "sales.csv", CSV, EngineKind::Standard)
        .unwrap();
    orchestrator.delete_job("alice", &job.id).unwrap();

    // Shutdown drains the queue, so the worker has finished afterwards.
    orchestrator.shutdown().await;

    assert!(matches!(
        orchestrator.get_job("alice", &job.id),
        Err(RefineryError::JobNotFound(_))
    ));
    assert!(harness.output_files().is_empty());
    assert!(harness.upload_files().is_empty());

    while let Ok(event) = events.try_recv() {
        assert!(!event.is_terminal(), "deleted job must not publish a terminal event");
    }
}

#[tokio::test]
async fn test_download_distinguishes_not_ready_from_missing() {
    let harness = TestHarness::new();
    let worker = harness.completing_worker(STANDARD_AUDIT);
    let standard: Arc<dyn ProcessingEngine> =
        Arc::new(harness.local_engine(&worker, Duration::from_secs(30)));
    let premium: Arc<dyn ProcessingEngine> = Arc::new(harness.remote_engine(
        None,
        Duration::from_millis(800),
        Duration::from_secs(1),
    ));
    let orchestrator = harness.orchestrator(harness.config(), standard, premium);

    let job = orchestrator
        .upload("alice", "sales.csv", CSV, EngineKind::Premium)
        .unwrap();
    assert!(matches!(
        orchestrator.download("alice", &job.id),
        Err(RefineryError::NotReady {
            status: JobStatus::Processing,
            ..
        })
    ));

    // The fallback path writes no output, so the completed job has no artifact.
    let done = orchestrator.wait_for_terminal(&job.id, WAIT).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    match orchestrator.download("alice", &job.id) {
        Err(RefineryError::ArtifactNotFound { job_id, candidates }) => {
            assert_eq!(job_id, job.id);
            assert!(!candidates.is_empty());
        }
        other => panic!("expected ArtifactNotFound, got {:?}", other),
    }
    assert_eq!(
        orchestrator.get_job("alice", &job.id).unwrap().status,
        JobStatus::Completed
    );

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_full_queue_rejects_submissions() {
    let harness = TestHarness::new();
    let worker = harness.write_worker(
        "slow-ok",
        &format!(
            "sleep 1\necho '{{\"status\":\"completed\",\"audit\":{}}}'",
            STANDARD_AUDIT
        ),
    );
    let mut config = harness.config();
    config.worker_count = 1;
    config.queue_capacity = 1;
    let standard: Arc<dyn ProcessingEngine> =
        Arc::new(harness.local_engine(&worker, Duration::from_secs(30)));
    let premium: Arc<dyn ProcessingEngine> =
        Arc::new(harness.remote_engine(None, Duration::ZERO, Duration::from_secs(1)));
    let orchestrator = harness.orchestrator(config, standard, premium);

    let mut accepted = Vec::new();
    let mut rejected = 0;
    for i in 0..4 {
        match orchestrator.upload("alice", &format!("batch{}.csv", i), CSV, EngineKind::Standard) {
            Ok(job) => accepted.push(job.id),
            Err(RefineryError::QueueFull { capacity }) => {
                assert_eq!(capacity, 1);
                rejected += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert!(rejected >= 1, "at most worker + queue jobs fit");
    assert!(accepted.len() <= 2);
    assert_eq!(orchestrator.list_jobs("alice").len(), accepted.len());
    assert_eq!(harness.upload_files().len(), accepted.len());

    for id in &accepted {
        let done = orchestrator.wait_for_terminal(id, WAIT).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
    }

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_jobs_each_get_one_terminal_state() {
    let harness = TestHarness::new();
    let worker = harness.completing_worker(STANDARD_AUDIT);
    let orchestrator = harness.orchestrator_for_worker(&worker);

    let mut ids = Vec::new();
    for i in 0..6 {
        let kind = if i % 2 == 0 {
            EngineKind::Standard
        } else {
            EngineKind::Premium
        };
        let job = orchestrator
            .upload("alice", &format!("part{}.csv", i), CSV, kind)
            .unwrap();
        ids.push(job.id);
    }

    for id in &ids {
        let done = orchestrator.wait_for_terminal(id, WAIT).await.unwrap();
        assert!(done.is_finished());
        assert_audit_iff_completed(&done);
    }

    for job in orchestrator.list_jobs("alice") {
        assert_eq!(job.status, JobStatus::Completed);
        if job.engine_kind == EngineKind::Standard {
            assert!(orchestrator.download("alice", &job.id).is_ok());
        }
    }

    orchestrator.shutdown().await;
}
