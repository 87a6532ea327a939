//! End-to-end behaviour of the transcription engine against a scripted backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    orphaned_processing, ConfigBuilder, GatedRepository, ScriptedBackend, Step, TestHarness,
};
use vidscribe::{EngineError, JobStatus, Priority};

fn assert_invariants(harness: &TestHarness, ids: &[&str]) {
    for id in ids {
        let job = harness.record(id);
        assert!(job.invariants_hold(), "invariants broken for {:?}", job);
    }
}

#[test]
fn test_hello_world_then_cache_hit() {
    let harness = TestHarness::new(
        ConfigBuilder::new().build(),
        ScriptedBackend::succeeding("hello world"),
    );

    let created = harness.service.submit("https://example.com/watch?v=A").unwrap();
    assert_eq!(created.status, JobStatus::Pending);

    let done = harness.wait_for_status(&created.id, JobStatus::Completed);
    assert_eq!(done.result_text.as_deref(), Some("hello world"));
    assert_eq!(done.model_identifier, "tiny.en");
    assert_eq!(harness.backend.calls(), 1);

    let again = harness.service.submit("https://example.com/watch?v=A").unwrap();
    assert_eq!(again, done);
    assert_eq!(harness.backend.calls(), 1);
    assert_invariants(&harness, &[&created.id]);
}

#[test]
fn test_duplicate_submissions_share_one_job() {
    let harness = TestHarness::new(
        ConfigBuilder::new().workers(3).build(),
        ScriptedBackend::new(
            vec![],
            Step::SucceedAfter(Duration::from_millis(200), "shared".to_string()),
        ),
    );
    let url = "https://example.com/watch?v=dup";

    let first = harness.service.submit(url).unwrap();
    let second = harness.service.submit(url).unwrap();
    assert_eq!(first.id, second.id);

    harness.wait_for_status(&first.id, JobStatus::Processing);
    let third = harness.service.submit(url).unwrap();
    assert_eq!(third.id, first.id);
    assert_eq!(third.status, JobStatus::Processing);

    harness.wait_for_status(&first.id, JobStatus::Completed);
    assert_eq!(harness.backend.calls(), 1);
}

#[test]
fn test_concurrent_submissions_share_one_job() {
    let harness = Arc::new(TestHarness::new(
        ConfigBuilder::new().workers(4).build(),
        ScriptedBackend::new(
            vec![],
            Step::SucceedAfter(Duration::from_millis(100), "shared".to_string()),
        ),
    ));
    let url = "https://example.com/watch?v=race";

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let harness = Arc::clone(&harness);
            std::thread::spawn(move || harness.service.submit(url).unwrap().id)
        })
        .collect();
    let ids: Vec<String> = threads.into_iter().map(|t| t.join().unwrap()).collect();

    assert!(ids.iter().all(|id| id == &ids[0]));
    harness.wait_for_status(&ids[0], JobStatus::Completed);
    assert_eq!(harness.backend.calls(), 1);
}

#[test]
fn test_two_failures_then_success() {
    let harness = TestHarness::new(
        ConfigBuilder::new().max_attempts(3).build(),
        ScriptedBackend::new(
            vec![
                Step::Fail("transient 1".to_string()),
                Step::Fail("transient 2".to_string()),
            ],
            Step::Succeed("third time lucky".to_string()),
        ),
    );

    let job = harness.service.submit("https://example.com/flaky").unwrap();
    let done = harness.wait_terminal(&job.id);

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.result_text.as_deref(), Some("third time lucky"));
    assert_eq!(harness.backend.calls(), 3);
}

#[test]
fn test_always_failing_backend_fails_record() {
    let harness = TestHarness::new(
        ConfigBuilder::new().max_attempts(3).build(),
        ScriptedBackend::failing("ffmpeg: no audio stream in input"),
    );

    let job = harness.service.submit("https://example.com/watch?v=B").unwrap();
    let done = harness.wait_terminal(&job.id);

    assert_eq!(done.status, JobStatus::Failed);
    let error = done.error_message.clone().unwrap();
    assert!(error.contains("ffmpeg: no audio stream in input"), "{}", error);
    assert!(error.contains("3 attempt"), "{}", error);
    assert_eq!(harness.backend.calls(), 3);
    assert_invariants(&harness, &[&job.id]);
}

#[test]
fn test_failed_job_is_retried_on_resubmit() {
    let harness = TestHarness::new(
        ConfigBuilder::new().max_attempts(1).build(),
        ScriptedBackend::new(
            vec![Step::Fail("first submission fails".to_string())],
            Step::Succeed("second submission works".to_string()),
        ),
    );
    let url = "https://example.com/retry-later";

    let job = harness.service.submit(url).unwrap();
    harness.wait_for_status(&job.id, JobStatus::Failed);

    let again = harness.service.submit(url).unwrap();
    assert_eq!(again.id, job.id);
    assert_eq!(again.status, JobStatus::Pending);
    assert!(again.error_message.is_none());

    let done = harness.wait_for_status(&job.id, JobStatus::Completed);
    assert_eq!(done.result_text.as_deref(), Some("second submission works"));
}

#[test]
fn test_cancel_running_job() {
    let harness = TestHarness::new(ConfigBuilder::new().build(), ScriptedBackend::hanging());

    let (job, handle) = harness
        .service
        .submit_tracked("https://example.com/long", Priority::Normal)
        .unwrap();
    let handle = handle.expect("new job is tracked");
    harness.wait_for_status(&job.id, JobStatus::Processing);
    harness.wait_for_calls(1);

    assert!(harness.service.cancel(&job.id).unwrap());

    let outcome = handle.wait_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(outcome.status, JobStatus::Cancelled);

    let record = harness.record(&job.id);
    assert_eq!(record.status, JobStatus::Cancelled);
    assert_eq!(record.error_message.as_deref(), Some("cancelled by request"));
    assert_eq!(harness.backend.calls(), 1);

    assert!(!harness.service.cancel(&job.id).unwrap());
}

#[test]
fn test_cancel_during_backoff_stops_retries() {
    let harness = TestHarness::new(
        ConfigBuilder::new()
            .max_attempts(5)
            .backoff_ms(10_000, 10_000)
            .build(),
        ScriptedBackend::failing("still broken"),
    );

    let job = harness.service.submit("https://example.com/backoff").unwrap();
    harness.wait_for_calls(1);
    harness.wait_for_status(&job.id, JobStatus::Processing);

    assert!(harness.service.cancel(&job.id).unwrap());
    let done = harness.wait_terminal(&job.id);

    assert_eq!(done.status, JobStatus::Cancelled);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(harness.backend.calls(), 1);
}

#[test]
fn test_cancel_is_rejected_for_non_processing_jobs() {
    let harness = TestHarness::new(
        ConfigBuilder::new().build(),
        ScriptedBackend::succeeding("done"),
    );

    assert!(!harness.service.cancel("no-such-job").unwrap());

    let job = harness.service.submit("https://example.com/quick").unwrap();
    harness.wait_for_status(&job.id, JobStatus::Completed);
    assert!(!harness.service.cancel(&job.id).unwrap());
    assert_eq!(harness.record(&job.id).status, JobStatus::Completed);
}

#[test]
fn test_cancel_orphaned_processing_record() {
    let harness = TestHarness::new(ConfigBuilder::new().build(), ScriptedBackend::hanging());
    let orphan = orphaned_processing("https://example.com/orphan", chrono::Duration::seconds(5));
    harness.repo.save(&orphan).unwrap();

    assert!(harness.service.cancel(&orphan.id).unwrap());
    let record = harness.record(&orphan.id);
    assert_eq!(record.status, JobStatus::Cancelled);
    assert!(record.invariants_hold());
}

#[test]
fn test_queue_full_rejects_excess_but_keeps_admitted_work() {
    let harness = TestHarness::new(
        ConfigBuilder::new().workers(1).capacity(2, 1).build(),
        ScriptedBackend::new(
            vec![],
            Step::SucceedAfter(Duration::from_millis(300), "ok".to_string()),
        ),
    );

    let busy = harness.service.submit("https://example.com/q0").unwrap();
    harness.wait_for_status(&busy.id, JobStatus::Processing);

    let a = harness.service.submit("https://example.com/q1").unwrap();
    let b = harness.service.submit("https://example.com/q2").unwrap();
    let rejected = harness.service.submit("https://example.com/q3");
    assert!(matches!(rejected, Err(EngineError::QueueFull)));

    // The priority lane still has room.
    let urgent = harness
        .service
        .submit_with_priority("https://example.com/q4", Priority::High)
        .unwrap();

    let stats = harness.service.queue_stats();
    assert_eq!(stats.regular_depth, 2);
    assert_eq!(stats.priority_depth, 1);

    for id in [&busy.id, &a.id, &b.id, &urgent.id] {
        harness.wait_for_status(id, JobStatus::Completed);
    }

    let rejected = harness
        .repo
        .get_by_url("https://example.com/q3")
        .unwrap()
        .unwrap();
    assert_eq!(rejected.status, JobStatus::Failed);
    assert!(rejected.error_message.unwrap().contains("queue is full"));

    // Capacity is back; a resubmission goes through.
    let retried = harness.service.submit("https://example.com/q3").unwrap();
    harness.wait_for_status(&retried.id, JobStatus::Completed);
}

#[test]
fn test_deadline_marks_job_failed() {
    let harness = TestHarness::new(
        ConfigBuilder::new().job_timeout_secs(1).build(),
        ScriptedBackend::hanging(),
    );

    let job = harness.service.submit("https://example.com/forever").unwrap();
    let done = harness.wait_terminal(&job.id);

    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.error_message.unwrap().contains("timed out"));
}

#[test]
fn test_stale_processing_record_is_restarted() {
    let harness = TestHarness::new(
        ConfigBuilder::new().stale_after_secs(600).build(),
        ScriptedBackend::succeeding("fresh transcript"),
    );
    let orphan = orphaned_processing("https://example.com/stale", chrono::Duration::minutes(20));
    harness.repo.save(&orphan).unwrap();

    let job = harness.service.submit("https://example.com/stale").unwrap();
    assert_eq!(job.id, orphan.id);
    assert_eq!(job.status, JobStatus::Pending);

    let done = harness.wait_for_status(&job.id, JobStatus::Completed);
    assert_eq!(done.result_text.as_deref(), Some("fresh transcript"));
    assert_eq!(harness.backend.calls(), 1);
}

#[test]
fn test_fresh_processing_record_is_reused() {
    let harness = TestHarness::new(
        ConfigBuilder::new().stale_after_secs(600).build(),
        ScriptedBackend::succeeding("unused"),
    );
    let running = orphaned_processing("https://example.com/busy", chrono::Duration::seconds(30));
    harness.repo.save(&running).unwrap();

    let job = harness.service.submit("https://example.com/busy").unwrap();
    assert_eq!(job.id, running.id);
    assert_eq!(job.status, JobStatus::Processing);

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(harness.backend.calls(), 0);
}

#[test]
fn test_restart_supersedes_running_task() {
    let harness = TestHarness::new(
        ConfigBuilder::new().workers(2).stale_after_secs(600).build(),
        ScriptedBackend::new(vec![Step::Hang], Step::Succeed("second run".to_string())),
    );
    let url = "https://example.com/superseded";

    let job = harness.service.submit(url).unwrap();
    harness.wait_for_status(&job.id, JobStatus::Processing);
    harness.wait_for_calls(1);

    // Age the record so the next submit treats it as stale.
    let mut aged = harness.record(&job.id);
    aged.updated_at = chrono::Utc::now() - chrono::Duration::minutes(30);
    harness.repo.save(&aged).unwrap();

    let restarted = harness.service.submit(url).unwrap();
    assert_eq!(restarted.id, job.id);
    assert_eq!(restarted.status, JobStatus::Pending);

    let done = harness.wait_for_status(&job.id, JobStatus::Completed);
    assert_eq!(done.result_text.as_deref(), Some("second run"));
    assert_eq!(harness.backend.calls(), 2);
    assert_eq!(harness.backend.max_in_flight(), 1);
}

#[test]
fn test_late_result_does_not_overwrite_restarted_record() {
    let repo = Arc::new(GatedRepository::holding(JobStatus::Failed));
    let harness = TestHarness::with_repository(
        ConfigBuilder::new().max_attempts(1).stale_after_secs(600).build(),
        ScriptedBackend::new(
            vec![Step::Fail("old run broke".to_string())],
            Step::Succeed("second run".to_string()),
        ),
        repo.clone(),
    );
    let url = "https://example.com/late-writer";

    let job = harness.service.submit(url).unwrap();
    // The first worker is now parked inside its save of `failed`.
    repo.wait_until_held(Duration::from_secs(10));

    let mut aged = harness.record(&job.id);
    aged.updated_at = chrono::Utc::now() - chrono::Duration::minutes(30);
    repo.save_ungated(&aged);

    let resubmitted = std::thread::scope(|s| {
        let submit = s.spawn(|| harness.service.submit(url));
        std::thread::sleep(Duration::from_millis(50));
        repo.release();
        submit.join().unwrap()
    })
    .unwrap();
    assert_eq!(resubmitted.id, job.id);
    assert_eq!(resubmitted.status, JobStatus::Pending);

    let done = harness.wait_for_status(&job.id, JobStatus::Completed);
    assert_eq!(done.result_text.as_deref(), Some("second run"));
    assert_eq!(harness.backend.calls(), 2);
    assert_invariants(&harness, &[&job.id]);
}

#[test]
fn test_shutdown_cancels_running_jobs() {
    let harness = TestHarness::new(ConfigBuilder::new().build(), ScriptedBackend::hanging());

    let job = harness.service.submit("https://example.com/interrupted").unwrap();
    harness.wait_for_status(&job.id, JobStatus::Processing);
    harness.wait_for_calls(1);

    harness.service.shutdown();

    let record = harness.record(&job.id);
    assert_eq!(record.status, JobStatus::Cancelled);
    assert!(record.error_message.unwrap().contains("shutting down"));

    let late = harness.service.submit("https://example.com/late");
    assert!(matches!(late, Err(EngineError::ShuttingDown)));
    assert_eq!(harness.service.queue_stats().active_tasks, 0);
}
