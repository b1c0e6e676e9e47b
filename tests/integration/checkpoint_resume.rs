//! Checkpoint response handling, persistence and restart recovery.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use quest::checkpoint::{CheckpointStore, FileStore, MemoryStore};
use quest::core::{TaskId, TaskStatus};
use quest::orchestration::resolver;
use quest::{CheckpointId, CheckpointResponse, Driver, Error, Outcome, Phase, Session};

use crate::fixtures::{
    driver, CountingRetriever, EchoSynthesizer, NarrowingAdvisor, ScriptedAnalyzer,
    ScriptedPlanner, Sources, LINEAR_WITH_REVIEW, TWO_STEP,
};

/// `t1 -> t2 -> t3` with review after t1; t2 is the only `evidence` task.
const REVIEW_AFTER_FIRST: &str = r#"{
  "tasks": [
    {"id": "t1", "source": "genes"},
    {"id": "t2", "source": "evidence", "depends_on": ["t1"]},
    {"id": "t3", "source": "genes", "depends_on": ["t2"]}
  ],
  "checkpoint_after": "t1"
}"#;

fn status(session: &Session, id: &str) -> TaskStatus {
    session
        .plan
        .as_ref()
        .and_then(|p| p.task(&TaskId::from(id)))
        .map(|t| t.status)
        .unwrap()
}

async fn paused(driver: &Driver, goal: &str) -> (Session, quest::Checkpoint) {
    let mut session = driver.start(goal);
    match driver.run(&mut session).await.unwrap() {
        Outcome::Paused(checkpoint) => (session, checkpoint),
        other => panic!("expected a pause, got {:?}", other),
    }
}

#[tokio::test]
async fn test_continue_runs_remaining_tasks() {
    let sources = Sources::new();
    let driver = driver(LINEAR_WITH_REVIEW, &sources, None);
    let (mut session, checkpoint) = paused(&driver, "What drives IPF?").await;

    let outcome = driver
        .resume(&mut session, CheckpointResponse::new("continue"))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Finalized(_)));
    assert_eq!(status(&session, "t3"), TaskStatus::Completed);
    assert_eq!(sources.genes.calls(), 2);
    assert!(session.pending_checkpoint.is_none());
    assert!(session.report.is_some());

    let stored = driver.checkpoints().load(&checkpoint.id).await.unwrap().unwrap();
    let response = stored.response.unwrap();
    assert_eq!(response.action_id, "continue");
    assert!(stored.responded_at.is_some());
}

#[tokio::test]
async fn test_feedback_reaches_synthesizer() {
    let sources = Sources::new();
    let driver = Driver::builder()
        .planner(ScriptedPlanner::text(LINEAR_WITH_REVIEW))
        .retriever("genes", sources.genes.clone())
        .retriever("evidence", sources.evidence.clone())
        .synthesizer(Arc::new(EchoSynthesizer))
        .build();
    let (mut session, _) = paused(&driver, "What drives IPF?").await;

    let outcome = driver
        .resume(
            &mut session,
            CheckpointResponse::new("continue").with_feedback("focus on MUC5B"),
        )
        .await
        .unwrap();

    let Outcome::Finalized(report) = outcome else {
        panic!("expected finalization");
    };
    assert!(!report.degraded);
    assert_eq!(report.text, "IPF genetics: 3 finding(s); feedback=focus on MUC5B");
    assert_eq!(session.last_feedback.as_deref(), Some("focus on MUC5B"));
}

/// Given a paused session
/// When the reviewer aborts
/// Then no further task runs and the stored session is marked aborted
#[tokio::test]
async fn test_abort_stops_without_running_tasks() {
    let sources = Sources::new();
    let driver = driver(LINEAR_WITH_REVIEW, &sources, None);
    let (mut session, _) = paused(&driver, "What drives IPF?").await;

    let outcome = driver
        .resume(&mut session, CheckpointResponse::new("abort"))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Aborted);
    assert_eq!(session.phase(), Phase::Aborted);
    assert_eq!(status(&session, "t3"), TaskStatus::Pending);
    assert_eq!(sources.genes.calls(), 1);
    assert_eq!(sources.evidence.calls(), 1);
    assert!(session.report.is_none());

    let doc = driver
        .checkpoints()
        .session_document(session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc["status"], json!("aborted"));

    let err = driver.run(&mut session).await.unwrap_err();
    assert!(matches!(err, Error::SessionTerminal(_)));
}

/// Given a paused session whose next task depends on a skipped source
/// When the reviewer skips that source
/// Then the dependent task is blocked and never runs
#[tokio::test]
async fn test_skipped_dependency_blocks_dependents() {
    let sources = Sources::new();
    let driver = driver(REVIEW_AFTER_FIRST, &sources, None);
    let (mut session, checkpoint) = paused(&driver, "What drives IPF?").await;
    assert!(checkpoint.option("skip:evidence").is_some());

    let outcome = driver
        .resume(&mut session, CheckpointResponse::new("skip:evidence"))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Finalized(_)));
    assert_eq!(status(&session, "t2"), TaskStatus::Skipped);
    assert_eq!(status(&session, "t3"), TaskStatus::Pending);
    assert_eq!(sources.evidence.calls(), 0);
    assert_eq!(sources.genes.calls(), 1);

    let plan = session.plan.as_ref().unwrap();
    let blocked: Vec<&str> = resolver::blocked(plan.tasks())
        .iter()
        .map(|t| t.id.as_str())
        .collect();
    assert_eq!(blocked, vec!["t3"]);
    assert!(plan.is_exhausted());
}

#[tokio::test]
async fn test_stop_and_export_skips_open_tasks() {
    let sources = Sources::new();
    let driver = driver(REVIEW_AFTER_FIRST, &sources, None);
    let (mut session, _) = paused(&driver, "What drives IPF?").await;

    let outcome = driver
        .resume(&mut session, CheckpointResponse::new("stop_and_export"))
        .await
        .unwrap();

    let Outcome::Finalized(report) = outcome else {
        panic!("expected finalization");
    };
    assert!(session.export_requested);
    assert_eq!(status(&session, "t2"), TaskStatus::Skipped);
    assert_eq!(status(&session, "t3"), TaskStatus::Skipped);
    assert_eq!(sources.genes.calls(), 1);
    assert!(report.text.contains("- t1: 2 record(s)"));
    assert!(report.text.contains("(skipped)"));
}

/// Given an advisor offering a narrower scope
/// When the reviewer picks it
/// Then every later task runs with the narrowed parameters
#[tokio::test]
async fn test_narrow_scope_applies_to_later_tasks() {
    let sources = Sources::new();
    let driver = Driver::builder()
        .planner(ScriptedPlanner::text(REVIEW_AFTER_FIRST))
        .retriever("genes", sources.genes.clone())
        .retriever("evidence", sources.evidence.clone())
        .advisor(Arc::new(NarrowingAdvisor(vec!["MUC5B"])))
        .build();
    let (mut session, checkpoint) = paused(&driver, "What drives IPF?").await;

    let ids: Vec<&str> = checkpoint.options.iter().map(|o| o.action_id.as_str()).collect();
    assert_eq!(ids, vec!["continue", "narrow_scope", "abort"]);

    driver
        .resume(&mut session, CheckpointResponse::new("narrow_scope"))
        .await
        .unwrap();

    assert_eq!(session.scope["entities"], json!(["MUC5B"]));
    let evidence_params = sources.evidence.seen();
    assert_eq!(evidence_params.len(), 1);
    assert_eq!(evidence_params[0]["entities"], json!(["MUC5B"]));
    let genes_params = sources.genes.seen();
    assert_eq!(genes_params.len(), 2);
    assert!(genes_params[0].get("entities").is_none());
    assert_eq!(genes_params[1]["entities"], json!(["MUC5B"]));
}

/// Given conflicts that were shown at a checkpoint
/// When the same conflicts come up again after continuing
/// Then the session does not pause a second time
#[tokio::test]
async fn test_acknowledged_conflicts_do_not_pause_again() {
    let driver = Driver::builder()
        .planner(ScriptedPlanner::text(TWO_STEP))
        .retriever("genes", CountingRetriever::empty())
        .retriever("evidence", CountingRetriever::records(vec![json!({"id": 7})]))
        .analyzer(ScriptedAnalyzer::unavailable())
        .build();
    let (mut session, checkpoint) = paused(&driver, "What drives IPF?").await;
    assert_eq!(checkpoint.conflicts.len(), 1);

    let outcome = driver
        .resume(&mut session, CheckpointResponse::new("continue"))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Finalized(_)));
    assert_eq!(session.acknowledged, vec![checkpoint.conflicts[0].fingerprint()]);
    assert_eq!(session.conflicts.len(), 1);
}

#[tokio::test]
async fn test_checkpoint_persisted_and_loaded() {
    let store = Arc::new(MemoryStore::new());
    let sources = Sources::new();
    let driver = driver(
        LINEAR_WITH_REVIEW,
        &sources,
        Some(store.clone() as Arc<dyn CheckpointStore>),
    );
    let (session, checkpoint) = paused(&driver, "What drives IPF?").await;

    let loaded = driver.checkpoints().load(&checkpoint.id).await.unwrap().unwrap();
    assert_eq!(loaded.id, checkpoint.id);
    assert_eq!(loaded.reason, checkpoint.reason);
    assert_eq!(loaded.options, checkpoint.options);
    assert_eq!(loaded.state_snapshot.plan, checkpoint.state_snapshot.plan);
    assert_eq!(loaded.state_snapshot.session_id, session.id);

    let doc = store
        .get("sessions", &session.id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc["status"], json!("awaiting_response"));
    assert_eq!(doc["current_checkpoint"], json!(checkpoint.id.as_str()));

    let restored = driver
        .checkpoints()
        .load_session(session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(restored.phase(), Phase::Checkpointing);
    assert_eq!(restored.findings.len(), 2);
    assert_eq!(
        restored.pending_checkpoint.as_ref().map(|c| &c.id),
        Some(&checkpoint.id)
    );
    assert_eq!(
        driver
            .checkpoints()
            .latest_checkpoint(session.id)
            .await
            .unwrap()
            .map(|c| c.id),
        Some(checkpoint.id)
    );
}

/// Given a session paused by one process
/// When a new process with a fresh driver resumes it from disk
/// Then the session completes with only the remaining task run
#[tokio::test]
async fn test_resume_after_restart_from_file_store() {
    let temp = TempDir::new().unwrap();

    let (session_id, checkpoint_id) = {
        let sources = Sources::new();
        let store: Arc<dyn CheckpointStore> = Arc::new(FileStore::new(temp.path()));
        let driver = driver(LINEAR_WITH_REVIEW, &sources, Some(store));
        let (session, checkpoint) = paused(&driver, "What drives IPF?").await;
        (session.id, checkpoint.id)
    };
    assert!(temp
        .path()
        .join("checkpoints")
        .join(format!("{}.json", checkpoint_id))
        .exists());

    let sources = Sources::new();
    let store: Arc<dyn CheckpointStore> = Arc::new(FileStore::new(temp.path()));
    let driver = driver(LINEAR_WITH_REVIEW, &sources, Some(store));

    let (session, outcome) = driver
        .resume_from_store(&checkpoint_id, CheckpointResponse::new("continue"))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Finalized(_)));
    assert_eq!(session.id, session_id);
    assert_eq!(status(&session, "t1"), TaskStatus::Completed);
    assert_eq!(status(&session, "t3"), TaskStatus::Completed);
    assert_eq!(sources.genes.calls(), 1);
    assert_eq!(sources.evidence.calls(), 0);
    assert_eq!(session.findings.len(), 3);

    let doc = driver
        .checkpoints()
        .session_document(session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc["status"], json!("finalized"));

    let err = driver
        .resume_from_store(&checkpoint_id, CheckpointResponse::new("continue"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoPendingCheckpoint(_)));

    let err = driver
        .resume_from_store(&CheckpointId::from("cp_missing0"), CheckpointResponse::new("continue"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CheckpointNotFound(_)));
}

/// Given a checkpoint answered with abort outside the driver
/// When a later process resumes it with a different action
/// Then the call is rejected and the recorded abort is what gets applied
#[tokio::test]
async fn test_recorded_response_is_applied_not_overwritten() {
    let temp = TempDir::new().unwrap();
    let store: Arc<dyn CheckpointStore> = Arc::new(FileStore::new(temp.path()));
    let sources = Sources::new();
    let driver = driver(LINEAR_WITH_REVIEW, &sources, Some(store));
    let (session, checkpoint) = paused(&driver, "What drives IPF?").await;

    let err = driver.resume_recorded(&checkpoint.id).await.unwrap_err();
    assert!(matches!(err, Error::NoRecordedResponse(_)));

    driver
        .checkpoints()
        .record_response(&checkpoint.id, CheckpointResponse::new("abort"))
        .await
        .unwrap();

    let err = driver
        .resume_from_store(&checkpoint.id, CheckpointResponse::new("continue"))
        .await
        .unwrap_err();
    match err {
        Error::CheckpointAnswered { action, .. } => assert_eq!(action, "abort"),
        other => panic!("expected CheckpointAnswered, got {:?}", other),
    }
    let stored = driver.checkpoints().load(&checkpoint.id).await.unwrap().unwrap();
    assert_eq!(stored.response.unwrap().action_id, "abort");
    assert_eq!(sources.genes.calls(), 1);

    let (resumed, outcome) = driver.resume_recorded(&checkpoint.id).await.unwrap();
    assert_eq!(outcome, Outcome::Aborted);
    assert_eq!(resumed.id, session.id);
    assert_eq!(status(&resumed, "t3"), TaskStatus::Pending);
    assert_eq!(sources.genes.calls(), 1);

    let err = driver.resume_recorded(&checkpoint.id).await.unwrap_err();
    assert!(matches!(err, Error::NoPendingCheckpoint(_)));
}
