//! Resolver properties and execution-mode behavior.

use std::time::Duration;

use serde_json::json;

use quest::core::{Plan, Task, TaskId, TaskStatus};
use quest::orchestration::resolver;
use quest::{Driver, ExecutionMode, Outcome};

use crate::fixtures::{CountingRetriever, ScriptedAnalyzer, ScriptedPlanner};

/// `a` and `b` independent, `c` after both, `d` after `c`.
fn diamond() -> Plan {
    Plan::new(
        "diamond",
        vec![
            Task::new("a", "a", "genes"),
            Task::new("b", "b", "genes"),
            Task::new("c", "c", "genes").with_dependencies(["a", "b"]),
            Task::new("d", "d", "genes").with_dependencies(["c"]),
        ],
        None,
    )
    .unwrap()
}

fn finish(plan: &mut Plan, id: &str, status: TaskStatus) {
    let task = plan.task_mut(&TaskId::from(id)).unwrap();
    task.mark_ready().unwrap();
    match status {
        TaskStatus::Skipped => task.skip().unwrap(),
        TaskStatus::Failed => {
            task.start().unwrap();
            task.fail("boom").unwrap();
        }
        _ => {
            task.start().unwrap();
            task.complete(json!([1])).unwrap();
        }
    }
}

fn ids(tasks: Vec<&Task>) -> Vec<&str> {
    tasks.into_iter().map(|t| t.id.as_str()).collect()
}

/// Every task the resolver hands out has all of its dependencies completed.
#[test]
fn test_resolver_only_offers_tasks_with_completed_dependencies() {
    let mut plan = diamond();
    let mut order = Vec::new();

    while let Some(next) = resolver::next_ready(plan.tasks()) {
        let id = next.id.clone();
        for dep in &next.depends_on {
            assert_eq!(plan.task(dep).unwrap().status, TaskStatus::Completed);
        }
        order.push(id.to_string());
        finish(&mut plan, id.as_str(), TaskStatus::Completed);
    }

    assert_eq!(order, vec!["a", "b", "c", "d"]);
    assert!(resolver::is_exhausted(plan.tasks()));
    assert!(resolver::blocked(plan.tasks()).is_empty());
}

#[test]
fn test_ready_batch_respects_limit_and_dependencies() {
    let mut plan = diamond();
    assert_eq!(ids(resolver::ready_batch(plan.tasks(), 10)), vec!["a", "b"]);
    assert_eq!(ids(resolver::ready_batch(plan.tasks(), 1)), vec!["a"]);

    finish(&mut plan, "a", TaskStatus::Completed);
    assert_eq!(ids(resolver::ready_batch(plan.tasks(), 10)), vec!["b"]);

    finish(&mut plan, "b", TaskStatus::Completed);
    assert_eq!(ids(resolver::ready_batch(plan.tasks(), 10)), vec!["c"]);
}

#[test]
fn test_failure_blocks_transitively() {
    let mut plan = diamond();
    finish(&mut plan, "a", TaskStatus::Completed);
    finish(&mut plan, "b", TaskStatus::Failed);

    assert!(resolver::next_ready(plan.tasks()).is_none());
    assert_eq!(ids(resolver::blocked(plan.tasks())), vec!["c", "d"]);
    assert!(resolver::is_exhausted(plan.tasks()));
}

#[test]
fn test_in_flight_task_is_not_exhausted() {
    let mut plan = diamond();
    plan.task_mut(&TaskId::from("a")).unwrap().mark_ready().unwrap();
    finish(&mut plan, "b", TaskStatus::Skipped);

    assert!(resolver::next_ready(plan.tasks()).is_none());
    assert!(!resolver::is_exhausted(plan.tasks()));
}

#[test]
fn test_task_status_never_moves_backwards() {
    let mut plan = diamond();
    finish(&mut plan, "a", TaskStatus::Completed);
    let task = plan.task_mut(&TaskId::from("a")).unwrap();

    let before = task.status.rank();
    assert!(task.mark_ready().is_err());
    assert!(task.start().is_err());
    assert!(task.skip().is_err());
    assert!(task.fail("late").is_err());
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.status.rank(), before);
}

const FOUR_INDEPENDENT: &str = r#"{"tasks": [
    {"id": "t1", "source": "slow", "parameters": {"n": 1}},
    {"id": "t2", "source": "slow", "parameters": {"n": 2}},
    {"id": "t3", "source": "slow", "parameters": {"n": 3}},
    {"id": "t4", "source": "slow", "parameters": {"n": 4}}
]}"#;

async fn run_four(mode: ExecutionMode) -> std::sync::Arc<CountingRetriever> {
    let slow = CountingRetriever::slow(vec![json!({"id": 1})], Duration::from_millis(30));
    let driver = Driver::builder()
        .planner(ScriptedPlanner::text(FOUR_INDEPENDENT))
        .retriever("slow", slow.clone())
        .analyzer(ScriptedAnalyzer::clear())
        .execution_mode(mode)
        .build();
    let mut session = driver.start("parallel");
    let outcome = driver.run(&mut session).await.unwrap();

    assert!(matches!(outcome, Outcome::Finalized(_)));
    assert_eq!(session.plan.as_ref().unwrap().counts().completed, 4);
    slow
}

#[tokio::test]
async fn test_sequential_mode_runs_one_at_a_time_in_order() {
    let slow = run_four(ExecutionMode::Sequential).await;

    assert_eq!(slow.calls(), 4);
    assert_eq!(slow.peak(), 1);
    let order: Vec<i64> = slow
        .seen()
        .iter()
        .map(|p| p["n"].as_i64().unwrap())
        .collect();
    assert_eq!(order, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_batch_mode_bounds_parallelism() {
    let slow = run_four(ExecutionMode::Batch { max_parallel: 2 }).await;

    assert_eq!(slow.calls(), 4);
    assert_eq!(slow.peak(), 2);
}
