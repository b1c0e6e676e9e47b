//! Dependency resolution over a task list.
//!
//! Pure functions: nothing here mutates a task. A task is eligible when it is
//! Pending and every id in its `depends_on` maps to a Completed task. Skipped
//! and Failed dependencies never satisfy, and neither does an id that names
//! no task. Ties are broken by position in the slice.

use std::collections::HashMap;

use crate::core::{Task, TaskId, TaskStatus};

fn status_index(tasks: &[Task]) -> HashMap<&TaskId, TaskStatus> {
    tasks.iter().map(|t| (&t.id, t.status)).collect()
}

fn dependencies_met(task: &Task, statuses: &HashMap<&TaskId, TaskStatus>) -> bool {
    task.depends_on
        .iter()
        .all(|dep| statuses.get(dep) == Some(&TaskStatus::Completed))
}

/// First eligible task in insertion order.
pub fn next_ready(tasks: &[Task]) -> Option<&Task> {
    ready_batch(tasks, 1).into_iter().next()
}

/// Up to `limit` eligible tasks in insertion order. Tasks in one batch never
/// depend on each other, since none of them is Completed yet.
pub fn ready_batch(tasks: &[Task], limit: usize) -> Vec<&Task> {
    let statuses = status_index(tasks);
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending && dependencies_met(t, &statuses))
        .take(limit)
        .collect()
}

/// Pending tasks that can never become eligible: some dependency, directly
/// or transitively, ended Failed or Skipped.
pub fn blocked(tasks: &[Task]) -> Vec<&Task> {
    let by_id: HashMap<&TaskId, &Task> = tasks.iter().map(|t| (&t.id, t)).collect();
    let mut memo: HashMap<&TaskId, bool> = HashMap::new();
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending && is_dead(t, &by_id, &mut memo))
        .collect()
}

fn is_dead<'a>(
    task: &'a Task,
    by_id: &HashMap<&'a TaskId, &'a Task>,
    memo: &mut HashMap<&'a TaskId, bool>,
) -> bool {
    if let Some(known) = memo.get(&task.id) {
        return *known;
    }
    // Provisional entry terminates a walk through a (malformed) cycle.
    memo.insert(&task.id, false);
    let dead = match task.status {
        TaskStatus::Failed | TaskStatus::Skipped => true,
        TaskStatus::Completed | TaskStatus::Ready | TaskStatus::Running => false,
        TaskStatus::Pending => task.depends_on.iter().any(|dep| match by_id.get(dep) {
            Some(parent) => {
                matches!(parent.status, TaskStatus::Failed | TaskStatus::Skipped)
                    || (parent.status == TaskStatus::Pending && is_dead(parent, by_id, memo))
            }
            None => true,
        }),
    };
    memo.insert(&task.id, dead);
    dead
}

/// No task is eligible and none is Ready or Running. The remaining Pending
/// tasks, if any, are blocked.
pub fn is_exhausted(tasks: &[Task]) -> bool {
    next_ready(tasks).is_none()
        && !tasks
            .iter()
            .any(|t| matches!(t.status, TaskStatus::Ready | TaskStatus::Running))
}
