//! Pure functions over task collections: story grouping, completion, and
//! the idempotent merge that makes crash recovery safe.
//!
//! `accumulate` is the linchpin of resumption: re-running the phase engine
//! against an unchanged history must reproduce the same merged task set,
//! and a status observed as `completed` for an id is never downgraded by a
//! later merge input.

use std::collections::HashMap;

use super::{Task, TaskStatus};

/// Canonical grouping key for a story.
pub fn story_key(epic_ordinal: u32, story_ordinal: u32) -> String {
    format!("{}-{}", epic_ordinal, story_ordinal)
}

/// A story is complete iff its task set is non-empty and every task is
/// `completed`.
pub fn is_story_complete(tasks: &[&Task]) -> bool {
    !tasks.is_empty() && tasks.iter().all(|t| t.status.is_complete())
}

/// Merge task lists from a sequence of execution-record outputs, ordered
/// oldest to newest, deduplicating by task id.
///
/// For a duplicated id the newer record wins, except that `completed` is
/// sticky: once any input reports a task `completed`, a later input
/// carrying a lesser status for the same id is ignored. The resulting set
/// is sorted by (epic, story, sequence, id) so output order is stable
/// regardless of input interleaving.
pub fn accumulate<'a, I>(task_sets: I) -> Vec<Task>
where
    I: IntoIterator<Item = &'a [Task]>,
{
    let mut merged: HashMap<String, Task> = HashMap::new();

    for set in task_sets {
        for task in set {
            match merged.get_mut(&task.id) {
                Some(existing) => {
                    if existing.status.is_complete() && !task.status.is_complete() {
                        continue;
                    }
                    *existing = task.clone();
                }
                None => {
                    merged.insert(task.id.clone(), task.clone());
                }
            }
        }
    }

    let mut tasks: Vec<Task> = merged.into_values().collect();
    tasks.sort_by(|a, b| {
        (a.epic_ordinal, a.story_ordinal, a.sequence, &a.id).cmp(&(
            b.epic_ordinal,
            b.story_ordinal,
            b.sequence,
            &b.id,
        ))
    });
    tasks
}

/// Borrow the subset of `tasks` belonging to one story.
pub fn tasks_for_story(tasks: &[Task], epic_ordinal: u32, story_ordinal: u32) -> Vec<&Task> {
    tasks
        .iter()
        .filter(|t| t.epic_ordinal == epic_ordinal && t.story_ordinal == story_ordinal)
        .collect()
}

/// Count of tasks already in the `-fix-` namespace for a story, used to
/// continue the corrective sequence without id collisions.
pub fn fix_count(tasks: &[Task], prefix: &str) -> u32 {
    tasks.iter().filter(|t| t.id.starts_with(prefix)).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TaskPriority, TaskRole};

    fn task(id: &str, epic: u32, story: u32, seq: u32, status: TaskStatus) -> Task {
        Task {
            id: id.to_string(),
            title: format!("Task {}", id),
            description: String::new(),
            priority: TaskPriority::Medium,
            role: TaskRole::Developer,
            status,
            epic_ordinal: epic,
            story_ordinal: story,
            sequence: seq,
        }
    }

    #[test]
    fn test_story_key_format() {
        assert_eq!(story_key(2, 3), "2-3");
        assert_eq!(story_key(1, 1), "1-1");
    }

    #[test]
    fn test_empty_story_is_not_complete() {
        assert!(!is_story_complete(&[]));
    }

    #[test]
    fn test_story_complete_requires_every_task_completed() {
        let a = task("task-1-1-1", 1, 1, 1, TaskStatus::Completed);
        let b = task("task-1-1-2", 1, 1, 2, TaskStatus::Testing);
        assert!(!is_story_complete(&[&a, &b]));
        let b_done = task("task-1-1-2", 1, 1, 2, TaskStatus::Completed);
        assert!(is_story_complete(&[&a, &b_done]));
    }

    #[test]
    fn test_accumulate_dedupes_by_id() {
        let first = vec![
            task("task-1-1-1", 1, 1, 1, TaskStatus::Pending),
            task("task-1-1-2", 1, 1, 2, TaskStatus::Pending),
        ];
        let second = vec![task("task-1-1-1", 1, 1, 1, TaskStatus::Developing)];
        let merged = accumulate([first.as_slice(), second.as_slice()]);
        assert_eq!(merged.len(), 2, "duplicate ids must collapse");
        assert_eq!(merged[0].status, TaskStatus::Developing);
        assert_eq!(merged[1].status, TaskStatus::Pending);
    }

    #[test]
    fn test_accumulate_completion_is_monotonic() {
        let newer_but_lesser = vec![task("task-1-1-1", 1, 1, 1, TaskStatus::Pending)];
        let completed = vec![task("task-1-1-1", 1, 1, 1, TaskStatus::Completed)];
        let merged = accumulate([completed.as_slice(), newer_but_lesser.as_slice()]);
        assert_eq!(merged.len(), 1);
        assert_eq!(
            merged[0].status,
            TaskStatus::Completed,
            "completed must never be downgraded by a later duplicate"
        );
    }

    #[test]
    fn test_accumulate_failed_can_be_reset_by_later_record() {
        // Resume writes a new record with the task back at pending; the
        // merge must honor it (failure is not sticky, completion is).
        let failed = vec![task("task-1-1-1", 1, 1, 1, TaskStatus::Failed)];
        let reset = vec![task("task-1-1-1", 1, 1, 1, TaskStatus::Pending)];
        let merged = accumulate([failed.as_slice(), reset.as_slice()]);
        assert_eq!(merged[0].status, TaskStatus::Pending);
    }

    #[test]
    fn test_accumulate_is_idempotent() {
        let set = vec![
            task("task-1-1-1", 1, 1, 1, TaskStatus::Completed),
            task("task-1-2-1", 1, 2, 1, TaskStatus::Pending),
        ];
        let once = accumulate([set.as_slice()]);
        let twice = accumulate([set.as_slice(), set.as_slice()]);
        assert_eq!(once, twice, "merging identical history twice must be a no-op");
    }

    #[test]
    fn test_accumulate_sorts_corrective_tasks_last() {
        let originals = vec![
            task("task-1-1-2", 1, 1, 2, TaskStatus::Completed),
            task("task-1-1-1", 1, 1, 1, TaskStatus::Completed),
        ];
        let fixes = vec![task("task-1-1-fix-1", 1, 1, 1001, TaskStatus::Pending)];
        let merged = accumulate([originals.as_slice(), fixes.as_slice()]);
        let ids: Vec<&str> = merged.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["task-1-1-1", "task-1-1-2", "task-1-1-fix-1"]);
    }

    #[test]
    fn test_tasks_for_story_filters_by_ordinals() {
        let all = vec![
            task("task-1-1-1", 1, 1, 1, TaskStatus::Pending),
            task("task-1-2-1", 1, 2, 1, TaskStatus::Pending),
            task("task-2-1-1", 2, 1, 1, TaskStatus::Pending),
        ];
        let story = tasks_for_story(&all, 1, 2);
        assert_eq!(story.len(), 1);
        assert_eq!(story[0].id, "task-1-2-1");
    }

    #[test]
    fn test_fix_count_matches_namespace_prefix() {
        let all = vec![
            task("task-1-1-1", 1, 1, 1, TaskStatus::Completed),
            task("task-1-1-fix-1", 1, 1, 1001, TaskStatus::Pending),
            task("task-1-1-fix-2", 1, 1, 1002, TaskStatus::Pending),
            task("task-integration-fix-1", 0, 0, 2001, TaskStatus::Pending),
        ];
        assert_eq!(fix_count(&all, "task-1-1-fix-"), 2);
        assert_eq!(fix_count(&all, "task-integration-fix-"), 1);
        assert_eq!(fix_count(&all, "task-epic-1-fix-"), 0);
    }
}
