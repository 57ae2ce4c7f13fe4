//! Level Controller — pure predicates over a registry snapshot.
//!
//! These functions take a snapshot and the graph's level→task-id mapping
//! and compute facts about level progress. They perform no IO and hold no
//! state; all of a run's actual state lives in the [`RegistryDocument`]
//! passed in.

use crate::types::{RegistryDocument, TaskStatus};

/// `true` once every task at every level `< level` is `Completed`.
pub fn can_level_start(doc: &RegistryDocument, level: u32, tasks_by_level: &[(u32, Vec<String>)]) -> bool {
    tasks_by_level
        .iter()
        .filter(|(l, _)| *l < level)
        .flat_map(|(_, ids)| ids.iter())
        .all(|id| matches!(doc.tasks.get(id), Some(TaskStatus::Completed { .. })))
}

/// `true` once every task at `level` is in a terminal state
/// (`Completed` or `Blocked`).
pub fn is_level_resolved(doc: &RegistryDocument, task_ids: &[String]) -> bool {
    !task_ids.is_empty()
        && task_ids
            .iter()
            .all(|id| doc.tasks.get(id).map(TaskStatus::is_terminal).unwrap_or(false))
}

/// `true` if every task at `level` resolved successfully.
pub fn is_level_success(doc: &RegistryDocument, task_ids: &[String]) -> bool {
    !task_ids.is_empty()
        && task_ids
            .iter()
            .all(|id| doc.tasks.get(id).map(TaskStatus::is_success).unwrap_or(false))
}

/// The next level to run, or `None` if `level` is the last one.
pub fn next_level(level: u32, max_level: u32) -> Option<u32> {
    if level < max_level {
        Some(level + 1)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegistryDocument;
    use chrono::Utc;

    fn doc_with(tasks: &[(&str, TaskStatus)]) -> RegistryDocument {
        let mut doc = RegistryDocument::new("demo");
        for (id, status) in tasks {
            doc.tasks.insert(id.to_string(), status.clone());
        }
        doc
    }

    fn completed() -> TaskStatus {
        TaskStatus::Completed {
            worker_id: "w0".into(),
            completed_at: Utc::now(),
            commit_ref: "deadbeef".into(),
        }
    }

    #[test]
    fn can_level_start_requires_all_lower_levels_complete() {
        let tasks_by_level = vec![(1u32, vec!["t1".to_string()]), (2, vec!["t2".to_string()])];
        let doc = doc_with(&[("t1", TaskStatus::Pending)]);
        assert!(!can_level_start(&doc, 2, &tasks_by_level));

        let doc = doc_with(&[("t1", completed())]);
        assert!(can_level_start(&doc, 2, &tasks_by_level));
    }

    #[test]
    fn level_one_can_always_start() {
        let tasks_by_level = vec![(1u32, vec!["t1".to_string()])];
        let doc = doc_with(&[("t1", TaskStatus::Pending)]);
        assert!(can_level_start(&doc, 1, &tasks_by_level));
    }

    #[test]
    fn resolved_requires_every_task_terminal() {
        let ids = vec!["t1".to_string(), "t2".to_string()];
        let doc = doc_with(&[("t1", completed()), ("t2", TaskStatus::Pending)]);
        assert!(!is_level_resolved(&doc, &ids));

        let doc = doc_with(&[
            ("t1", completed()),
            ("t2", TaskStatus::Blocked { error: "x".into(), retry_count: 3 }),
        ]);
        assert!(is_level_resolved(&doc, &ids));
    }

    #[test]
    fn success_requires_every_task_completed() {
        let ids = vec!["t1".to_string(), "t2".to_string()];
        let doc = doc_with(&[
            ("t1", completed()),
            ("t2", TaskStatus::Blocked { error: "x".into(), retry_count: 3 }),
        ]);
        assert!(is_level_resolved(&doc, &ids));
        assert!(!is_level_success(&doc, &ids));
    }

    #[test]
    fn next_level_stops_at_max() {
        assert_eq!(next_level(1, 3), Some(2));
        assert_eq!(next_level(3, 3), None);
    }
}
