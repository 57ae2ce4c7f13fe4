//! Task graph parsing and validation.
//!
//! Level assignment and cycle detection both use Kahn's algorithm over the
//! prerequisite edges: repeatedly peel off tasks whose prerequisites have
//! all already been peeled, tracking the longest chain length reached so
//! far. A task whose declared `level` disagrees with that computed chain
//! length is rejected — this catches documents where dependencies were
//! edited without updating the `level` field.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{GraphError, GraphResult};
use crate::types::{Graph, GraphDocument, Task};

/// Parse a task graph document from JSON bytes. Does not validate.
pub fn parse(bytes: &[u8]) -> GraphResult<GraphDocument> {
    let doc: GraphDocument = serde_json::from_slice(bytes)?;
    Ok(doc)
}

/// Validate a parsed document and produce an immutable [`Graph`].
pub fn validate(doc: GraphDocument) -> GraphResult<Graph> {
    let GraphDocument {
        feature,
        version,
        tasks,
    } = doc;

    check_duplicates(&tasks)?;
    check_prerequisites_exist(&tasks)?;
    let computed_levels = compute_levels(&tasks)?;
    check_level_agreement(&tasks, &computed_levels)?;
    check_prerequisite_level_ordering(&tasks)?;
    check_ownership_exclusivity(&tasks)?;

    tracing::info!(feature = %feature, task_count = tasks.len(), "task graph validated");
    Ok(Graph::new(feature, version, tasks))
}

/// Convenience: parse then validate in one call.
pub fn parse_and_validate(bytes: &[u8]) -> GraphResult<Graph> {
    validate(parse(bytes)?)
}

fn check_duplicates(tasks: &[Task]) -> GraphResult<()> {
    let mut seen = HashSet::new();
    for task in tasks {
        if !seen.insert(task.id.as_str()) {
            return Err(GraphError::DuplicateTaskId(task.id.clone()));
        }
    }
    Ok(())
}

fn check_prerequisites_exist(tasks: &[Task]) -> GraphResult<()> {
    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    for task in tasks {
        for prereq in &task.prerequisites {
            if !ids.contains(prereq.as_str()) {
                return Err(GraphError::UnknownPrerequisite {
                    task_id: task.id.clone(),
                    prereq_id: prereq.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm: returns the longest-prerequisite-chain depth (1-based)
/// for every task, or a [`GraphError::CycleDetected`] naming the tasks still
/// unresolved when the queue runs dry.
fn compute_levels(tasks: &[Task]) -> GraphResult<HashMap<String, u32>> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for task in tasks {
        in_degree.entry(task.id.as_str()).or_insert(0);
        for prereq in &task.prerequisites {
            *in_degree.entry(task.id.as_str()).or_insert(0) += 1;
            dependents.entry(prereq.as_str()).or_default().push(task.id.as_str());
        }
    }

    let mut depth: HashMap<String, u32> = HashMap::new();
    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(id, _)| *id)
        .collect();
    for id in &queue {
        depth.insert(id.to_string(), 1);
    }

    let mut remaining = in_degree.clone();
    let mut resolved = 0usize;

    while let Some(id) = queue.pop_front() {
        resolved += 1;
        let my_depth = depth[id];
        if let Some(deps) = dependents.get(id) {
            for &dep in deps {
                let entry = remaining.get_mut(dep).expect("dependent has in-degree entry");
                *entry -= 1;
                let candidate = my_depth + 1;
                let current = depth.get(dep).copied().unwrap_or(0);
                if candidate > current {
                    depth.insert(dep.to_string(), candidate);
                }
                if *entry == 0 {
                    queue.push_back(dep);
                }
            }
        }
    }

    if resolved != tasks.len() {
        let unresolved: Vec<String> = remaining
            .iter()
            .filter(|(_, &deg)| deg > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        return Err(GraphError::CycleDetected {
            task_ids: unresolved,
        });
    }

    Ok(depth)
}

fn check_level_agreement(tasks: &[Task], computed: &HashMap<String, u32>) -> GraphResult<()> {
    for task in tasks {
        let expected = computed[&task.id];
        if task.level != expected {
            return Err(GraphError::LevelMismatch {
                task_id: task.id.clone(),
                declared: task.level,
                computed: expected,
            });
        }
    }
    Ok(())
}

fn check_prerequisite_level_ordering(tasks: &[Task]) -> GraphResult<()> {
    let levels: HashMap<&str, u32> = tasks.iter().map(|t| (t.id.as_str(), t.level)).collect();
    for task in tasks {
        for prereq in &task.prerequisites {
            let prereq_level = levels[prereq.as_str()];
            if prereq_level >= task.level {
                return Err(GraphError::PrerequisiteLevelViolation {
                    task_id: task.id.clone(),
                    level: task.level,
                    prereq_id: prereq.clone(),
                    prereq_level,
                });
            }
        }
    }
    Ok(())
}

fn check_ownership_exclusivity(tasks: &[Task]) -> GraphResult<()> {
    let mut by_level: HashMap<u32, Vec<&Task>> = HashMap::new();
    for task in tasks {
        by_level.entry(task.level).or_default().push(task);
    }
    for (level, level_tasks) in by_level {
        let mut owners: HashMap<&str, &str> = HashMap::new();
        for task in &level_tasks {
            for path in task.files.owned_paths() {
                if let Some(&first) = owners.get(path) {
                    if first != task.id {
                        return Err(GraphError::OwnershipCollision {
                            level,
                            first: first.to_string(),
                            second: task.id.clone(),
                            path: path.to_string(),
                        });
                    }
                } else {
                    owners.insert(path, task.id.as_str());
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileTouches, VerificationSpec};

    fn task(id: &str, level: u32, prereqs: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            level,
            prerequisites: prereqs.iter().map(|s| s.to_string()).collect(),
            files: FileTouches::default(),
            verification: VerificationSpec {
                command: "true".to_string(),
                timeout_secs: 30,
            },
            estimated_duration_secs: None,
        }
    }

    fn doc(tasks: Vec<Task>) -> GraphDocument {
        GraphDocument {
            feature: "demo".to_string(),
            version: 1,
            tasks,
        }
    }

    #[test]
    fn validates_a_simple_chain() {
        let tasks = vec![task("t1", 1, &[]), task("t2", 2, &["t1"])];
        let graph = validate(doc(tasks)).expect("valid graph");
        assert_eq!(graph.max_level(), 2);
        assert_eq!(graph.tasks_at_level(1), &["t1".to_string()]);
    }

    #[test]
    fn rejects_unknown_prerequisite() {
        let tasks = vec![task("t1", 1, &["ghost"])];
        let err = validate(doc(tasks)).unwrap_err();
        assert!(matches!(err, GraphError::UnknownPrerequisite { .. }));
    }

    #[test]
    fn detects_a_cycle() {
        let tasks = vec![task("a", 1, &["b"]), task("b", 1, &["a"])];
        let err = validate(doc(tasks)).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn rejects_level_mismatch() {
        // t2 depends on t1, so its computed level is 2, but it declares 5.
        let tasks = vec![task("t1", 1, &[]), task("t2", 5, &["t1"])];
        let err = validate(doc(tasks)).unwrap_err();
        assert!(matches!(err, GraphError::LevelMismatch { .. }));
    }

    #[test]
    fn rejects_prerequisite_at_same_or_higher_level() {
        let mut t2 = task("t2", 1, &["t1"]);
        t2.level = 1;
        let mut t1 = task("t1", 1, &[]);
        t1.level = 1;
        let err = validate(doc(vec![t1, t2])).unwrap_err();
        assert!(matches!(
            err,
            GraphError::LevelMismatch { .. } | GraphError::PrerequisiteLevelViolation { .. }
        ));
    }

    #[test]
    fn rejects_ownership_collision_within_a_level() {
        let mut t1 = task("t1", 1, &[]);
        t1.files.create.push("src/lib.rs".to_string());
        let mut t2 = task("t2", 1, &[]);
        t2.files.modify.push("src/lib.rs".to_string());
        let err = validate(doc(vec![t1, t2])).unwrap_err();
        assert!(matches!(err, GraphError::OwnershipCollision { .. }));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let tasks = vec![task("t1", 1, &[]), task("t1", 1, &[])];
        let err = validate(doc(tasks)).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateTaskId(_)));
    }

    #[test]
    fn parallel_tasks_at_same_level_are_fine() {
        let tasks = vec![task("t1", 1, &[]), task("t2", 1, &[])];
        let graph = validate(doc(tasks)).expect("valid graph");
        assert_eq!(graph.max_parallelism_at_level(1), 2);
    }
}
