//! Worker Assignment Calculator.
//!
//! Round-robins tasks within each level across a capped worker count. The
//! cap keeps a run from spinning up more workers than the graph can ever
//! use in parallel.

use crate::error::{GraphError, GraphResult};
use crate::types::{Graph, Plan};

/// Compute a [`Plan`] assigning every task in `graph` to one of at most
/// `requested_workers` workers.
pub fn assign(graph: &Graph, requested_workers: usize) -> GraphResult<Plan> {
    if requested_workers == 0 {
        return Err(GraphError::ZeroWorkers);
    }

    let max_parallelism = graph
        .levels()
        .map(|l| graph.max_parallelism_at_level(l))
        .max()
        .unwrap_or(1)
        .max(1);
    let worker_count = requested_workers.min(max_parallelism);

    let mut plan = Plan::new(worker_count);
    for level in graph.levels() {
        for (i, task_id) in graph.tasks_at_level(level).iter().enumerate() {
            let worker_id = i % worker_count;
            plan.assign(worker_id, level, task_id.clone());
        }
    }

    tracing::info!(
        requested_workers,
        worker_count,
        "computed worker assignment plan"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::validate;
    use crate::types::{FileTouches, GraphDocument, Task, VerificationSpec};

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

    fn graph(tasks: Vec<Task>) -> Graph {
        validate(GraphDocument {
            feature: "demo".to_string(),
            version: 1,
            tasks,
        })
        .expect("valid graph")
    }

    #[test]
    fn caps_worker_count_to_max_parallelism() {
        let g = graph(vec![task("t1", 1, &[]), task("t2", 1, &[])]);
        let plan = assign(&g, 8).expect("plan");
        assert_eq!(plan.worker_count, 2);
    }

    #[test]
    fn round_robins_within_a_level() {
        let g = graph(vec![
            task("t1", 1, &[]),
            task("t2", 1, &[]),
            task("t3", 1, &[]),
        ]);
        let plan = assign(&g, 2).expect("plan");
        // sorted order: t1, t2, t3 -> worker0=[t1,t3], worker1=[t2]
        assert_eq!(plan.tasks_for(0, 1), &["t1".to_string(), "t3".to_string()]);
        assert_eq!(plan.tasks_for(1, 1), &["t2".to_string()]);
    }

    #[test]
    fn no_task_shared_between_workers_in_a_level() {
        let g = graph(vec![
            task("t1", 1, &[]),
            task("t2", 1, &[]),
            task("t3", 2, &["t1"]),
            task("t4", 2, &["t2"]),
        ]);
        let plan = assign(&g, 2).expect("plan");
        let w0: Vec<_> = plan.tasks_for(0, 2).to_vec();
        let w1: Vec<_> = plan.tasks_for(1, 2).to_vec();
        assert!(w0.iter().all(|t| !w1.contains(t)));
    }

    #[test]
    fn rejects_zero_workers() {
        let g = graph(vec![task("t1", 1, &[])]);
        let err = assign(&g, 0).unwrap_err();
        assert!(matches!(err, GraphError::ZeroWorkers));
    }

    #[test]
    fn active_workers_at_reflects_assignment() {
        let g = graph(vec![task("t1", 1, &[]), task("t2", 1, &[])]);
        let plan = assign(&g, 2).expect("plan");
        assert_eq!(plan.active_workers_at(1), vec![0, 1]);
    }
}
