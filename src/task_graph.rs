//! Task dependency records with reverse-edge bookkeeping.
//!
//! Tasks declare what they depend on; the graph maintains the inverse
//! `blocked_by` sets as a side effect. Registration never rejects cycles:
//! two tasks may legally declare each other as dependencies, and the
//! deadlock detector is where the fallout gets caught.

use std::collections::HashSet;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One task's dependency record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDependency {
    pub task_id: String,
    /// Tasks this one depends on.
    pub depends_on: HashSet<String>,
    /// Tasks that declared a dependency on this one. Populated only as a
    /// side effect of their registration, never set directly.
    pub blocked_by: HashSet<String>,
    /// Whether this task tolerates running alongside other tasks at all.
    pub parallel_ok: bool,
}

impl TaskDependency {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            depends_on: HashSet::new(),
            blocked_by: HashSet::new(),
            parallel_ok: true,
        }
    }
}

/// Concurrent task dependency graph keyed by task id.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    tasks: DashMap<String, TaskDependency>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
        }
    }

    /// Insert or update a task's record and append the reverse edges.
    ///
    /// Updating replaces `depends_on` and the parallelism flag but keeps the
    /// accumulated `blocked_by` set, which belongs to other registrants.
    /// A dependee that is not registered yet gets no reverse edge; the
    /// forward edge is still recorded.
    pub fn register(&self, task_id: &str, depends_on: &[&str], parallel_ok: bool) {
        {
            let mut record = self
                .tasks
                .entry(task_id.to_string())
                .or_insert_with(|| TaskDependency::new(task_id));
            record.depends_on = depends_on.iter().map(|s| s.to_string()).collect();
            record.parallel_ok = parallel_ok;
        }

        for dependee in depends_on {
            match self.tasks.get_mut(*dependee) {
                Some(mut record) => {
                    record.blocked_by.insert(task_id.to_string());
                }
                None => {
                    debug!(
                        task = %task_id,
                        dependee = %dependee,
                        "Dependee not registered, reverse edge dropped"
                    );
                }
            }
        }

        debug!(
            task = %task_id,
            depends_on = depends_on.len(),
            parallel = parallel_ok,
            "Registered task dependencies"
        );
    }

    /// Whether two tasks may run at the same time.
    ///
    /// Unknown tasks are assumed independent. A direct dependency or a
    /// recorded reverse edge in either direction forbids overlap; otherwise
    /// both tasks' parallelism flags must agree.
    pub fn can_run_in_parallel(&self, a: &str, b: &str) -> bool {
        let Some(rec_a) = self.tasks.get(a).map(|r| r.clone()) else {
            return true;
        };
        let Some(rec_b) = self.tasks.get(b).map(|r| r.clone()) else {
            return true;
        };

        if rec_a.depends_on.contains(b) || rec_b.depends_on.contains(a) {
            return false;
        }
        if rec_a.blocked_by.contains(b) || rec_b.blocked_by.contains(a) {
            return false;
        }

        rec_a.parallel_ok && rec_b.parallel_ok
    }

    pub fn get(&self, task_id: &str) -> Option<TaskDependency> {
        self.tasks.get(task_id).map(|record| record.clone())
    }

    pub fn is_registered(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    /// Forward edges (`task -> depends_on`) for cycle analysis.
    pub fn dependency_edges(&self) -> Vec<(String, Vec<String>)> {
        self.tasks
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().depends_on.iter().cloned().collect(),
                )
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
