//! Deadlock detection over the lock table, and the resolver that breaks
//! cycles by force-releasing a victim's locks.
//!
//! The detection graph is deliberately coarse: every resource with two or
//! more live holders contributes edges between all of them, regardless of
//! lock mode. Two shared readers on one resource therefore already count
//! as a cycle. That over-reports, but it errs on the side of surfacing
//! contention hot spots and keeps detection independent of any waiter
//! bookkeeping (the lock table has none).

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::identity::AgentId;
use crate::locks::LockTable;
use crate::task_graph::DependencyGraph;

/// Outcome of one detect-and-resolve pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlockReport {
    pub detected_at: DateTime<Utc>,
    pub participants: Vec<AgentId>,
    /// Set when a resolver ran and picked someone.
    pub victim: Option<AgentId>,
}

/// Read-only deadlock analysis over the lock table and task graph.
pub struct DeadlockDetector {
    locks: Arc<LockTable>,
    graph: Arc<DependencyGraph>,
}

impl DeadlockDetector {
    pub fn new(locks: Arc<LockTable>, graph: Arc<DependencyGraph>) -> Self {
        Self { locks, graph }
    }

    /// Whether the current lock state contains a cycle. Never fails; a
    /// clean table is simply `false`.
    pub fn has_deadlock(&self) -> bool {
        match find_cycle(&self.holder_graph()) {
            Some(cycle) => {
                warn!(participants = ?cycle, "Deadlock cycle detected");
                true
            }
            None => false,
        }
    }

    /// Agents on the first cycle found, empty when there is none.
    ///
    /// [`Self::has_deadlock`] only answers yes/no; callers that need the
    /// members re-derive them here.
    pub fn participants(&self) -> Vec<AgentId> {
        find_cycle(&self.holder_graph()).unwrap_or_default()
    }

    /// Cycle check over the task graph's `depends_on` edges. Registration
    /// deliberately accepts cycles; this is where they surface.
    pub fn has_dependency_cycle(&self) -> bool {
        let mut graph: HashMap<String, HashSet<String>> = HashMap::new();
        for (task, deps) in self.graph.dependency_edges() {
            graph.entry(task).or_default().extend(deps);
        }
        find_cycle(&graph).is_some()
    }

    fn holder_graph(&self) -> HashMap<AgentId, HashSet<AgentId>> {
        let mut graph: HashMap<AgentId, HashSet<AgentId>> = HashMap::new();
        for (_, holders) in self.locks.active_holders() {
            if holders.len() < 2 {
                continue;
            }
            for a in &holders {
                for b in &holders {
                    if a != b {
                        graph.entry(a.clone()).or_default().insert(b.clone());
                    }
                }
            }
        }
        graph
    }
}

fn find_cycle<N>(graph: &HashMap<N, HashSet<N>>) -> Option<Vec<N>>
where
    N: Clone + Eq + Hash,
{
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for node in graph.keys() {
        if !visited.contains(node)
            && let Some(cycle) = dfs_cycle(node, graph, &mut visited, &mut rec_stack, &mut path)
        {
            return Some(cycle);
        }
    }
    None
}

fn dfs_cycle<N>(
    node: &N,
    graph: &HashMap<N, HashSet<N>>,
    visited: &mut HashSet<N>,
    rec_stack: &mut HashSet<N>,
    path: &mut Vec<N>,
) -> Option<Vec<N>>
where
    N: Clone + Eq + Hash,
{
    visited.insert(node.clone());
    rec_stack.insert(node.clone());
    path.push(node.clone());

    if let Some(neighbors) = graph.get(node) {
        for next in neighbors {
            if !visited.contains(next) {
                if let Some(cycle) = dfs_cycle(next, graph, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(next) {
                let start = path.iter().position(|n| n == next).unwrap_or(0);
                return Some(path[start..].to_vec());
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    None
}

/// Chooses which participant loses its locks when a deadlock is broken.
pub trait VictimPolicy: Send + Sync {
    fn choose(&self, participants: &[AgentId]) -> Option<AgentId>;
}

/// Default policy: the first listed participant is sacrificed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstListed;

impl VictimPolicy for FirstListed {
    fn choose(&self, participants: &[AgentId]) -> Option<AgentId> {
        participants.first().cloned()
    }
}

/// Breaks deadlocks by force-releasing every lock of one participant.
pub struct DeadlockResolver {
    locks: Arc<LockTable>,
    policy: Box<dyn VictimPolicy>,
}

impl DeadlockResolver {
    pub fn new(locks: Arc<LockTable>) -> Self {
        Self::with_policy(locks, Box::new(FirstListed))
    }

    pub fn with_policy(locks: Arc<LockTable>, policy: Box<dyn VictimPolicy>) -> Self {
        Self { locks, policy }
    }

    /// Pick a victim among `participants` and clear its locks. Returns the
    /// victim, or `None` for an empty participant list.
    pub fn resolve(&self, participants: &[AgentId]) -> Option<AgentId> {
        let victim = self.policy.choose(participants)?;
        let released = self.locks.clear_agent_locks(&victim);
        warn!(
            victim = %victim,
            released = released,
            participants = participants.len(),
            "Force-released locks to break deadlock"
        );
        Some(victim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::LockMode;
    use std::time::Duration;

    fn setup() -> (Arc<LockTable>, Arc<DependencyGraph>, DeadlockDetector) {
        let locks = Arc::new(LockTable::new());
        let graph = Arc::new(DependencyGraph::new());
        let detector = DeadlockDetector::new(Arc::clone(&locks), Arc::clone(&graph));
        (locks, graph, detector)
    }

    #[test]
    fn test_no_deadlock_without_doubly_held_resource() {
        let (locks, _graph, detector) = setup();
        let x = AgentId::new("agent-x");
        let y = AgentId::new("agent-y");

        assert!(locks.acquire("r1", &x, "t1", LockMode::Exclusive));
        assert!(locks.acquire("r2", &y, "t2", LockMode::Exclusive));

        assert!(!detector.has_deadlock());
        assert!(detector.participants().is_empty());
    }

    #[test]
    fn test_doubly_held_resource_is_a_cycle() {
        let (locks, _graph, detector) = setup();
        let x = AgentId::new("agent-x");
        let y = AgentId::new("agent-y");

        assert!(locks.acquire("r1", &x, "t1", LockMode::Exclusive));
        assert!(locks.acquire("r2", &y, "t2", LockMode::Exclusive));
        assert!(locks.acquire("r3", &x, "t1", LockMode::Shared));
        assert!(locks.acquire("r3", &y, "t2", LockMode::Shared));

        assert!(detector.has_deadlock());

        let participants = detector.participants();
        assert_eq!(participants.len(), 2);
        assert!(participants.contains(&x));
        assert!(participants.contains(&y));
    }

    #[test]
    fn test_expired_holders_do_not_count() {
        let (locks, _graph, detector) = setup();
        let x = AgentId::new("agent-x");
        let y = AgentId::new("agent-y");

        assert!(locks.acquire_for("r3", &x, "t1", LockMode::Shared, Duration::from_millis(5)));
        assert!(locks.acquire_for("r3", &y, "t2", LockMode::Shared, Duration::from_millis(5)));
        std::thread::sleep(Duration::from_millis(20));

        assert!(!detector.has_deadlock());
    }

    #[test]
    fn test_resolver_takes_first_listed() {
        let (locks, _graph, _detector) = setup();
        let x = AgentId::new("agent-x");
        let y = AgentId::new("agent-y");

        assert!(locks.acquire("r1", &x, "t1", LockMode::Exclusive));
        assert!(locks.acquire("r2", &y, "t2", LockMode::Exclusive));

        let resolver = DeadlockResolver::new(Arc::clone(&locks));
        let victim = resolver.resolve(&[y.clone(), x.clone()]);

        assert_eq!(victim, Some(y.clone()));
        assert!(locks.status("r2").available);
        assert!(!locks.status("r1").available);

        assert_eq!(resolver.resolve(&[]), None);
    }

    #[test]
    fn test_resolver_custom_policy() {
        struct LastListed;
        impl VictimPolicy for LastListed {
            fn choose(&self, participants: &[AgentId]) -> Option<AgentId> {
                participants.last().cloned()
            }
        }

        let (locks, _graph, _detector) = setup();
        let x = AgentId::new("agent-x");
        let y = AgentId::new("agent-y");
        assert!(locks.acquire("r1", &x, "t1", LockMode::Exclusive));
        assert!(locks.acquire("r2", &y, "t2", LockMode::Exclusive));

        let resolver = DeadlockResolver::with_policy(Arc::clone(&locks), Box::new(LastListed));
        assert_eq!(resolver.resolve(&[x.clone(), y.clone()]), Some(y));
    }

    #[test]
    fn test_resolve_breaks_detected_cycle() {
        let (locks, _graph, detector) = setup();
        let x = AgentId::new("agent-x");
        let y = AgentId::new("agent-y");

        assert!(locks.acquire("r3", &x, "t1", LockMode::Shared));
        assert!(locks.acquire("r3", &y, "t2", LockMode::Shared));
        assert!(detector.has_deadlock());

        let resolver = DeadlockResolver::new(Arc::clone(&locks));
        let victim = resolver.resolve(&detector.participants());
        assert!(victim.is_some());

        assert!(!detector.has_deadlock());
    }

    #[test]
    fn test_dependency_cycle_detection() {
        let (_locks, graph, detector) = setup();

        graph.register("A", &["B"], true);
        assert!(!detector.has_dependency_cycle());

        graph.register("B", &["A"], true);
        assert!(detector.has_dependency_cycle());
    }

    #[test]
    fn test_acyclic_chain_is_clean() {
        let (_locks, graph, detector) = setup();

        graph.register("A", &[], true);
        graph.register("B", &["A"], true);
        graph.register("C", &["B"], true);

        assert!(!detector.has_dependency_cycle());
    }
}
