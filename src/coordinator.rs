//! The owning façade over the whole coordination engine.
//!
//! A [`Coordinator`] constructs and wires the lock table, task graph, rule
//! registry, message bus, detector, and resolver from one configuration
//! value, and exposes the agent-facing operations as thin delegations. The
//! individual components remain usable on their own; the façade just keeps
//! their wiring and the config defaults in one place.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::channels::{ChannelMessage, MessageBus};
use crate::config::CoordinationConfig;
use crate::deadlock::{DeadlockDetector, DeadlockReport, DeadlockResolver, FirstListed, VictimPolicy};
use crate::identity::AgentId;
use crate::locks::{self, LockMode, LockTable, ResourceStatus};
use crate::rules::{CollaborationRule, RuleRegistry};
use crate::task_graph::{DependencyGraph, TaskDependency};

/// Counts across all components, for supervisors and dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationStats {
    pub locked_resources: usize,
    pub registered_tasks: usize,
    pub collaboration_rules: usize,
    pub channels: usize,
}

pub struct Coordinator {
    config: CoordinationConfig,
    locks: Arc<LockTable>,
    graph: Arc<DependencyGraph>,
    rules: RuleRegistry,
    bus: Arc<MessageBus>,
    detector: DeadlockDetector,
    resolver: DeadlockResolver,
}

impl Coordinator {
    /// Build a coordinator with the default first-listed victim policy and
    /// the built-in collaboration rules.
    pub fn new(config: CoordinationConfig) -> Self {
        Self::with_victim_policy(config, Box::new(FirstListed))
    }

    pub fn with_victim_policy(config: CoordinationConfig, policy: Box<dyn VictimPolicy>) -> Self {
        let locks = Arc::new(LockTable::with_default_ttl(config.locks.default_ttl()));
        let graph = Arc::new(DependencyGraph::new());
        let bus = Arc::new(MessageBus::new());
        let detector = DeadlockDetector::new(Arc::clone(&locks), Arc::clone(&graph));
        let resolver = DeadlockResolver::with_policy(Arc::clone(&locks), policy);

        Self {
            config,
            locks,
            graph,
            rules: RuleRegistry::with_defaults(),
            bus,
            detector,
            resolver,
        }
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    // === Locks ===

    /// Acquire with the configured default TTL.
    pub fn acquire(
        &self,
        resource_id: &str,
        agent_id: &AgentId,
        task_id: &str,
        mode: LockMode,
    ) -> bool {
        self.locks.acquire(resource_id, agent_id, task_id, mode)
    }

    pub fn acquire_for(
        &self,
        resource_id: &str,
        agent_id: &AgentId,
        task_id: &str,
        mode: LockMode,
        ttl: Duration,
    ) -> bool {
        self.locks
            .acquire_for(resource_id, agent_id, task_id, mode, ttl)
    }

    /// Retry a contended acquire with the configured attempt count and
    /// delay.
    pub async fn acquire_with_retry(
        &self,
        resource_id: &str,
        agent_id: &AgentId,
        task_id: &str,
        mode: LockMode,
    ) -> bool {
        locks::acquire_with_retry(
            &self.locks,
            resource_id,
            agent_id,
            task_id,
            mode,
            self.config.locks.default_ttl(),
            self.config.locks.retry_attempts,
            self.config.locks.retry_delay(),
        )
        .await
    }

    pub fn release(&self, resource_id: &str, agent_id: &AgentId) -> bool {
        self.locks.release(resource_id, agent_id)
    }

    pub fn resource_status(&self, resource_id: &str) -> ResourceStatus {
        self.locks.status(resource_id)
    }

    pub fn clear_agent_locks(&self, agent_id: &AgentId) -> usize {
        self.locks.clear_agent_locks(agent_id)
    }

    // === Task dependencies ===

    pub fn register_dependency(&self, task_id: &str, depends_on: &[&str], parallel_ok: bool) {
        self.graph.register(task_id, depends_on, parallel_ok);
    }

    pub fn can_run_in_parallel(&self, a: &str, b: &str) -> bool {
        self.graph.can_run_in_parallel(a, b)
    }

    pub fn task_dependency(&self, task_id: &str) -> Option<TaskDependency> {
        self.graph.get(task_id)
    }

    // === Collaboration rules ===

    pub fn register_rule(&self, rule: CollaborationRule) {
        self.rules.register(rule);
    }

    pub fn find_collaboration(&self, agent_types: &[&str]) -> Option<CollaborationRule> {
        self.rules.find_match(agent_types)
    }

    // === Channels ===

    pub fn subscribe(&self, channel_id: &str, agent_id: &AgentId) {
        self.bus.subscribe(channel_id, agent_id);
    }

    pub fn unsubscribe(&self, channel_id: &str, agent_id: &AgentId) {
        self.bus.unsubscribe(channel_id, agent_id);
    }

    pub fn publish(&self, channel_id: &str, from: &AgentId, content: Value) -> ChannelMessage {
        self.bus.publish(channel_id, from, content)
    }

    pub fn messages(
        &self,
        channel_id: &str,
        agent_id: &AgentId,
        since: Option<chrono::DateTime<Utc>>,
    ) -> Vec<ChannelMessage> {
        self.bus.messages(channel_id, agent_id, since)
    }

    // === Deadlock handling ===

    pub fn has_deadlock(&self) -> bool {
        self.detector.has_deadlock()
    }

    pub fn has_dependency_cycle(&self) -> bool {
        self.detector.has_dependency_cycle()
    }

    /// One detect-and-resolve pass. `None` means the lock state is clean.
    /// Resolution only happens when `deadlock.auto_resolve` is set;
    /// otherwise the report carries no victim and the caller decides.
    pub fn check_deadlock(&self) -> Option<DeadlockReport> {
        let participants = self.detector.participants();
        if participants.is_empty() {
            return None;
        }

        let victim = if self.config.deadlock.auto_resolve {
            self.resolver.resolve(&participants)
        } else {
            None
        };

        Some(DeadlockReport {
            detected_at: Utc::now(),
            participants,
            victim,
        })
    }

    /// Manually break a deadlock among the given participants.
    pub fn resolve_deadlock(&self, participants: &[AgentId]) -> Option<AgentId> {
        self.resolver.resolve(participants)
    }

    // === Lifecycle & maintenance ===

    /// Drop everything an agent holds: locks on all resources and every
    /// channel subscription. Retained channel messages stay.
    pub fn retire_agent(&self, agent_id: &AgentId) {
        let released = self.locks.clear_agent_locks(agent_id);
        let unsubscribed = self.bus.unsubscribe_all(agent_id);
        info!(
            agent = %agent_id,
            released = released,
            unsubscribed = unsubscribed,
            "Retired agent"
        );
    }

    /// One maintenance pass: prune old messages, reclaim expired locks,
    /// then run the deadlock check.
    pub fn maintain(&self) -> Option<DeadlockReport> {
        let pruned = self.bus.prune_older_than(self.config.channels.retention());
        let expired = self.locks.cleanup_expired();
        if pruned > 0 || expired > 0 {
            debug!(
                pruned_messages = pruned,
                expired_locks = expired,
                "Maintenance pass"
            );
        }
        self.check_deadlock()
    }

    /// Periodic maintenance loop. Runs until the surrounding task is
    /// cancelled; everything it does is also available on demand through
    /// [`Self::maintain`].
    pub async fn run_monitor(&self) {
        let interval = self.config.deadlock.check_interval();
        debug!(interval_secs = interval.as_secs(), "Coordination monitor started");

        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.maintain();
        }
    }

    pub fn stats(&self) -> CoordinationStats {
        CoordinationStats {
            locked_resources: self.locks.len(),
            registered_tasks: self.graph.len(),
            collaboration_rules: self.rules.len(),
            channels: self.bus.channel_count(),
        }
    }

    // === Component access ===

    pub fn lock_table(&self) -> &LockTable {
        &self.locks
    }

    pub fn dependency_graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    pub fn message_bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn detector(&self) -> &DeadlockDetector {
        &self.detector
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(CoordinationConfig::default())
    }
}
