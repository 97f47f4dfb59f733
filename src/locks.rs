use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::identity::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    Exclusive,
    Shared,
}

impl LockMode {
    /// Holder identity is ignored: an agent's own exclusive lock blocks its
    /// re-acquire too. Only shared + shared coexist.
    pub fn conflicts_with(self, other: LockMode) -> bool {
        !matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exclusive => "exclusive",
            Self::Shared => "shared",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceLock {
    pub resource_id: String,
    pub agent_id: AgentId,
    pub mode: LockMode,
    pub task_id: String,
    pub acquired_at: Instant,
    pub expires_at: Instant,
}

impl ResourceLock {
    pub fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }

    pub fn remaining_time(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub available: bool,
    pub locked_by: Vec<AgentId>,
    pub lock_modes: Vec<LockMode>,
}

/// Concurrent lock table keyed by resource id.
///
/// Acquisition is an atomic check-and-set under the resource's map entry;
/// there is no wait queue. A denied acquire returns `false` immediately and
/// the caller decides whether to retry, re-plan, or give up. Expired locks
/// are invisible to every read and are physically dropped whenever a write
/// touches the same resource.
pub struct LockTable {
    locks: DashMap<String, Vec<ResourceLock>>,
    default_ttl: Duration,
}

impl LockTable {
    pub fn new() -> Self {
        Self::with_default_ttl(Duration::from_secs(300))
    }

    pub fn with_default_ttl(default_ttl: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Acquire with the table's default TTL.
    pub fn acquire(
        &self,
        resource_id: &str,
        agent_id: &AgentId,
        task_id: &str,
        mode: LockMode,
    ) -> bool {
        self.acquire_for(resource_id, agent_id, task_id, mode, self.default_ttl)
    }

    /// Try to take a lock on `resource_id`, expiring after `ttl`.
    ///
    /// Returns `false` on conflict without queueing or blocking. Conflict is
    /// decided against the non-expired locks only; expired ones are removed
    /// here as a side effect.
    pub fn acquire_for(
        &self,
        resource_id: &str,
        agent_id: &AgentId,
        task_id: &str,
        mode: LockMode,
        ttl: Duration,
    ) -> bool {
        let mut entry = self.locks.entry(resource_id.to_string()).or_default();
        entry.retain(|lock| !lock.is_expired());

        if let Some(holder) = entry.iter().find(|lock| lock.mode.conflicts_with(mode)) {
            debug!(
                resource = %resource_id,
                agent = %agent_id,
                held_by = %holder.agent_id,
                held_mode = holder.mode.as_str(),
                requested = mode.as_str(),
                "Denied resource lock"
            );
            return false;
        }

        let now = Instant::now();
        entry.push(ResourceLock {
            resource_id: resource_id.to_string(),
            agent_id: agent_id.clone(),
            mode,
            task_id: task_id.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        });

        debug!(
            resource = %resource_id,
            agent = %agent_id,
            task = %task_id,
            mode = mode.as_str(),
            ttl_secs = ttl.as_secs(),
            "Granted resource lock"
        );

        true
    }

    /// Drop every lock `agent_id` holds on `resource_id`. Idempotent:
    /// releasing an unheld resource is a no-op. Returns whether anything
    /// was actually released.
    pub fn release(&self, resource_id: &str, agent_id: &AgentId) -> bool {
        let removed = {
            let Some(mut entry) = self.locks.get_mut(resource_id) else {
                return false;
            };
            let before = entry.len();
            entry.retain(|lock| lock.agent_id != *agent_id);
            before - entry.len()
        };
        self.locks.remove_if(resource_id, |_, locks| locks.is_empty());

        if removed > 0 {
            debug!(
                resource = %resource_id,
                agent = %agent_id,
                count = removed,
                "Released resource locks"
            );
        }
        removed > 0
    }

    /// Non-mutating snapshot of a resource's lock state, with expired locks
    /// already filtered out.
    pub fn status(&self, resource_id: &str) -> ResourceStatus {
        let (locked_by, lock_modes): (Vec<_>, Vec<_>) = match self.locks.get(resource_id) {
            Some(entry) => entry
                .iter()
                .filter(|lock| !lock.is_expired())
                .map(|lock| (lock.agent_id.clone(), lock.mode))
                .unzip(),
            None => (Vec::new(), Vec::new()),
        };

        ResourceStatus {
            available: locked_by.is_empty(),
            locked_by,
            lock_modes,
        }
    }

    /// Remove every lock the agent holds across all resources. Used when an
    /// agent retires or is picked as a deadlock victim.
    pub fn clear_agent_locks(&self, agent_id: &AgentId) -> usize {
        let mut removed = 0;
        self.locks.retain(|_, locks| {
            let before = locks.len();
            locks.retain(|lock| lock.agent_id != *agent_id);
            removed += before - locks.len();
            !locks.is_empty()
        });

        if removed > 0 {
            debug!(agent = %agent_id, count = removed, "Cleared agent locks");
        }
        removed
    }

    pub fn locks_held_by(&self, agent_id: &AgentId) -> Vec<ResourceLock> {
        self.locks
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|lock| !lock.is_expired() && lock.agent_id == *agent_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Distinct non-expired holders per resource. This is the view the
    /// deadlock detector builds its graph from.
    pub fn active_holders(&self) -> Vec<(String, Vec<AgentId>)> {
        self.locks
            .iter()
            .filter_map(|entry| {
                let mut holders: Vec<AgentId> = Vec::new();
                for lock in entry.value().iter().filter(|l| !l.is_expired()) {
                    if !holders.contains(&lock.agent_id) {
                        holders.push(lock.agent_id.clone());
                    }
                }
                (!holders.is_empty()).then(|| (entry.key().clone(), holders))
            })
            .collect()
    }

    /// Physically drop expired locks everywhere. Reads never see them either
    /// way; this just reclaims the memory.
    pub fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        self.locks.retain(|_, locks| {
            let before = locks.len();
            locks.retain(|lock| !lock.is_expired());
            removed += before - locks.len();
            !locks.is_empty()
        });
        removed
    }

    /// Number of resources with at least one live lock.
    pub fn len(&self) -> usize {
        self.locks
            .iter()
            .filter(|entry| entry.value().iter().any(|lock| !lock.is_expired()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller-side retry loop around [`LockTable::acquire_for`]. The table
/// itself never blocks; this polls it with a fixed delay between attempts.
pub async fn acquire_with_retry(
    table: &LockTable,
    resource_id: &str,
    agent_id: &AgentId,
    task_id: &str,
    mode: LockMode,
    ttl: Duration,
    max_retries: usize,
    retry_delay: Duration,
) -> bool {
    for attempt in 0..max_retries {
        if table.acquire_for(resource_id, agent_id, task_id, mode, ttl) {
            return true;
        }
        if attempt + 1 < max_retries {
            debug!(
                resource = %resource_id,
                agent = %agent_id,
                attempt = attempt,
                delay_ms = retry_delay.as_millis() as u64,
                "Lock contended, retrying"
            );
            tokio::time::sleep(retry_delay).await;
        }
    }

    false
}
