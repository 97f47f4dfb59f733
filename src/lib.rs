pub mod channels;
pub mod config;
pub mod coordinator;
pub mod deadlock;
pub mod error;
pub mod identity;
pub mod locks;
pub mod rules;
pub mod task_graph;

pub use channels::{ChannelMessage, MessageBus};
pub use config::{ChannelConfig, CoordinationConfig, DeadlockConfig, LockConfig};
pub use coordinator::{CoordinationStats, Coordinator};
pub use deadlock::{DeadlockDetector, DeadlockReport, DeadlockResolver, FirstListed, VictimPolicy};
pub use error::{GridlockError, Result};
pub use identity::AgentId;
pub use locks::{LockMode, LockTable, ResourceLock, ResourceStatus, acquire_with_retry};
pub use rules::{CollaborationMode, CollaborationRule, RuleRegistry};
pub use task_graph::{DependencyGraph, TaskDependency};
