//! Agent identity types shared across the coordination engine.
//!
//! Agents are identified by opaque strings of the form `<type>-<instance>`
//! (e.g. `converter-0`). Resource, task, and channel identifiers stay plain
//! strings; only agents get a newtype because they appear in lock records,
//! channel membership, and deadlock participant lists alike.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The built-in agent type names used by the default collaboration rules.
pub const AGENT_TYPE_CONVERTER: &str = "converter";
pub const AGENT_TYPE_VALIDATOR: &str = "validator";
pub const AGENT_TYPE_OPTIMIZER: &str = "optimizer";
pub const AGENT_TYPE_DOCUMENTER: &str = "documenter";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn converter(instance: usize) -> Self {
        Self(format!("{AGENT_TYPE_CONVERTER}-{instance}"))
    }

    pub fn validator(instance: usize) -> Self {
        Self(format!("{AGENT_TYPE_VALIDATOR}-{instance}"))
    }

    pub fn optimizer(instance: usize) -> Self {
        Self(format!("{AGENT_TYPE_OPTIMIZER}-{instance}"))
    }

    pub fn documenter(instance: usize) -> Self {
        Self(format!("{AGENT_TYPE_DOCUMENTER}-{instance}"))
    }

    pub fn typed(agent_type: &str, instance: usize) -> Self {
        Self(format!("{agent_type}-{instance}"))
    }

    /// The agent type prefix, i.e. everything before the trailing
    /// `-<instance>` suffix. Ids without such a suffix are returned whole.
    pub fn agent_type(&self) -> &str {
        match self.0.rsplit_once('-') {
            Some((prefix, suffix)) if suffix.chars().all(|c| c.is_ascii_digit()) => prefix,
            _ => &self.0,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for AgentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_formats() {
        assert_eq!(AgentId::converter(0).as_str(), "converter-0");
        assert_eq!(AgentId::validator(2).as_str(), "validator-2");
        assert_eq!(AgentId::optimizer(1).as_str(), "optimizer-1");
        assert_eq!(AgentId::documenter(0).as_str(), "documenter-0");
        assert_eq!(AgentId::typed("profiler", 3).as_str(), "profiler-3");
        let id: String = AgentId::converter(1).into();
        assert_eq!(id, "converter-1");
    }

    #[test]
    fn test_agent_type_extraction() {
        assert_eq!(AgentId::converter(0).agent_type(), "converter");
        assert_eq!(AgentId::typed("user-service", 12).agent_type(), "user-service");
        assert_eq!(AgentId::new("supervisor").agent_type(), "supervisor");
        assert_eq!(AgentId::new("db-writer").agent_type(), "db-writer");
    }

    #[test]
    fn test_agent_id_conversions() {
        let id = AgentId::from("validator-0");
        assert_eq!(id, AgentId::new("validator-0"));
        assert_eq!(id.as_ref(), "validator-0");
        assert_eq!(id.clone().into_string(), "validator-0");
        assert_eq!(format!("{id}"), "validator-0");
    }
}
