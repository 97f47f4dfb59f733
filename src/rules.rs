//! Collaboration rules describing how agent types work together.
//!
//! A rule applies when at least two of its agent types appear in the query.
//! Rules are checked in registration order and the first hit wins, so more
//! specific rules must be registered before broader ones.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::identity::{
    AGENT_TYPE_CONVERTER, AGENT_TYPE_DOCUMENTER, AGENT_TYPE_OPTIMIZER, AGENT_TYPE_VALIDATOR,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationMode {
    /// One agent finishes before the other starts.
    Sequential,
    /// Both agents work at the same time on disjoint pieces.
    Parallel,
    /// Output of one agent streams into the other.
    Pipeline,
}

impl CollaborationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Pipeline => "pipeline",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationRule {
    pub agent_types: Vec<String>,
    pub mode: CollaborationMode,
    pub shared_resources: Vec<String>,
    pub channel: Option<String>,
}

impl CollaborationRule {
    pub fn new(agent_types: &[&str], mode: CollaborationMode) -> Self {
        Self {
            agent_types: agent_types.iter().map(|s| s.to_string()).collect(),
            mode,
            shared_resources: Vec::new(),
            channel: None,
        }
    }

    pub fn with_shared_resources(mut self, resources: &[&str]) -> Self {
        self.shared_resources = resources.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// How many of this rule's agent types appear in the query.
    pub fn overlap(&self, agent_types: &[&str]) -> usize {
        self.agent_types
            .iter()
            .filter(|t| agent_types.contains(&t.as_str()))
            .count()
    }

    pub fn applies_to(&self, agent_types: &[&str]) -> bool {
        self.overlap(agent_types) >= 2
    }
}

/// Ordered collaboration rule book.
pub struct RuleRegistry {
    rules: RwLock<Vec<CollaborationRule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
        }
    }

    /// A registry seeded with the built-in pipeline rules.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(
            CollaborationRule::new(
                &[AGENT_TYPE_CONVERTER, AGENT_TYPE_VALIDATOR],
                CollaborationMode::Sequential,
            )
            .with_shared_resources(&["source-files"]),
        );
        registry.register(
            CollaborationRule::new(
                &[AGENT_TYPE_VALIDATOR, AGENT_TYPE_OPTIMIZER],
                CollaborationMode::Parallel,
            )
            .with_shared_resources(&["validation-reports"]),
        );
        registry.register(
            CollaborationRule::new(
                &[AGENT_TYPE_CONVERTER, AGENT_TYPE_DOCUMENTER],
                CollaborationMode::Pipeline,
            )
            .with_shared_resources(&["converted-output"])
            .with_channel("converter-documenter"),
        );
        registry
    }

    /// Append a rule. Later rules only apply where earlier ones do not.
    pub fn register(&self, rule: CollaborationRule) {
        debug!(
            agent_types = ?rule.agent_types,
            mode = rule.mode.as_str(),
            "Registered collaboration rule"
        );
        self.rules.write().push(rule);
    }

    /// First registered rule sharing at least two agent types with the query.
    pub fn find_match(&self, agent_types: &[&str]) -> Option<CollaborationRule> {
        let matched = self
            .rules
            .read()
            .iter()
            .find(|rule| rule.applies_to(agent_types))
            .cloned();

        if let Some(ref rule) = matched {
            debug!(
                query = ?agent_types,
                mode = rule.mode.as_str(),
                "Matched collaboration rule"
            );
        }
        matched
    }

    pub fn rules(&self) -> Vec<CollaborationRule> {
        self.rules.read().clone()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_match_wins() {
        let registry = RuleRegistry::with_defaults();

        // Overlaps both the converter/validator and validator/optimizer
        // rules; the earlier registration takes it.
        let rule = registry
            .find_match(&["validator", "optimizer", "converter"])
            .unwrap();
        assert_eq!(rule.mode, CollaborationMode::Sequential);
    }

    #[test]
    fn test_requires_two_overlapping_types() {
        let registry = RuleRegistry::with_defaults();

        assert!(registry.find_match(&["converter"]).is_none());
        assert!(registry.find_match(&["converter", "profiler"]).is_none());
        assert!(registry.find_match(&[]).is_none());

        let rule = registry.find_match(&["optimizer", "validator"]).unwrap();
        assert_eq!(rule.mode, CollaborationMode::Parallel);
    }

    #[test]
    fn test_pipeline_rule_has_channel() {
        let registry = RuleRegistry::with_defaults();

        let rule = registry.find_match(&["documenter", "converter"]).unwrap();
        assert_eq!(rule.mode, CollaborationMode::Pipeline);
        assert_eq!(rule.channel.as_deref(), Some("converter-documenter"));
    }

    #[test]
    fn test_custom_rule_appended_after_defaults() {
        let registry = RuleRegistry::with_defaults();
        registry.register(
            CollaborationRule::new(&["optimizer", "documenter"], CollaborationMode::Sequential)
                .with_shared_resources(&["perf-notes"]),
        );

        let rule = registry.find_match(&["documenter", "optimizer"]).unwrap();
        assert_eq!(rule.mode, CollaborationMode::Sequential);
        assert_eq!(rule.shared_resources, vec!["perf-notes".to_string()]);
    }

    #[test]
    fn test_duplicate_query_types_count_once() {
        let registry = RuleRegistry::with_defaults();
        assert!(registry.find_match(&["converter", "converter"]).is_none());
    }

    #[test]
    fn test_empty_registry_matches_nothing() {
        let registry = RuleRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.find_match(&["converter", "validator"]).is_none());
    }
}
