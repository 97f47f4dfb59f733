//! In-memory message channels for agent-to-agent communication.
//!
//! Channels are created on first touch. Publishing never requires a
//! subscription; visibility is decided when messages are read, so an agent
//! that subscribes late still sees everything retained on the channel.
//! Messages are destroyed only by the explicit age-based prune.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::identity::AgentId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: String,
    pub channel_id: String,
    pub from: AgentId,
    pub timestamp: DateTime<Utc>,
    /// Opaque structured payload; the engine never looks inside.
    pub content: Value,
}

impl ChannelMessage {
    pub fn new(channel_id: impl Into<String>, from: AgentId, content: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel_id: channel_id.into(),
            from,
            timestamp: Utc::now(),
            content,
        }
    }

    /// Deserialize the opaque content into a concrete type.
    pub fn parse_content<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.content.clone())?)
    }
}

#[derive(Debug, Default)]
struct ChannelState {
    subscribers: HashSet<AgentId>,
    messages: Vec<ChannelMessage>,
}

/// Channel registry plus retained message log, keyed by channel id.
pub struct MessageBus {
    channels: DashMap<String, ChannelState>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Idempotent membership add; creates the channel if needed.
    pub fn subscribe(&self, channel_id: &str, agent_id: &AgentId) {
        let mut channel = self.channels.entry(channel_id.to_string()).or_default();
        if channel.subscribers.insert(agent_id.clone()) {
            debug!(channel = %channel_id, agent = %agent_id, "Subscribed to channel");
        }
    }

    /// Drop membership. Retained messages stay on the channel.
    pub fn unsubscribe(&self, channel_id: &str, agent_id: &AgentId) {
        if let Some(mut channel) = self.channels.get_mut(channel_id)
            && channel.subscribers.remove(agent_id)
        {
            debug!(channel = %channel_id, agent = %agent_id, "Unsubscribed from channel");
        }
    }

    /// Remove the agent from every channel it is subscribed to. Returns how
    /// many subscriptions were dropped.
    pub fn unsubscribe_all(&self, agent_id: &AgentId) -> usize {
        let mut dropped = 0;
        for mut entry in self.channels.iter_mut() {
            if entry.subscribers.remove(agent_id) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(agent = %agent_id, count = dropped, "Dropped all channel subscriptions");
        }
        dropped
    }

    /// Append a message to the channel. The sender does not need to be
    /// subscribed.
    pub fn publish(&self, channel_id: &str, from: &AgentId, content: Value) -> ChannelMessage {
        let message = ChannelMessage::new(channel_id, from.clone(), content);
        self.channels
            .entry(channel_id.to_string())
            .or_default()
            .messages
            .push(message.clone());

        debug!(
            channel = %channel_id,
            from = %from,
            message_id = %message.id,
            "Published channel message"
        );
        message
    }

    /// Messages visible to `agent_id` on the channel, newest last.
    ///
    /// Non-subscribers and unknown channels get an empty result. `since`
    /// filters strictly: only messages with a later timestamp are returned.
    pub fn messages(
        &self,
        channel_id: &str,
        agent_id: &AgentId,
        since: Option<DateTime<Utc>>,
    ) -> Vec<ChannelMessage> {
        let Some(channel) = self.channels.get(channel_id) else {
            return Vec::new();
        };
        if !channel.subscribers.contains(agent_id) {
            return Vec::new();
        }

        channel
            .messages
            .iter()
            .filter(|m| since.is_none_or(|s| m.timestamp > s))
            .cloned()
            .collect()
    }

    /// Remove messages strictly older than `now - max_age` from every
    /// channel. Returns how many were removed. This is the only way
    /// messages are destroyed.
    pub fn prune_older_than(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let mut removed = 0;
        for mut entry in self.channels.iter_mut() {
            let before = entry.messages.len();
            entry.messages.retain(|m| m.timestamp >= cutoff);
            removed += before - entry.messages.len();
        }

        if removed > 0 {
            debug!(count = removed, "Pruned old channel messages");
        }
        removed
    }

    pub fn is_subscribed(&self, channel_id: &str, agent_id: &AgentId) -> bool {
        self.channels
            .get(channel_id)
            .is_some_and(|channel| channel.subscribers.contains(agent_id))
    }

    pub fn subscriber_count(&self, channel_id: &str) -> usize {
        self.channels
            .get(channel_id)
            .map(|channel| channel.subscribers.len())
            .unwrap_or(0)
    }

    pub fn message_count(&self, channel_id: &str) -> usize {
        self.channels
            .get(channel_id)
            .map(|channel| channel.messages.len())
            .unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_non_subscriber_sees_nothing() {
        let bus = MessageBus::new();
        let sender = AgentId::new("converter-0");
        let outsider = AgentId::new("validator-0");

        bus.publish("progress", &sender, json!({"step": 1}));

        assert!(bus.messages("progress", &outsider, None).is_empty());
        assert!(bus.messages("no-such-channel", &outsider, None).is_empty());
    }

    #[test]
    fn test_subscription_checked_at_read_time() {
        let bus = MessageBus::new();
        let sender = AgentId::new("converter-0");
        let reader = AgentId::new("documenter-0");

        bus.publish("progress", &sender, json!({"step": 1}));

        // Subscribing after the publish still reveals the retained message.
        bus.subscribe("progress", &reader);
        let seen = bus.messages("progress", &reader, None);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].from, sender);
        assert_eq!(seen[0].content, json!({"step": 1}));
    }

    #[test]
    fn test_publisher_need_not_subscribe() {
        let bus = MessageBus::new();
        let sender = AgentId::new("converter-0");

        bus.publish("events", &sender, json!("started"));
        assert!(!bus.is_subscribed("events", &sender));
        assert_eq!(bus.message_count("events"), 1);
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let bus = MessageBus::new();
        let agent = AgentId::new("validator-1");

        bus.subscribe("reports", &agent);
        bus.subscribe("reports", &agent);
        assert_eq!(bus.subscriber_count("reports"), 1);
    }

    #[test]
    fn test_since_filter_is_strict() {
        let bus = MessageBus::new();
        let sender = AgentId::new("converter-0");
        let reader = AgentId::new("validator-0");
        bus.subscribe("progress", &reader);

        let first = bus.publish("progress", &sender, json!(1));
        std::thread::sleep(Duration::from_millis(5));
        bus.publish("progress", &sender, json!(2));

        // A message stamped exactly at `since` is excluded.
        let newer = bus.messages("progress", &reader, Some(first.timestamp));
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].content, json!(2));
    }

    #[test]
    fn test_prune_spans_all_channels() {
        let bus = MessageBus::new();
        let sender = AgentId::new("converter-0");

        bus.publish("a", &sender, json!("old"));
        bus.publish("b", &sender, json!("old"));
        std::thread::sleep(Duration::from_millis(25));
        bus.publish("a", &sender, json!("fresh"));

        let removed = bus.prune_older_than(Duration::from_millis(10));
        assert_eq!(removed, 2);
        assert_eq!(bus.message_count("a"), 1);
        assert_eq!(bus.message_count("b"), 0);
    }

    #[test]
    fn test_unsubscribe_hides_messages_again() {
        let bus = MessageBus::new();
        let sender = AgentId::new("converter-0");
        let reader = AgentId::new("validator-0");

        bus.subscribe("progress", &reader);
        bus.publish("progress", &sender, json!(1));
        assert_eq!(bus.messages("progress", &reader, None).len(), 1);

        bus.unsubscribe("progress", &reader);
        assert!(bus.messages("progress", &reader, None).is_empty());
        // The message itself is retained for other subscribers.
        assert_eq!(bus.message_count("progress"), 1);
    }

    #[test]
    fn test_unsubscribe_all_counts_channels() {
        let bus = MessageBus::new();
        let agent = AgentId::new("documenter-0");

        bus.subscribe("a", &agent);
        bus.subscribe("b", &agent);
        bus.subscribe("c", &agent);

        assert_eq!(bus.unsubscribe_all(&agent), 3);
        assert!(!bus.is_subscribed("a", &agent));
        assert_eq!(bus.unsubscribe_all(&agent), 0);
    }

    #[test]
    fn test_parse_content() {
        let message = ChannelMessage::new(
            "progress",
            AgentId::new("converter-0"),
            json!({"step": 3, "total": 10}),
        );

        #[derive(Deserialize)]
        struct Progress {
            step: u32,
            total: u32,
        }

        let progress: Progress = message.parse_content().unwrap();
        assert_eq!(progress.step, 3);
        assert_eq!(progress.total, 10);
    }
}
