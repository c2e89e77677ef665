//! Loop-prevention policy: decides whether a reply produced by an agent's `handle_message`
//! should be re-routed by the orchestrator, or blocked to stop agents bouncing messages forever.

use crate::domain_types::AgentId;
use crate::message::{Message, MessageType};
use dashmap::DashMap;
use std::collections::VecDeque;

const FORBIDDEN_SHORT_PATTERNS: &[&str] = &["response received", "processed"];
const FORBIDDEN_MEDIUM_PATTERNS: &[&str] = &["thank you for confirming"];
const FORBIDDEN_TEMPLATE_PATTERNS: &[&str] = &["as your", "would you like to:"];

/// True when `content` matches one of the bus's known forbidden-acknowledgement templates:
/// a short "response received"/"processed" body, a "thank you for confirming" filler, or a
/// short generic-manager template.
#[must_use]
pub fn is_forbidden_acknowledgement(content: &str) -> bool {
    let trimmed = content.trim();
    let char_count = trimmed.chars().count();
    let lower = trimmed.to_lowercase();

    if char_count < 50 && FORBIDDEN_SHORT_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        return true;
    }
    if char_count < 300 && FORBIDDEN_MEDIUM_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        return true;
    }
    if char_count < 300 && FORBIDDEN_TEMPLATE_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        return true;
    }
    false
}

/// Tracks the last two hops exchanged between each unordered pair of agents, so the router can
/// detect an `A->B, B->A` back-and-forth before allowing the next hop between the same pair.
#[derive(Default)]
pub struct HopTracker {
    recent: DashMap<(AgentId, AgentId), VecDeque<(AgentId, AgentId)>>,
}

impl HopTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pair_key(a: &AgentId, b: &AgentId) -> (AgentId, AgentId) {
        if a.as_ref() <= b.as_ref() {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }

    /// Records a hop from `from` to `to`, keeping only the most recent two per unordered pair.
    pub fn record_hop(&self, from: &AgentId, to: &AgentId) {
        let key = Self::pair_key(from, to);
        let mut entry = self.recent.entry(key).or_default();
        entry.push_back((from.clone(), to.clone()));
        if entry.len() > 2 {
            entry.pop_front();
        }
    }

    /// True when the last two recorded hops for this pair already form `to->from, from->to`,
    /// meaning `from->to` would be the third hop of a repeating back-and-forth.
    #[must_use]
    pub fn is_repeating_pair(&self, from: &AgentId, to: &AgentId) -> bool {
        let key = Self::pair_key(from, to);
        let Some(entry) = self.recent.get(&key) else {
            return false;
        };
        if entry.len() < 2 {
            return false;
        }
        let first = &entry[0];
        let second = &entry[1];
        &first.0 == to && &first.1 == from && &second.0 == from && &second.1 == to
    }
}

/// Decides whether the orchestrator should re-route `reply`, produced by `reply.from` in
/// response to a message originally sent by `original_sender`.
///
/// Self-reply is checked first and blocks unconditionally (testable property: the policy never
/// routes a reply whose sender equals its original sender). Otherwise an explicit allow-list is
/// checked before the remaining block conditions.
#[must_use]
pub fn should_route(reply: &Message, original_sender: &AgentId, hops: &HopTracker) -> bool {
    if &reply.from == original_sender {
        return false;
    }

    let to_response_token = reply.to.iter().any(AgentId::is_user_response_token);
    if to_response_token {
        return true;
    }
    if reply.is_final_response() {
        return true;
    }
    if reply.message_type == MessageType::Response && reply.coordination_id().is_some() && !reply.is_acknowledged() {
        return true;
    }

    for recipient in &reply.to {
        if hops.is_repeating_pair(&reply.from, recipient) {
            return false;
        }
    }

    if is_forbidden_acknowledgement(reply.content.as_ref()) {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::MessageContent;

    fn agent(id: &str) -> AgentId {
        AgentId::try_new(id).unwrap()
    }

    fn reply(from: &str, to: &str, content: &str) -> Message {
        Message::builder(agent(from), MessageType::Response, MessageContent::try_new(content).unwrap())
            .to(agent(to))
            .build()
    }

    #[test]
    fn blocks_self_reply_even_if_otherwise_allowed() {
        let hops = HopTracker::new();
        let msg = Message::builder(agent("a"), MessageType::Response, MessageContent::try_new("hi").unwrap())
            .to(agent("user_response_tok"))
            .final_response()
            .build();
        assert!(!should_route(&msg, &agent("a"), &hops));
    }

    #[test]
    fn allows_reply_addressed_to_response_token() {
        let hops = HopTracker::new();
        let msg = reply("b", "user_response_tok", "final answer");
        assert!(should_route(&msg, &agent("a"), &hops));
    }

    #[test]
    fn blocks_repeating_back_and_forth() {
        let hops = HopTracker::new();
        hops.record_hop(&agent("a"), &agent("b"));
        hops.record_hop(&agent("b"), &agent("a"));
        let msg = reply("a", "b", "whatever");
        assert!(!should_route(&msg, &agent("b"), &hops));
    }

    #[test]
    fn blocks_forbidden_short_acknowledgement() {
        let hops = HopTracker::new();
        let msg = reply("a", "b", "response received");
        assert!(!should_route(&msg, &agent("c"), &hops));
    }

    #[test]
    fn allows_ordinary_reply() {
        let hops = HopTracker::new();
        let msg = reply("a", "b", "here is a detailed and substantive reply");
        assert!(should_route(&msg, &agent("c"), &hops));
    }
}
