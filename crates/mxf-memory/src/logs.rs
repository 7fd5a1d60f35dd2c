// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Number of action entries kept per agent.
pub const ACTION_LOG_CAPACITY: usize = 100;
/// Number of reasoning entries kept per agent.
pub const REASONING_LOG_CAPACITY: usize = 50;
/// Reasoning entries older than this are dropped.
const REASONING_WINDOW_SECS: i64 = 3600;

/// Extra context attached to messaging-style actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_content: Option<String>,
}

/// One recorded tool action, injected into subsequent prompts so the agent
/// keeps sight of what it already did after its conversation is cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEntry {
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    pub description: String,
    pub input: serde_json::Value,
    pub result: String,
    #[serde(default)]
    pub metadata: ActionMetadata,
}

impl ActionEntry {
    pub fn new(tool: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            tool: tool.into(),
            description: description.into(),
            input: serde_json::Value::Null,
            result: String::new(),
            metadata: ActionMetadata::default(),
        }
    }
}

/// Bounded newest-first ring of [`ActionEntry`] values.
#[derive(Debug, Default)]
pub struct ActionLog {
    entries: VecDeque<ActionEntry>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an action; the oldest entry is dropped at capacity.
    pub fn record(&mut self, entry: ActionEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(ACTION_LOG_CAPACITY);
    }

    /// Up to `limit` entries, newest first.
    pub fn recent(&self, limit: usize) -> impl Iterator<Item = &ActionEntry> {
        self.entries.iter().take(limit)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One recorded reasoning fragment from a model turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningEntry {
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

/// Time-windowed ring of reasoning fragments: at most
/// [`REASONING_LOG_CAPACITY`] entries, none older than one hour.
#[derive(Debug, Default)]
pub struct ReasoningLog {
    entries: VecDeque<ReasoningEntry>,
}

impl ReasoningLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, content: impl Into<String>) {
        self.entries.push_front(ReasoningEntry {
            timestamp: Utc::now(),
            content: content.into(),
        });
        self.prune(Utc::now());
    }

    /// Entries inside the time window, newest first.
    pub fn recent(&mut self, limit: usize) -> Vec<ReasoningEntry> {
        self.prune(Utc::now());
        self.entries.iter().take(limit).cloned().collect()
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(REASONING_WINDOW_SECS);
        while matches!(self.entries.back(), Some(e) if e.timestamp < cutoff) {
            self.entries.pop_back();
        }
        self.entries.truncate(REASONING_LOG_CAPACITY);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
