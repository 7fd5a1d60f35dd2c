// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Per-agent conversation memory.
//!
//! A sliding window of conversation turns plus two bounded side-logs. The
//! window is bounded both by turn count and by approximate token count;
//! whichever binds first evicts from the oldest end. The side-logs survive
//! `clear()` — they are the agent's continuity across cleared turns.

use std::collections::VecDeque;

use mxf_model::{ChatMessage, MessageContent};

use crate::{ActionEntry, ActionLog, ReasoningLog};

const DEFAULT_MAX_TURNS: usize = 50;
const DEFAULT_MAX_TOKENS: usize = 8_000;

/// Sliding window of turns with action and reasoning side-logs.
#[derive(Debug)]
pub struct ConversationMemory {
    turns: VecDeque<ChatMessage>,
    token_count: usize,
    max_turns: usize,
    max_tokens: usize,
    actions: ActionLog,
    reasoning: ReasoningLog,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_TURNS, DEFAULT_MAX_TOKENS)
    }

    pub fn with_capacity(max_turns: usize, max_tokens: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            token_count: 0,
            max_turns,
            max_tokens,
            actions: ActionLog::new(),
            reasoning: ReasoningLog::new(),
        }
    }

    /// Append a turn, evicting oldest turns when either capacity bound is
    /// exceeded. A tool-call turn and its tool-result turns are evicted as a
    /// unit so the window never starts with an orphaned result.
    pub fn append(&mut self, turn: ChatMessage) {
        self.token_count += turn.approx_tokens();
        self.turns.push_back(turn);
        self.enforce_capacity();
    }

    /// Drop all turns. The action and reasoning logs persist — they are the
    /// bridge across turn-based clears. Idempotent.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.token_count = 0;
    }

    pub fn turns(&self) -> impl Iterator<Item = &ChatMessage> {
        self.turns.iter()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn record_action(&mut self, entry: ActionEntry) {
        self.actions.record(entry);
    }

    pub fn record_reasoning(&mut self, content: impl Into<String>) {
        self.reasoning.record(content);
    }

    /// Up to `limit` action entries, newest first.
    pub fn recent_actions(&self, limit: usize) -> Vec<&ActionEntry> {
        self.actions.recent(limit).collect()
    }

    pub fn actions(&self) -> &ActionLog {
        &self.actions
    }

    pub fn reasoning(&mut self) -> &mut ReasoningLog {
        &mut self.reasoning
    }

    fn enforce_capacity(&mut self) {
        while self.turns.len() > 1
            && (self.turns.len() > self.max_turns || self.token_count > self.max_tokens)
        {
            self.evict_front_group();
        }
    }

    /// Evict the oldest turn. When it is a tool call, its results follow it
    /// in the deque and are evicted with it; any result left at the front
    /// without its call is evicted as well.
    fn evict_front_group(&mut self) {
        if let Some(front) = self.turns.pop_front() {
            self.token_count = self.token_count.saturating_sub(front.approx_tokens());
        }
        while matches!(
            self.turns.front().map(|t| &t.content),
            Some(MessageContent::ToolResult { .. })
        ) {
            if let Some(orphan) = self.turns.pop_front() {
                self.token_count = self.token_count.saturating_sub(orphan.approx_tokens());
            }
        }
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
