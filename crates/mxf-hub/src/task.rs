// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::HubError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentScope {
    Single,
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    Manual,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationMode {
    #[default]
    Collaborative,
    Competitive,
    Sequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
    Failed,
    Errored,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Failed | TaskStatus::Errored
        )
    }
}

/// Creation request for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub channel_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub scope: AssignmentScope,
    pub strategy: AssignmentStrategy,
    /// Required non-empty when `strategy = manual`.
    #[serde(default)]
    pub assigned_agent_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_agent_id: Option<String>,
    #[serde(default)]
    pub coordination_mode: CoordinationMode,
    #[serde(default)]
    pub priority: Priority,
}

impl TaskSpec {
    /// Scope/strategy consistency checks from the creation endpoint.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.title.trim().is_empty() {
            return Err(HubError::InvalidTaskSpec("title must not be empty".into()));
        }
        if self.strategy == AssignmentStrategy::Manual && self.assigned_agent_ids.is_empty() {
            return Err(HubError::InvalidTaskSpec(
                "manual strategy requires a non-empty assignee set".into(),
            ));
        }
        if self.scope == AssignmentScope::Single && self.assigned_agent_ids.len() > 1 {
            return Err(HubError::InvalidTaskSpec(
                "single scope allows at most one assignee".into(),
            ));
        }
        if let Some(completion) = &self.completion_agent_id {
            if !self.assigned_agent_ids.contains(completion) {
                return Err(HubError::InvalidTaskSpec(
                    "completion agent must be an assignee".into(),
                ));
            }
        }
        Ok(())
    }
}

/// A live task record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub scope: AssignmentScope,
    pub strategy: AssignmentStrategy,
    pub assigned_agent_ids: Vec<String>,
    pub lead_agent_id: Option<String>,
    pub completion_agent_id: Option<String>,
    pub coordination_mode: CoordinationMode,
    pub priority: Priority,
    pub status: TaskStatus,
    /// 0–100.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Terminal result payload.
    pub result: Option<Value>,
    /// Assignees that called `task_complete`.
    pub completed_by: HashSet<String>,
    /// Assignees whose sessions ended without completing.
    pub finished_by: HashSet<String>,
    /// Sequential mode: index of the current step-holder.
    pub step_index: usize,
}

impl TaskRecord {
    pub fn from_spec(spec: TaskSpec) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            channel_id: spec.channel_id,
            title: spec.title,
            description: spec.description,
            scope: spec.scope,
            strategy: spec.strategy,
            assigned_agent_ids: spec.assigned_agent_ids,
            lead_agent_id: spec.lead_agent_id,
            completion_agent_id: spec.completion_agent_id,
            coordination_mode: spec.coordination_mode,
            priority: spec.priority,
            status: TaskStatus::Pending,
            progress: 0,
            created_at: now,
            updated_at: now,
            result: None,
            completed_by: HashSet::new(),
            finished_by: HashSet::new(),
            step_index: 0,
        }
    }

    /// Monotonic status transition. Terminal states never leave; completed
    /// pins progress at 100.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), HubError> {
        if self.status.is_terminal() {
            return Err(HubError::TaskTerminal(self.id.clone()));
        }
        self.status = next;
        self.updated_at = Utc::now();
        if next == TaskStatus::Completed {
            self.progress = 100;
        }
        Ok(())
    }

    /// Sequential mode: the agent whose turn it currently is.
    pub fn current_step_holder(&self) -> Option<&str> {
        self.assigned_agent_ids
            .get(self.step_index)
            .map(String::as_str)
    }

    /// Record one assignee's `task_complete`. Returns `true` when the task
    /// as a whole is now complete under its coordination mode.
    ///
    /// Calls against an already-terminal task are no-ops.
    pub fn record_completion(&mut self, agent_id: &str) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.completed_by.insert(agent_id.to_string());
        self.updated_at = Utc::now();

        match self.coordination_mode {
            // First finisher wins.
            CoordinationMode::Competitive => true,
            CoordinationMode::Collaborative => match &self.completion_agent_id {
                Some(designated) => designated == agent_id,
                None => self
                    .assigned_agent_ids
                    .iter()
                    .all(|a| self.completed_by.contains(a)),
            },
            CoordinationMode::Sequential => {
                if self.current_step_holder() != Some(agent_id) {
                    // Out-of-turn completion is recorded but advances nothing.
                    return false;
                }
                self.step_index += 1;
                self.step_index >= self.assigned_agent_ids.len()
            }
        }
    }

    /// Record a session that ended without completing. Returns `true` when
    /// every assignee has finished and none completed the task.
    pub fn record_failure(&mut self, agent_id: &str) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.finished_by.insert(agent_id.to_string());
        self.updated_at = Utc::now();
        self.assigned_agent_ids
            .iter()
            .all(|a| self.finished_by.contains(a) || self.completed_by.contains(a))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
