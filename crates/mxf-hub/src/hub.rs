// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `ChannelHub` — membership, routing, the task table, and the event bus.
//!
//! ```text
//!   AdminSurface ──► create/delete channel, register agent
//!   task creator ──► create_task ──► TASK_CREATED / TASK_ASSIGNED
//!                                         │
//!   AgentWorker ◄── assignment queue ◄────┘   (one FIFO per agent)
//!        │ run_session
//!        ▼
//!   AgentEvents ──► broadcast::Sender<ChannelEvent> ◄── subscribers
//! ```
//!
//! The hub is the only cross-agent mutable state. Mutations go through its
//! internal locks (never held across await points); per-channel observers
//! see events in hub emission order because delivery rides one broadcast
//! channel.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use mxf_core::{
    ActivitySource, AgentProfile, CancelHandle, SessionOutcome, TaskAssignment,
};
use mxf_config::RuntimeToggles;
use mxf_memory::ConversationMemory;
use mxf_tools::{
    AgentServices, CompletionAck, ErrorKind, ServiceError, ToolDescriptor, ToolGrants,
    ToolRegistry, UserInputOutcome, UserInputSpec,
};

use crate::{
    channel::{AgentRecord, ChannelRecord, ChannelSpec, ConnectionState},
    events::{ChannelEvent, EventPayload},
    store::{put_json, KvStore},
    task::{CoordinationMode, TaskRecord, TaskSpec, TaskStatus},
    userinput::UserInputBridge,
    HubError,
};

/// Channel activity digest depth.
const ACTIVITY_RING: usize = 50;
/// Event bus depth; laggards lose oldest events, never block the hub.
const EVENT_BUS_DEPTH: usize = 1024;

struct AssignmentQueue {
    tx: mpsc::UnboundedSender<TaskAssignment>,
    /// Held until a worker attaches; buffered assignments survive in the
    /// channel meanwhile.
    rx: Option<mpsc::UnboundedReceiver<TaskAssignment>>,
}

/// The shared fabric connecting agents, tasks, and subscribers.
pub struct ChannelHub {
    channels: Mutex<HashMap<String, ChannelRecord>>,
    agents: Mutex<HashMap<String, AgentRecord>>,
    tasks: Mutex<HashMap<String, TaskRecord>>,
    events: broadcast::Sender<ChannelEvent>,
    assignments: Mutex<HashMap<String, AssignmentQueue>>,
    /// agent id → (task id, cancel handle) of the running session.
    sessions: Mutex<HashMap<String, (String, CancelHandle)>>,
    /// agent id → conversation memory, registered by the worker.
    memories: Mutex<HashMap<String, Arc<Mutex<ConversationMemory>>>>,
    activity: Mutex<HashMap<String, VecDeque<String>>>,
    bridge: UserInputBridge,
    registry: Arc<ToolRegistry>,
    toggles: RuntimeToggles,
    store: Arc<dyn KvStore>,
}

impl ChannelHub {
    pub fn new(
        registry: Arc<ToolRegistry>,
        store: Arc<dyn KvStore>,
        toggles: RuntimeToggles,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUS_DEPTH);
        Arc::new(Self {
            channels: Mutex::new(HashMap::new()),
            agents: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            events,
            assignments: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            memories: Mutex::new(HashMap::new()),
            activity: Mutex::new(HashMap::new()),
            bridge: UserInputBridge::new(),
            registry,
            toggles,
            store,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    // ── Channels ──────────────────────────────────────────────────────────

    pub async fn create_channel(&self, id: &str, spec: ChannelSpec) -> Result<(), HubError> {
        let record = {
            let mut channels = self.channels.lock().unwrap();
            if channels.contains_key(id) {
                return Err(HubError::ChannelExists(id.to_string()));
            }
            let record = ChannelRecord::new(id, spec);
            channels.insert(id.to_string(), record.clone());
            record
        };
        put_json(self.store.as_ref(), &format!("channel:{id}"), &record).await?;
        info!(channel = id, "channel created");
        Ok(())
    }

    /// Delete a channel: members are forced offline, their sessions are
    /// cancelled, and their open user-input requests drain as cancelled.
    pub async fn delete_channel(&self, id: &str) -> Result<(), HubError> {
        let members = {
            let mut channels = self.channels.lock().unwrap();
            let record = channels
                .remove(id)
                .ok_or_else(|| HubError::ChannelNotFound(id.to_string()))?;
            record.members
        };

        for agent_id in &members {
            self.cancel_current_task(agent_id, "channel deleted", true);
            self.bridge.cancel_for_agent(agent_id);
            let mut agents = self.agents.lock().unwrap();
            if let Some(agent) = agents.get_mut(agent_id) {
                agent.connection = ConnectionState::Offline;
            }
        }
        self.store.delete(&format!("channel:{id}")).await?;
        info!(channel = id, "channel deleted");
        Ok(())
    }

    pub fn channel(&self, id: &str) -> Option<ChannelRecord> {
        self.channels.lock().unwrap().get(id).cloned()
    }

    pub fn is_member(&self, channel_id: &str, agent_id: &str) -> bool {
        self.channels
            .lock()
            .unwrap()
            .get(channel_id)
            .map(|c| c.is_member(agent_id))
            .unwrap_or(false)
    }

    // ── Agents ────────────────────────────────────────────────────────────

    pub async fn register_agent(&self, record: AgentRecord) -> Result<(), HubError> {
        let agent_id = record.agent_id.clone();
        {
            // Lock order everywhere: agents, then channels.
            let mut agents = self.agents.lock().unwrap();
            if agents.contains_key(&agent_id) {
                return Err(HubError::AgentExists(agent_id));
            }
            let mut channels = self.channels.lock().unwrap();
            let channel = channels
                .get_mut(&record.channel_id)
                .ok_or_else(|| HubError::ChannelNotFound(record.channel_id.clone()))?;
            channel.members.push(agent_id.clone());
            agents.insert(agent_id.clone(), record.clone());
        }
        put_json(self.store.as_ref(), &format!("agent:{agent_id}"), &record).await?;
        info!(agent = %agent_id, channel = %record.channel_id, "agent registered");
        Ok(())
    }

    pub fn agent(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.lock().unwrap().get(agent_id).cloned()
    }

    /// Remove an agent from its channel. Its running session is cancelled,
    /// its open user-input requests drain, and the record is deleted.
    pub async fn leave(&self, agent_id: &str) -> Result<(), HubError> {
        self.cancel_current_task(agent_id, "agent left the channel", true);
        self.bridge.cancel_for_agent(agent_id);

        let channel_id = {
            let mut agents = self.agents.lock().unwrap();
            let record = agents
                .remove(agent_id)
                .ok_or_else(|| HubError::AgentNotFound(agent_id.to_string()))?;
            let mut channels = self.channels.lock().unwrap();
            if let Some(channel) = channels.get_mut(&record.channel_id) {
                channel.members.retain(|m| m != agent_id);
            }
            record.channel_id
        };
        self.memories.lock().unwrap().remove(agent_id);
        self.assignments.lock().unwrap().remove(agent_id);
        self.store.delete(&format!("agent:{agent_id}")).await?;
        info!(agent = agent_id, channel = %channel_id, "agent left");
        Ok(())
    }

    pub fn set_connection(&self, agent_id: &str, state: ConnectionState) -> Result<(), HubError> {
        {
            let mut agents = self.agents.lock().unwrap();
            let agent = agents
                .get_mut(agent_id)
                .ok_or_else(|| HubError::AgentNotFound(agent_id.to_string()))?;
            agent.connection = state;
        }
        if state == ConnectionState::Offline {
            // An offline agent can receive nothing; its open requests die.
            self.bridge.cancel_for_agent(agent_id);
        }
        Ok(())
    }

    /// True when at least one member of the channel is online. Drives the
    /// MCP keep-alive window at the transport layer.
    pub fn channel_has_online_members(&self, channel_id: &str) -> bool {
        let agents = self.agents.lock().unwrap();
        agents
            .values()
            .any(|a| a.channel_id == channel_id && a.is_online())
    }

    /// Effective tool grants: channel whitelist ∩ agent whitelist.
    pub fn grants_for(&self, agent_id: &str) -> Result<ToolGrants, HubError> {
        let agents = self.agents.lock().unwrap();
        let agent = agents
            .get(agent_id)
            .ok_or_else(|| HubError::AgentNotFound(agent_id.to_string()))?;
        let channels = self.channels.lock().unwrap();
        let channel = channels
            .get(&agent.channel_id)
            .ok_or_else(|| HubError::ChannelNotFound(agent.channel_id.clone()))?;
        Ok(ToolGrants {
            channel_allowed: channel.allowed_tools.clone(),
            agent_allowed: agent.allowed_tools.clone(),
        })
    }

    /// Build the executor profile for an agent from its records and the
    /// runtime toggles.
    pub fn profile_for(&self, agent_id: &str) -> Result<AgentProfile, HubError> {
        let grants = self.grants_for(agent_id)?;
        let agents = self.agents.lock().unwrap();
        let agent = agents
            .get(agent_id)
            .ok_or_else(|| HubError::AgentNotFound(agent_id.to_string()))?;
        let channels = self.channels.lock().unwrap();
        let channel = channels
            .get(&agent.channel_id)
            .ok_or_else(|| HubError::ChannelNotFound(agent.channel_id.clone()))?;

        let mut profile = AgentProfile::new(agent_id, &agent.channel_id);
        profile.display_name = agent.display_name.clone();
        profile.llm = agent.llm.clone();
        // A per-channel iteration override (interactive scenarios) beats the
        // agent's own setting.
        if let Some(cap) = self
            .toggles
            .per_channel_overrides
            .get(&channel.id)
            .and_then(|o| o.max_iterations)
        {
            profile.llm.max_iterations = cap;
        }
        profile.behavior_prompt = agent.behavior_prompt.clone();
        profile.grants = grants;
        profile.breaker_exempt = agent.circuit_breaker_exempt_tools.clone();
        profile.system_llm_enabled =
            channel.system_llm_enabled && self.toggles.system_llm_for(&channel.id);
        profile.trip_count = self.toggles.circuit_breaker_trip_count;
        profile.tool_timeouts = self.toggles.tool_timeouts.clone();
        Ok(profile)
    }

    pub fn register_memory(&self, agent_id: &str, memory: Arc<Mutex<ConversationMemory>>) {
        self.memories
            .lock()
            .unwrap()
            .insert(agent_id.to_string(), memory);
    }

    /// Clear an agent's conversation window (turn-based orchestration).
    /// Idempotent; safe while a session runs — the in-flight prompt snapshot
    /// is unaffected.
    pub fn clear_conversation_history(&self, agent_id: &str) {
        if let Some(memory) = self.memories.lock().unwrap().get(agent_id) {
            memory.lock().unwrap().clear();
        }
    }

    // ── Messaging ─────────────────────────────────────────────────────────

    /// Directed agent-to-agent message. Both ends must share a channel.
    pub fn send_agent_message(
        &self,
        from: &str,
        to: &str,
        content: &str,
    ) -> Result<(), HubError> {
        let channel_id = {
            let agents = self.agents.lock().unwrap();
            let sender = agents
                .get(from)
                .ok_or_else(|| HubError::AgentNotFound(from.to_string()))?;
            let target = agents
                .get(to)
                .ok_or_else(|| HubError::AgentNotFound(to.to_string()))?;
            if sender.channel_id != target.channel_id {
                return Err(HubError::AgentNotFound(to.to_string()));
            }
            sender.channel_id.clone()
        };
        self.publish(ChannelEvent::new(
            channel_id,
            Some(to.to_string()),
            EventPayload::AgentMessage {
                from: from.to_string(),
                to: to.to_string(),
                content: content.to_string(),
            },
        ));
        Ok(())
    }

    /// Channel broadcast from one member to every other member.
    pub fn send_channel_message(&self, from: &str, content: &str) -> Result<(), HubError> {
        let channel_id = {
            let agents = self.agents.lock().unwrap();
            agents
                .get(from)
                .map(|a| a.channel_id.clone())
                .ok_or_else(|| HubError::AgentNotFound(from.to_string()))?
        };
        self.publish(ChannelEvent::new(
            channel_id,
            None,
            EventPayload::ChannelMessage {
                from: from.to_string(),
                content: content.to_string(),
            },
        ));
        Ok(())
    }

    // ── Tasks ─────────────────────────────────────────────────────────────

    /// Validate, persist, assign, and dispatch a task.
    pub async fn create_task(&self, spec: TaskSpec) -> Result<TaskRecord, HubError> {
        let mut spec = spec;
        {
            let channels = self.channels.lock().unwrap();
            let channel = channels
                .get(&spec.channel_id)
                .ok_or_else(|| HubError::ChannelNotFound(spec.channel_id.clone()))?;

            // Auto strategy with no explicit assignees: take the channel's
            // members in join order (one for single scope, all otherwise).
            if spec.strategy == crate::task::AssignmentStrategy::Auto
                && spec.assigned_agent_ids.is_empty()
            {
                spec.assigned_agent_ids = match spec.scope {
                    crate::task::AssignmentScope::Single => {
                        channel.members.iter().take(1).cloned().collect()
                    }
                    crate::task::AssignmentScope::Multiple => channel.members.clone(),
                };
                if spec.assigned_agent_ids.is_empty() {
                    return Err(HubError::InvalidTaskSpec(
                        "auto strategy needs at least one channel member".into(),
                    ));
                }
            }

            for assignee in &spec.assigned_agent_ids {
                if !channel.is_member(assignee) {
                    return Err(HubError::InvalidTaskSpec(format!(
                        "assignee {assignee} is not a member of {}",
                        spec.channel_id
                    )));
                }
            }
        }
        spec.validate()?;

        let mut record = TaskRecord::from_spec(spec);
        put_json(self.store.as_ref(), &format!("task:{}", record.id), &record).await?;

        self.publish(ChannelEvent::new(
            record.channel_id.clone(),
            None,
            EventPayload::TaskCreated {
                task_id: record.id.clone(),
            },
        ));

        record.transition(TaskStatus::Assigned)?;
        // The record must be visible before any worker can receive the
        // assignment and call begin_session.
        self.tasks
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());

        for assignee in record.assigned_agent_ids.clone() {
            self.publish(ChannelEvent::new(
                record.channel_id.clone(),
                Some(assignee.clone()),
                EventPayload::TaskAssigned {
                    task_id: record.id.clone(),
                },
            ));
        }

        // Sequential tasks go to the step-holder only; everyone else gets
        // the assignment immediately. A busy agent's assignment queues
        // behind its running session (one FIFO per agent).
        let targets: Vec<String> = match record.coordination_mode {
            CoordinationMode::Sequential => record
                .current_step_holder()
                .map(|a| vec![a.to_string()])
                .unwrap_or_default(),
            _ => record.assigned_agent_ids.clone(),
        };
        let assignment = TaskAssignment {
            task_id: record.id.clone(),
            title: record.title.clone(),
            description: record.description.clone(),
        };
        for target in targets {
            self.dispatch(&target, assignment.clone());
        }

        put_json(self.store.as_ref(), &format!("task:{}", record.id), &record).await?;
        Ok(record)
    }

    pub fn task(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.lock().unwrap().get(task_id).cloned()
    }

    /// Attach a worker to an agent's assignment queue. Assignments
    /// dispatched before attachment are buffered and delivered in order.
    pub fn attach_worker(&self, agent_id: &str) -> mpsc::UnboundedReceiver<TaskAssignment> {
        let mut assignments = self.assignments.lock().unwrap();
        let queue = assignments
            .entry(agent_id.to_string())
            .or_insert_with(new_queue);
        match queue.rx.take() {
            Some(rx) => rx,
            None => {
                // A second attach replaces the queue wholesale; the previous
                // worker's receiver keeps draining what it already had.
                let (tx, rx) = mpsc::unbounded_channel();
                queue.tx = tx;
                rx
            }
        }
    }

    fn dispatch(&self, agent_id: &str, assignment: TaskAssignment) {
        let mut assignments = self.assignments.lock().unwrap();
        let queue = assignments
            .entry(agent_id.to_string())
            .or_insert_with(new_queue);
        if queue.tx.send(assignment).is_err() {
            warn!(agent = agent_id, "assignment queue closed; dropping assignment");
        }
    }

    /// Worker entry: the agent is about to run a session on `task_id`.
    ///
    /// Returns the cancel handle, or `None` when the task is already
    /// terminal (e.g. a competitor finished it while the assignment sat in
    /// the queue) and the session must not start.
    pub fn begin_session(&self, agent_id: &str, task_id: &str) -> Option<CancelHandle> {
        let started = {
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks.get_mut(task_id)?;
            if task.status.is_terminal() {
                return None;
            }
            if task.status == TaskStatus::InProgress {
                false
            } else {
                task.transition(TaskStatus::InProgress).ok()?;
                true
            }
        };

        let handle = CancelHandle::new();
        self.sessions.lock().unwrap().insert(
            agent_id.to_string(),
            (task_id.to_string(), handle.clone()),
        );

        if started {
            if let Some(task) = self.task(task_id) {
                self.publish(ChannelEvent::new(
                    task.channel_id,
                    Some(agent_id.to_string()),
                    EventPayload::TaskStarted {
                        task_id: task_id.to_string(),
                    },
                ));
            }
        }
        debug!(agent = agent_id, task = task_id, "session begun");
        Some(handle)
    }

    /// Worker exit: map the session outcome onto exactly one terminal event
    /// and fold it into the task record.
    pub async fn session_finished(
        &self,
        agent_id: &str,
        task_id: &str,
        outcome: &SessionOutcome,
    ) {
        self.sessions.lock().unwrap().remove(agent_id);

        let Some(channel_id) = self.task(task_id).map(|t| t.channel_id) else {
            return;
        };

        let payload = match outcome {
            SessionOutcome::Completed { summary, success } => {
                let task_completed = self
                    .task(task_id)
                    .map(|t| t.status == TaskStatus::Completed)
                    .unwrap_or(false);
                Some(EventPayload::TaskCompleted {
                    task_id: task_id.to_string(),
                    summary: summary.clone(),
                    success: *success,
                    task_completed,
                })
            }
            SessionOutcome::Cancelled { reason, silent } => {
                self.bridge.cancel_for_agent(agent_id);
                if *silent {
                    None
                } else {
                    Some(EventPayload::TaskCancelled {
                        task_id: task_id.to_string(),
                        reason: reason.clone(),
                    })
                }
            }
            SessionOutcome::Errored { detail } => {
                let all_failed = self.fold_failure(task_id, agent_id);
                if all_failed {
                    self.finalize_task(task_id, TaskStatus::Errored).await;
                }
                Some(EventPayload::TaskError {
                    task_id: task_id.to_string(),
                    detail: detail.clone(),
                })
            }
            other => {
                let all_failed = self.fold_failure(task_id, agent_id);
                if all_failed {
                    self.finalize_task(task_id, TaskStatus::Failed).await;
                }
                Some(EventPayload::TaskFailed {
                    task_id: task_id.to_string(),
                    reason: other.reason(),
                })
            }
        };

        if let Some(payload) = payload {
            self.publish(ChannelEvent::new(
                channel_id,
                Some(agent_id.to_string()),
                payload,
            ));
        }
        self.persist_task(task_id).await;
        self.persist_actions(agent_id, task_id).await;
    }

    /// Record one assignee's `task_complete` (reached through the tool).
    pub async fn record_completion(
        &self,
        agent_id: &str,
        summary: &str,
        success: bool,
    ) -> Result<CompletionAck, HubError> {
        let task_id = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .get(agent_id)
                .map(|(task_id, _)| task_id.clone())
                .ok_or_else(|| HubError::TaskNotFound(format!("no active session for {agent_id}")))?
        };

        let (task_completed, next_holder) = {
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks
                .get_mut(&task_id)
                .ok_or_else(|| HubError::TaskNotFound(task_id.clone()))?;

            let was_terminal = task.status.is_terminal();
            let whole = task.record_completion(agent_id);
            if whole && !was_terminal {
                task.result = Some(serde_json::json!({
                    "summary": summary,
                    "success": success,
                    "completed_by": agent_id,
                }));
                task.transition(TaskStatus::Completed)?;
            }

            let next = if !whole && task.coordination_mode == CoordinationMode::Sequential {
                task.current_step_holder().map(str::to_string)
            } else {
                None
            };
            (whole, next)
        };

        // Sequential hand-off: the next step-holder gets its assignment now.
        if let Some(next) = next_holder {
            if let Some(task) = self.task(&task_id) {
                self.publish(ChannelEvent::new(
                    task.channel_id.clone(),
                    Some(next.clone()),
                    EventPayload::TaskAssigned {
                        task_id: task_id.clone(),
                    },
                ));
                self.dispatch(
                    &next,
                    TaskAssignment {
                        task_id: task_id.clone(),
                        title: task.title.clone(),
                        description: task.description.clone(),
                    },
                );
            }
        }

        self.persist_task(&task_id).await;
        Ok(CompletionAck {
            task_id,
            task_completed,
        })
    }

    /// Terminal task-level cancellation: broadcast once, cancel running
    /// assignee sessions silently.
    pub async fn cancel_task(&self, task_id: &str, reason: &str) -> Result<(), HubError> {
        let (channel_id, assignees) = {
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| HubError::TaskNotFound(task_id.to_string()))?;
            task.transition(TaskStatus::Cancelled)?;
            (task.channel_id.clone(), task.assigned_agent_ids.clone())
        };

        for assignee in &assignees {
            self.cancel_current_task_on(assignee, task_id, reason);
        }

        self.publish(ChannelEvent::new(
            channel_id,
            None,
            EventPayload::TaskCancelled {
                task_id: task_id.to_string(),
                reason: reason.to_string(),
            },
        ));
        self.persist_task(task_id).await;
        Ok(())
    }

    /// Cancel whatever session `agent_id` is currently running.
    pub fn cancel_current_task(&self, agent_id: &str, reason: &str, silent: bool) {
        let sessions = self.sessions.lock().unwrap();
        if let Some((_, handle)) = sessions.get(agent_id) {
            handle.cancel(reason, silent);
        }
    }

    /// Cancel an agent's session only if it is running `task_id`. Silent:
    /// the task-level TASK_CANCELLED is the single broadcast.
    fn cancel_current_task_on(&self, agent_id: &str, task_id: &str, reason: &str) {
        let sessions = self.sessions.lock().unwrap();
        if let Some((current, handle)) = sessions.get(agent_id) {
            if current == task_id {
                handle.cancel(reason, true);
            }
        }
    }

    // ── User input plumbing (node-facing side) ────────────────────────────

    /// Deliver a human response and broadcast USER_INPUT_RESPONSE.
    pub fn respond_user_input(
        &self,
        request_id: &str,
        value: serde_json::Value,
    ) -> Result<(), HubError> {
        self.bridge.respond(request_id, value)?;
        if let Some(agent_id) = self.bridge.agent_of(request_id) {
            if let Some(channel_id) = self.channel_of_agent(&agent_id) {
                self.publish(ChannelEvent::new(
                    channel_id,
                    Some(agent_id),
                    EventPayload::UserInputResponse {
                        request_id: request_id.to_string(),
                    },
                ));
            }
        }
        Ok(())
    }

    pub fn cancel_user_input(&self, request_id: &str) -> Result<(), HubError> {
        self.bridge.cancel(request_id)
    }

    /// Drain every open user-input request as cancelled (shutdown path).
    pub fn drain_user_input(&self) {
        self.bridge.drain_all();
    }

    /// Forward an adapter notification onto the channel event fabric so
    /// prompt caches refresh.
    pub fn publish_tool_list_updated(
        &self,
        channel_id: &str,
        server_id: &str,
        tools: Vec<String>,
    ) {
        self.publish(ChannelEvent::new(
            channel_id,
            None,
            EventPayload::ToolListUpdated {
                server_id: server_id.to_string(),
                tools,
            },
        ));
    }

    // ── Internals ─────────────────────────────────────────────────────────

    pub(crate) fn publish(&self, event: ChannelEvent) {
        self.note_activity(&event);
        // No subscribers is fine (nobody connected yet).
        let _ = self.events.send(event);
    }

    fn channel_of_agent(&self, agent_id: &str) -> Option<String> {
        self.agents
            .lock()
            .unwrap()
            .get(agent_id)
            .map(|a| a.channel_id.clone())
    }

    fn fold_failure(&self, task_id: &str, agent_id: &str) -> bool {
        let mut tasks = self.tasks.lock().unwrap();
        tasks
            .get_mut(task_id)
            .map(|t| t.record_failure(agent_id))
            .unwrap_or(false)
    }

    async fn finalize_task(&self, task_id: &str, status: TaskStatus) {
        {
            let mut tasks = self.tasks.lock().unwrap();
            if let Some(task) = tasks.get_mut(task_id) {
                let _ = task.transition(status);
            }
        }
        self.persist_task(task_id).await;
    }

    async fn persist_task(&self, task_id: &str) {
        if let Some(task) = self.task(task_id) {
            if let Err(e) =
                put_json(self.store.as_ref(), &format!("task:{task_id}"), &task).await
            {
                warn!(task = task_id, "task persistence failed: {e}");
            }
        }
    }

    /// Persist the agent's recent actions (truncated) so prompts rebuilt
    /// after a restart keep their continuity.
    async fn persist_actions(&self, agent_id: &str, task_id: &str) {
        let entries: Vec<mxf_memory::ActionEntry> = {
            let memories = self.memories.lock().unwrap();
            match memories.get(agent_id) {
                Some(memory) => memory
                    .lock()
                    .unwrap()
                    .recent_actions(20)
                    .into_iter()
                    .cloned()
                    .collect(),
                None => return,
            }
        };
        if entries.is_empty() {
            return;
        }
        let key = format!("action:{agent_id}:{task_id}");
        if let Err(e) = put_json(self.store.as_ref(), &key, &entries).await {
            warn!(agent = agent_id, "action log persistence failed: {e}");
        }
    }

    /// Fold an event into the channel's prompt-facing activity digest.
    fn note_activity(&self, event: &ChannelEvent) {
        let line = match &event.payload {
            EventPayload::ToolCall { tool, .. } => {
                format!("{} called {tool}", event.agent_id.as_deref().unwrap_or("?"))
            }
            EventPayload::AgentMessage { from, to, .. } => format!("{from} messaged {to}"),
            EventPayload::ChannelMessage { from, .. } => format!("{from} posted to the channel"),
            EventPayload::TaskCompleted {
                task_id, summary, ..
            } => format!(
                "{} completed task {task_id}: {summary}",
                event.agent_id.as_deref().unwrap_or("?")
            ),
            _ => return,
        };
        let mut activity = self.activity.lock().unwrap();
        let ring = activity.entry(event.channel_id.clone()).or_default();
        ring.push_front(line);
        ring.truncate(ACTIVITY_RING);
    }
}

fn new_queue() -> AssignmentQueue {
    let (tx, rx) = mpsc::unbounded_channel();
    AssignmentQueue { tx, rx: Some(rx) }
}

impl ActivitySource for ChannelHub {
    fn recent_activity(&self, channel_id: &str, limit: usize) -> Vec<String> {
        self.activity
            .lock()
            .unwrap()
            .get(channel_id)
            .map(|ring| ring.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

// ── AgentServices: the tools' view of the hub ─────────────────────────────────

#[async_trait]
impl AgentServices for ChannelHub {
    async fn send_message(
        &self,
        from_agent: &str,
        to_agent: &str,
        content: &str,
    ) -> Result<(), ServiceError> {
        self.send_agent_message(from_agent, to_agent, content)
            .map_err(|e| ServiceError::new(ErrorKind::HandlerFailed, e.to_string()))
    }

    async fn complete_task(
        &self,
        agent_id: &str,
        summary: &str,
        success: bool,
    ) -> Result<CompletionAck, ServiceError> {
        self.record_completion(agent_id, summary, success)
            .await
            .map_err(|e| ServiceError::new(ErrorKind::HandlerFailed, e.to_string()))
    }

    async fn open_user_input(
        &self,
        agent_id: &str,
        spec: UserInputSpec,
    ) -> Result<String, ServiceError> {
        let request_id = self.bridge.open(agent_id, &spec);
        if let Some(channel_id) = self.channel_of_agent(agent_id) {
            self.publish(ChannelEvent::new(
                channel_id,
                Some(agent_id.to_string()),
                EventPayload::UserInputRequest {
                    request_id: request_id.clone(),
                    spec,
                },
            ));
        }
        Ok(request_id)
    }

    async fn await_user_input(
        &self,
        agent_id: &str,
        spec: UserInputSpec,
    ) -> Result<UserInputOutcome, ServiceError> {
        let (request_id, rx) = self.bridge.prepare_blocking(agent_id);
        if let Some(channel_id) = self.channel_of_agent(agent_id) {
            self.publish(ChannelEvent::new(
                channel_id,
                Some(agent_id.to_string()),
                EventPayload::UserInputRequest {
                    request_id: request_id.clone(),
                    spec: spec.clone(),
                },
            ));
        }
        Ok(self
            .bridge
            .wait_blocking(&request_id, rx, spec.timeout_ms)
            .await)
    }

    async fn poll_user_input(
        &self,
        _agent_id: &str,
        request_id: &str,
    ) -> Result<UserInputOutcome, ServiceError> {
        self.bridge
            .poll(request_id)
            .map_err(|e| ServiceError::new(ErrorKind::HandlerFailed, e.to_string()))
    }

    async fn recommend_tools(
        &self,
        agent_id: &str,
        intent: &str,
    ) -> Result<Vec<ToolDescriptor>, ServiceError> {
        let grants = self
            .grants_for(agent_id)
            .map_err(|e| ServiceError::new(ErrorKind::HandlerFailed, e.to_string()))?;
        let channel_id = self
            .channel_of_agent(agent_id)
            .ok_or_else(|| ServiceError::failed("agent has no channel"))?;
        Ok(self.registry.recommend(intent, &channel_id, &grants))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
