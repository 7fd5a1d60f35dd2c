// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-agent worker: the glue between the hub's assignment queue and the
//! executor.
//!
//! One worker per agent. It drains the agent's FIFO assignment queue, runs
//! exactly one session at a time, and forwards executor events onto the
//! channel event fabric. A second assignment arriving mid-session simply
//! waits in the queue — this is the "one outstanding assignment per agent"
//! rule.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use mxf_core::{AgentEvent, ExecutorDeps, TaskExecutor};
use mxf_memory::ConversationMemory;

use crate::channel::ConnectionState;
use crate::events::{ChannelEvent, EventPayload};
use crate::hub::ChannelHub;
use crate::HubError;

pub struct AgentWorker;

impl AgentWorker {
    /// Spawn the worker loop for a registered agent. Marks the agent online
    /// and returns the task handle; dropping the hub's assignment sender
    /// ends the loop.
    pub fn spawn(
        hub: Arc<ChannelHub>,
        deps: Arc<ExecutorDeps>,
        agent_id: &str,
    ) -> Result<JoinHandle<()>, HubError> {
        let profile = hub.profile_for(agent_id)?;
        let channel_id = profile.channel_id.clone();

        let memory = Arc::new(Mutex::new(ConversationMemory::new()));
        hub.register_memory(agent_id, Arc::clone(&memory));

        let (event_tx, event_rx) = mpsc::channel::<AgentEvent>(256);
        let executor = TaskExecutor::new(profile, deps, memory, event_tx);

        let mut assignments = hub.attach_worker(agent_id);
        hub.set_connection(agent_id, ConnectionState::Online)?;

        // Bridge executor events onto the channel fabric. SessionEnded is
        // folded into the task record here so event order is preserved
        // (tool results first, terminal event last).
        Self::spawn_event_bridge(Arc::clone(&hub), channel_id, event_rx);

        let agent = agent_id.to_string();
        let handle = tokio::spawn(async move {
            info!(agent = %agent, "worker started");
            while let Some(assignment) = assignments.recv().await {
                let Some(cancel) = hub.begin_session(&agent, &assignment.task_id) else {
                    // The task went terminal while queued (competitive loss,
                    // cancellation); skip without a session.
                    continue;
                };
                let _ = executor.run_session(&assignment, &cancel).await;
            }
            info!(agent = %agent, "worker stopped");
        });
        Ok(handle)
    }

    fn spawn_event_bridge(
        hub: Arc<ChannelHub>,
        channel_id: String,
        mut events: mpsc::Receiver<AgentEvent>,
    ) {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    AgentEvent::LlmReasoning { agent_id, content } => {
                        hub.publish(ChannelEvent::new(
                            channel_id.clone(),
                            Some(agent_id),
                            EventPayload::LlmReasoning { content },
                        ));
                    }
                    AgentEvent::LlmResponse { agent_id, text } => {
                        hub.publish(ChannelEvent::new(
                            channel_id.clone(),
                            Some(agent_id),
                            EventPayload::LlmResponse { text },
                        ));
                    }
                    AgentEvent::ToolCallStarted { agent_id, call } => {
                        hub.publish(ChannelEvent::new(
                            channel_id.clone(),
                            Some(agent_id),
                            EventPayload::ToolCall {
                                call_id: call.id,
                                tool: call.name,
                                args: call.args,
                            },
                        ));
                    }
                    AgentEvent::ToolCallFinished {
                        agent_id,
                        call_id,
                        tool_name,
                        ok,
                        content,
                    } => {
                        hub.publish(ChannelEvent::new(
                            channel_id.clone(),
                            Some(agent_id),
                            EventPayload::ToolResult {
                                call_id,
                                tool: tool_name,
                                ok,
                                content,
                            },
                        ));
                    }
                    AgentEvent::SessionEnded {
                        agent_id,
                        task_id,
                        outcome,
                    } => {
                        hub.session_finished(&agent_id, &task_id, &outcome).await;
                    }
                }
            }
            warn!("agent event bridge closed");
        });
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
