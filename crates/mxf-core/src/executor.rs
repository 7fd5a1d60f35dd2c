// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The per-agent task execution loop.
//!
//! One executor exists per agent and runs at most one session at a time. A
//! session advances a task through LLM → tool → LLM iterations:
//!
//! ```text
//! Idle ── assign ──▶ Priming ── first prompt built ──▶ Calling
//! Calling ── text only ──▶ Done (no completion)
//! Calling ── tool calls ──▶ Dispatching ── resolved ──▶ Feeding ──▶ Calling
//! Calling/Dispatching ── task_complete ok ──▶ Completed
//! any ── cancel ──▶ Cancelled      any ── cap ──▶ Exhausted
//! any ── repeat-call guard ──▶ Broken
//! ```
//!
//! Tool calls within one turn run sequentially in declared order unless the
//! whole batch is safe-parallel (read-only), in which case they run
//! concurrently. A successful terminal tool short-circuits the rest of its
//! batch. Whatever the path, the executor emits exactly one
//! [`AgentEvent::SessionEnded`] per session.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mxf_memory::{ActionEntry, ConversationMemory};
use mxf_model::{
    ChatMessage, CompletionRequest, GatewayRequest, LlmError, LlmGateway, ToolCallRequest,
    ToolSpec,
};
use mxf_tools::{ErrorKind, ToolCall, ToolContext, ToolRegistry, ToolReturn};

use crate::{
    breaker::CircuitBreaker, events::AgentEvent, prompt::AssemblerInputs, AgentProfile,
    PromptAssembler, SessionOutcome, TaskAssignment,
};

/// Hard ceiling on `max_iterations`, applied regardless of configuration.
const ITERATION_CEILING: u32 = 20;
/// Action-log lines folded into each prompt.
const PROMPT_ACTION_LIMIT: usize = 20;
/// Channel-activity lines folded into each prompt.
const PROMPT_ACTIVITY_LIMIT: usize = 5;
/// Empty model turns tolerated before the session gives up.
const MAX_EMPTY_TURNS: u32 = 2;

/// Source of the channel-wide activity digest for prompts.
pub trait ActivitySource: Send + Sync {
    fn recent_activity(&self, channel_id: &str, limit: usize) -> Vec<String>;
}

/// Digest source that reports nothing (single-agent setups, tests).
pub struct NoActivity;

impl ActivitySource for NoActivity {
    fn recent_activity(&self, _channel_id: &str, _limit: usize) -> Vec<String> {
        Vec::new()
    }
}

/// Cancellation handle for a running session: a token plus the reason the
/// canceller recorded.
#[derive(Clone)]
pub struct CancelHandle {
    token: CancellationToken,
    reason: Arc<Mutex<Option<(String, bool)>>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Request cancellation. `silent` suppresses the channel broadcast of
    /// the terminal event but never the terminal accounting itself.
    pub fn cancel(&self, reason: impl Into<String>, silent: bool) {
        let mut slot = self.reason.lock().unwrap();
        if slot.is_none() {
            *slot = Some((reason.into(), silent));
        }
        drop(slot);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn outcome(&self) -> SessionOutcome {
        let (reason, silent) = self
            .reason
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| ("cancelled".to_string(), false));
        SessionOutcome::Cancelled { reason, silent }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide collaborators shared by every executor.
pub struct ExecutorDeps {
    pub gateway: Arc<LlmGateway>,
    pub registry: Arc<ToolRegistry>,
    pub assembler: PromptAssembler,
    pub activity: Arc<dyn ActivitySource>,
}

/// Drives one agent's sessions.
pub struct TaskExecutor {
    profile: AgentProfile,
    deps: Arc<ExecutorDeps>,
    memory: Arc<Mutex<ConversationMemory>>,
    events: mpsc::Sender<AgentEvent>,
}

enum BatchVerdict {
    /// All calls resolved; feed results back and iterate.
    Continue,
    Completed { summary: String, success: bool },
    Broken { tool: String },
    Cancelled,
}

impl TaskExecutor {
    pub fn new(
        profile: AgentProfile,
        deps: Arc<ExecutorDeps>,
        memory: Arc<Mutex<ConversationMemory>>,
        events: mpsc::Sender<AgentEvent>,
    ) -> Self {
        Self {
            profile,
            deps,
            memory,
            events,
        }
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    /// Run one session to its terminal state. Emits exactly one
    /// [`AgentEvent::SessionEnded`] — never more, regardless of path.
    pub async fn run_session(
        &self,
        task: &TaskAssignment,
        cancel: &CancelHandle,
    ) -> SessionOutcome {
        info!(agent = %self.profile.agent_id, task = %task.task_id, "session start");
        let outcome = self.drive(task, cancel).await;
        info!(agent = %self.profile.agent_id, task = %task.task_id, ?outcome, "session end");
        let _ = self
            .events
            .send(AgentEvent::SessionEnded {
                agent_id: self.profile.agent_id.clone(),
                task_id: task.task_id.clone(),
                outcome: outcome.clone(),
            })
            .await;
        outcome
    }

    async fn drive(&self, task: &TaskAssignment, cancel: &CancelHandle) -> SessionOutcome {
        if cancel.is_cancelled() {
            return cancel.outcome();
        }

        let mut breaker = CircuitBreaker::new(
            self.profile.trip_count,
            self.profile.breaker_exempt.clone(),
        );
        let max_iterations = self
            .profile
            .llm
            .max_iterations
            .clamp(1, ITERATION_CEILING);

        // Priming: seed the conversation with the assignment turn.
        self.memory.lock().unwrap().append(ChatMessage::user(format!(
            "Task \"{}\" has been assigned to you. Begin.",
            task.title
        )));

        let mut empty_turns = 0u32;

        for iteration in 1..=max_iterations {
            if cancel.is_cancelled() {
                self.append_cancel_marker(cancel);
                return cancel.outcome();
            }
            debug!(agent = %self.profile.agent_id, iteration, "calling model");

            let parsed = match self.call_model(task, cancel).await {
                Ok(p) => p,
                Err(LlmError::Cancelled) => {
                    self.append_cancel_marker(cancel);
                    return cancel.outcome();
                }
                Err(e) => {
                    warn!(agent = %self.profile.agent_id, "model call failed: {e}");
                    return SessionOutcome::Errored {
                        detail: e.to_string(),
                    };
                }
            };

            if let Some(reasoning) = &parsed.reasoning {
                self.memory.lock().unwrap().record_reasoning(reasoning);
                let _ = self
                    .events
                    .send(AgentEvent::LlmReasoning {
                        agent_id: self.profile.agent_id.clone(),
                        content: reasoning.clone(),
                    })
                    .await;
            }

            if let Some(text) = &parsed.text {
                self.memory
                    .lock()
                    .unwrap()
                    .append(ChatMessage::assistant(text));
                let _ = self
                    .events
                    .send(AgentEvent::LlmResponse {
                        agent_id: self.profile.agent_id.clone(),
                        text: text.clone(),
                    })
                    .await;
            }

            if parsed.tool_calls.is_empty() {
                if parsed.text.is_none() && empty_turns < MAX_EMPTY_TURNS {
                    // The model produced neither text nor a tool call. Nudge
                    // once or twice; each retry still consumes an iteration.
                    empty_turns += 1;
                    self.memory.lock().unwrap().append(ChatMessage::user(
                        "You produced no response or tool call. Continue with your next action.",
                    ));
                    continue;
                }
                // Replying → Done: a text answer with no completion ends the
                // session without advancing the task.
                return SessionOutcome::NoCompletion;
            }
            empty_turns = 0;

            let calls: Vec<ToolCall> = parsed
                .tool_calls
                .iter()
                .map(|tc: &ToolCallRequest| ToolCall {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    args: tc.args.clone(),
                })
                .collect();

            match self.dispatch_batch(task, calls, &mut breaker, cancel).await {
                BatchVerdict::Continue => {} // Feeding → Calling
                BatchVerdict::Completed { summary, success } => {
                    return SessionOutcome::Completed { summary, success }
                }
                BatchVerdict::Broken { tool } => return SessionOutcome::Broken { tool },
                BatchVerdict::Cancelled => {
                    self.append_cancel_marker(cancel);
                    return cancel.outcome();
                }
            }
        }

        SessionOutcome::Exhausted
    }

    /// Assemble the prompt from the current memory snapshot and call the
    /// gateway.
    async fn call_model(
        &self,
        task: &TaskAssignment,
        cancel: &CancelHandle,
    ) -> Result<mxf_model::ParsedResponse, LlmError> {
        let descriptors = self
            .deps
            .registry
            .list_for(&self.profile.channel_id, &self.profile.grants);

        let (turns, actions) = {
            let memory = self.memory.lock().unwrap();
            let turns: Vec<ChatMessage> = memory.turns().cloned().collect();
            let actions: Vec<ActionEntry> = memory
                .recent_actions(PROMPT_ACTION_LIMIT)
                .into_iter()
                .cloned()
                .collect();
            (turns, actions)
        };

        let channel_activity = self
            .deps
            .activity
            .recent_activity(&self.profile.channel_id, PROMPT_ACTIVITY_LIMIT);

        let tool_specs: Vec<ToolSpec> = descriptors
            .iter()
            .map(|d| ToolSpec {
                name: d.name.clone(),
                description: d.description.clone(),
                parameters: d.parameters.clone(),
            })
            .collect();

        let messages = self.deps.assembler.assemble(AssemblerInputs {
            agent_id: self.profile.agent_id.clone(),
            display_name: self.profile.display_name.clone(),
            behavior_prompt: self.profile.behavior_prompt.clone(),
            task_title: task.title.clone(),
            task_description: task.description.clone(),
            turns,
            actions,
            channel_activity,
            tools: descriptors,
        });

        let request = CompletionRequest {
            messages,
            tools: tool_specs,
            model: self.profile.llm.model.clone(),
            temperature: self.profile.llm.temperature,
            max_tokens: self.profile.llm.max_tokens,
            reasoning: self.profile.llm.reasoning,
        };

        self.deps
            .gateway
            .complete(
                &self.profile.llm.provider,
                GatewayRequest {
                    agent_id: self.profile.agent_id.clone(),
                    request,
                    cancel: cancel.token(),
                },
            )
            .await
    }

    /// Dispatch one turn's tool calls.
    ///
    /// Declared order is preserved. The batch runs concurrently only when
    /// every call is safe-parallel and none is terminal; otherwise calls run
    /// one at a time so earlier side effects are visible to later calls.
    async fn dispatch_batch(
        &self,
        task: &TaskAssignment,
        calls: Vec<ToolCall>,
        breaker: &mut CircuitBreaker,
        cancel: &CancelHandle,
    ) -> BatchVerdict {
        let ctx = ToolContext {
            agent_id: self.profile.agent_id.clone(),
            channel_id: self.profile.channel_id.clone(),
            task_id: Some(task.task_id.clone()),
        };

        let flagged: Vec<(ToolCall, mxf_tools::ToolFlags)> = calls
            .into_iter()
            .map(|c| {
                let flags = self.deps.registry.flags(&c.name).unwrap_or_default();
                (c, flags)
            })
            .collect();

        let all_safe = !flagged.is_empty()
            && flagged
                .iter()
                .all(|(_, f)| f.safe_parallel && !f.terminal);

        // The breaker counts dispatch attempts, in declared order, before
        // anything executes concurrently.
        for (call, _) in &flagged {
            if breaker.record(&call.name, &call.args) {
                warn!(agent = %self.profile.agent_id, tool = %call.name, "circuit breaker tripped");
                return BatchVerdict::Broken {
                    tool: call.name.clone(),
                };
            }
        }

        if all_safe {
            return self.dispatch_parallel(flagged, &ctx, cancel).await;
        }
        self.dispatch_sequential(flagged, &ctx, cancel).await
    }

    async fn dispatch_sequential(
        &self,
        flagged: Vec<(ToolCall, mxf_tools::ToolFlags)>,
        ctx: &ToolContext,
        cancel: &CancelHandle,
    ) -> BatchVerdict {
        for (call, flags) in flagged {
            // Cancellation drops the remaining calls without awaiting them.
            if cancel.is_cancelled() {
                return BatchVerdict::Cancelled;
            }

            self.memory.lock().unwrap().append(ChatMessage::tool_call(
                &call.id,
                &call.name,
                call.args.clone(),
            ));
            let _ = self
                .events
                .send(AgentEvent::ToolCallStarted {
                    agent_id: self.profile.agent_id.clone(),
                    call: call.clone(),
                })
                .await;

            let cancel_token = cancel.token();
            let ret = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return BatchVerdict::Cancelled,
                ret = self.invoke_guarded(&call, &flags, ctx) => ret,
            };

            self.record_result(&call, &ret).await;

            if ret.ok && flags.terminal {
                // Terminal short-circuit: remaining calls in the batch are
                // discarded.
                let summary = call
                    .args
                    .get("summary")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let success = call
                    .args
                    .get("success")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true);
                return BatchVerdict::Completed { summary, success };
            }
        }
        BatchVerdict::Continue
    }

    async fn dispatch_parallel(
        &self,
        flagged: Vec<(ToolCall, mxf_tools::ToolFlags)>,
        ctx: &ToolContext,
        cancel: &CancelHandle,
    ) -> BatchVerdict {
        // Phase 1: all call turns enter memory before any result.
        {
            let mut memory = self.memory.lock().unwrap();
            for (call, _) in &flagged {
                memory.append(ChatMessage::tool_call(
                    &call.id,
                    &call.name,
                    call.args.clone(),
                ));
            }
        }
        for (call, _) in &flagged {
            let _ = self
                .events
                .send(AgentEvent::ToolCallStarted {
                    agent_id: self.profile.agent_id.clone(),
                    call: call.clone(),
                })
                .await;
        }

        // Phase 2: run concurrently, collect in declared order.
        let mut handles = Vec::with_capacity(flagged.len());
        for (call, flags) in &flagged {
            let registry = Arc::clone(&self.deps.registry);
            let grants = self.profile.grants.clone();
            let ctx = ctx.clone();
            let call = call.clone();
            let timeout = self.tool_timeout(&call.name, flags);
            handles.push(tokio::spawn(async move {
                invoke_with_timeout(&registry, &call, &grants, &ctx, timeout).await
            }));
        }

        let mut returns = Vec::with_capacity(handles.len());
        for (handle, (call, _)) in handles.into_iter().zip(&flagged) {
            if cancel.is_cancelled() {
                return BatchVerdict::Cancelled;
            }
            let ret = match handle.await {
                Ok(ret) => ret,
                Err(e) => ToolReturn::err(
                    &call.id,
                    ErrorKind::HandlerFailed,
                    format!("tool task panicked: {e}"),
                ),
            };
            returns.push(ret);
        }

        // Phase 3: results enter memory in declared order.
        for ((call, _), ret) in flagged.iter().zip(returns) {
            self.record_result(call, &ret).await;
        }
        BatchVerdict::Continue
    }

    /// Invoke one call, honoring the per-tool timeout override and the
    /// orchestration gate.
    async fn invoke_guarded(
        &self,
        call: &ToolCall,
        flags: &mxf_tools::ToolFlags,
        ctx: &ToolContext,
    ) -> ToolReturn {
        if flags.orchestration && !self.profile.system_llm_enabled {
            return ToolReturn::err(
                &call.id,
                ErrorKind::NotPermitted,
                "channel-level LLM orchestration is disabled",
            );
        }
        invoke_with_timeout(
            &self.deps.registry,
            call,
            &self.profile.grants,
            ctx,
            self.tool_timeout(&call.name, flags),
        )
        .await
    }

    /// Per-tool timeout: only an explicit `by_tool` override bounds a call.
    /// Internal tools are otherwise unbounded (a blocking user-input wait
    /// has no implicit deadline); MCP proxies carry their own 30 s guard.
    fn tool_timeout(&self, name: &str, _flags: &mxf_tools::ToolFlags) -> Option<Duration> {
        self.profile
            .tool_timeouts
            .by_tool
            .get(name)
            .map(|ms| Duration::from_millis(*ms))
    }

    /// Record the action, emit the finished event, and feed the result turn.
    async fn record_result(&self, call: &ToolCall, ret: &ToolReturn) {
        {
            let mut memory = self.memory.lock().unwrap();
            memory.record_action(action_entry(call, ret));
            memory.append(ChatMessage::tool_result(
                &call.id,
                ret.to_result_json().to_string(),
            ));
        }
        let _ = self
            .events
            .send(AgentEvent::ToolCallFinished {
                agent_id: self.profile.agent_id.clone(),
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                ok: ret.ok,
                content: ret.content.clone(),
            })
            .await;
    }

    fn append_cancel_marker(&self, cancel: &CancelHandle) {
        // Cancellation leaves the conversation untouched except for this
        // marker turn.
        let SessionOutcome::Cancelled { reason, .. } = cancel.outcome() else {
            return;
        };
        self.memory
            .lock()
            .unwrap()
            .append(ChatMessage::user(format!("[session cancelled: {reason}]")));
    }
}

async fn invoke_with_timeout(
    registry: &ToolRegistry,
    call: &ToolCall,
    grants: &mxf_tools::ToolGrants,
    ctx: &ToolContext,
    timeout: Option<Duration>,
) -> ToolReturn {
    match timeout {
        None => registry.invoke(call, grants, ctx).await,
        Some(limit) => {
            match tokio::time::timeout(limit, registry.invoke(call, grants, ctx)).await {
                Ok(ret) => ret,
                Err(_) => ToolReturn::err(
                    &call.id,
                    ErrorKind::Timeout,
                    format!("tool call timed out after {} ms", limit.as_millis()),
                ),
            }
        }
    }
}

/// Build the action-log entry for a resolved call.
fn action_entry(call: &ToolCall, ret: &ToolReturn) -> ActionEntry {
    let mut entry = match call.name.as_str() {
        "messaging_send" => {
            let target = call
                .args
                .get("target_agent_id")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            let mut e = ActionEntry::new(&call.name, format!("message to {target}"));
            e.metadata.target_agent_id = Some(target.to_string());
            e.metadata.message_content = call
                .args
                .get("content")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            e
        }
        "task_complete" => {
            let summary = call
                .args
                .get("summary")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            ActionEntry::new(&call.name, summary)
        }
        "tools_recommend" => ActionEntry::new(&call.name, "ranked tools"),
        _ => ActionEntry::new(&call.name, truncate(&ret.content, 120)),
    };
    entry.input = call.args.clone();
    entry.result = truncate(&ret.content, 200);
    entry
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use mxf_model::ScriptedProvider;
    use mxf_tools::Tool;

    use super::*;

    /// Game-style stub tool that counts its executions.
    struct CountingTool {
        name: &'static str,
        executions: Arc<AtomicU32>,
        safe_parallel: bool,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn safe_parallel(&self) -> bool {
            self.safe_parallel
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolReturn {
            self.executions.fetch_add(1, Ordering::SeqCst);
            ToolReturn::ok(&call.id, "done")
        }
    }

    /// Stand-in for task_complete: terminal, always succeeds.
    struct FinishTool;

    #[async_trait]
    impl Tool for FinishTool {
        fn name(&self) -> &str {
            "task_complete"
        }
        fn description(&self) -> &str {
            "finish"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "required": ["summary"]})
        }
        fn terminal(&self) -> bool {
            true
        }
        async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolReturn {
            ToolReturn::ok(&call.id, "completion recorded")
        }
    }

    struct Harness {
        executor: TaskExecutor,
        events: mpsc::Receiver<AgentEvent>,
        provider: Arc<ScriptedProvider>,
        executions: Arc<AtomicU32>,
    }

    fn harness(script: Vec<mxf_model::Completion>, profile: AgentProfile) -> Harness {
        let provider = Arc::new(ScriptedProvider::new(script));
        let mut gateway = LlmGateway::new();
        gateway.register(
            "scripted",
            Arc::clone(&provider) as Arc<dyn mxf_model::ModelProvider>,
            2,
            Duration::from_secs(10),
        );

        let registry = Arc::new(ToolRegistry::new());
        let executions = Arc::new(AtomicU32::new(0));
        registry.register(CountingTool {
            name: "game_makeMove",
            executions: Arc::clone(&executions),
            safe_parallel: false,
        });
        registry.register(CountingTool {
            name: "game_getBoard",
            executions: Arc::clone(&executions),
            safe_parallel: true,
        });
        registry.register(FinishTool);

        let deps = Arc::new(ExecutorDeps {
            gateway: Arc::new(gateway),
            registry,
            assembler: PromptAssembler::new(),
            activity: Arc::new(NoActivity),
        });

        let (tx, rx) = mpsc::channel(256);
        let mut profile = profile;
        profile.llm.provider = "scripted".into();
        let executor = TaskExecutor::new(
            profile,
            deps,
            Arc::new(Mutex::new(ConversationMemory::new())),
            tx,
        );
        Harness {
            executor,
            events: rx,
            provider,
            executions,
        }
    }

    fn task() -> TaskAssignment {
        TaskAssignment {
            task_id: "t1".into(),
            title: "win".into(),
            description: "win the game".into(),
        }
    }

    fn tool_call(id: &str, name: &str, args: Value) -> mxf_model::Completion {
        ScriptedProvider::tool_call_completion(id, name, args)
    }

    fn drain_session_ended(events: &mut mpsc::Receiver<AgentEvent>) -> Vec<SessionOutcome> {
        let mut out = Vec::new();
        while let Ok(ev) = events.try_recv() {
            if let AgentEvent::SessionEnded { outcome, .. } = ev {
                out.push(outcome);
            }
        }
        out
    }

    #[tokio::test]
    async fn happy_path_three_turns() {
        let mut h = harness(
            vec![
                tool_call("c1", "game_getBoard", json!({})),
                tool_call("c2", "game_makeMove", json!({"row": 1, "col": 1})),
                tool_call("c3", "task_complete", json!({"summary": "done"})),
            ],
            AgentProfile::new("a1", "ch1"),
        );

        let outcome = h.executor.run_session(&task(), &CancelHandle::new()).await;
        assert_eq!(
            outcome,
            SessionOutcome::Completed {
                summary: "done".into(),
                success: true
            }
        );
        // Exactly 3 model calls, 2 game-tool executions.
        assert_eq!(h.provider.calls(), 3);
        assert_eq!(h.executions.load(Ordering::SeqCst), 2);

        let ended = drain_session_ended(&mut h.events);
        assert_eq!(ended.len(), 1, "exactly one terminal event per session");
    }

    #[tokio::test]
    async fn circuit_breaker_trips_on_third_identical_call() {
        let script: Vec<_> = (0..5)
            .map(|i| {
                tool_call(
                    &format!("c{i}"),
                    "game_makeMove",
                    json!({"row": 0, "col": 0}),
                )
            })
            .collect();
        let mut h = harness(script, AgentProfile::new("a1", "ch1"));

        let outcome = h.executor.run_session(&task(), &CancelHandle::new()).await;
        assert_eq!(
            outcome,
            SessionOutcome::Broken {
                tool: "game_makeMove".into()
            }
        );
        // The tripping dispatch must not execute: 2 executions, not 3.
        assert_eq!(h.executions.load(Ordering::SeqCst), 2);
        assert_eq!(drain_session_ended(&mut h.events).len(), 1);
    }

    #[tokio::test]
    async fn exempt_tools_may_poll_repeatedly() {
        let mut script: Vec<_> = (0..4)
            .map(|i| tool_call(&format!("c{i}"), "game_getBoard", json!({})))
            .collect();
        script.push(tool_call("cf", "task_complete", json!({"summary": "ok"})));

        let mut profile = AgentProfile::new("a1", "ch1");
        profile.breaker_exempt.insert("game_getBoard".into());
        let h = harness(script, profile);

        let outcome = h.executor.run_session(&task(), &CancelHandle::new()).await;
        assert!(matches!(outcome, SessionOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn iteration_cap_exhausts_session() {
        // Distinct moves so the breaker never trips first.
        let script: Vec<_> = (0..30)
            .map(|i| tool_call(&format!("c{i}"), "game_makeMove", json!({"row": i})))
            .collect();
        let mut profile = AgentProfile::new("a1", "ch1");
        profile.llm.max_iterations = 4;
        let h = harness(script, profile);

        let outcome = h.executor.run_session(&task(), &CancelHandle::new()).await;
        assert_eq!(outcome, SessionOutcome::Exhausted);
        assert_eq!(h.provider.calls(), 4);
    }

    #[tokio::test]
    async fn text_only_reply_ends_without_completion() {
        let h = harness(
            vec![ScriptedProvider::text_completion("I am done thinking.")],
            AgentProfile::new("a1", "ch1"),
        );
        let outcome = h.executor.run_session(&task(), &CancelHandle::new()).await;
        assert_eq!(outcome, SessionOutcome::NoCompletion);
    }

    #[tokio::test]
    async fn cancellation_mid_model_call_aborts_quickly() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![ScriptedProvider::text_completion("late")])
                .with_delay(Duration::from_secs(5)),
        );
        let mut gateway = LlmGateway::new();
        gateway.register(
            "scripted",
            Arc::clone(&provider) as Arc<dyn mxf_model::ModelProvider>,
            1,
            Duration::from_secs(30),
        );
        let deps = Arc::new(ExecutorDeps {
            gateway: Arc::new(gateway),
            registry: Arc::new(ToolRegistry::new()),
            assembler: PromptAssembler::new(),
            activity: Arc::new(NoActivity),
        });
        let (tx, mut rx) = mpsc::channel(64);
        let mut profile = AgentProfile::new("a1", "ch1");
        profile.llm.provider = "scripted".into();
        let executor = TaskExecutor::new(
            profile,
            deps,
            Arc::new(Mutex::new(ConversationMemory::new())),
            tx,
        );

        let cancel = CancelHandle::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel("external", false);
        });

        let started = std::time::Instant::now();
        let outcome = executor.run_session(&task(), &cancel).await;
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "cancellation must abort the in-flight call quickly"
        );
        assert_eq!(
            outcome,
            SessionOutcome::Cancelled {
                reason: "external".into(),
                silent: false
            }
        );
        // No tool events after cancellation; exactly one SessionEnded.
        let mut ended = 0;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                AgentEvent::SessionEnded { .. } => ended += 1,
                AgentEvent::ToolCallStarted { .. } => panic!("no tool calls after cancel"),
                _ => {}
            }
        }
        assert_eq!(ended, 1);
    }

    #[tokio::test]
    async fn terminal_short_circuit_discards_rest_of_batch() {
        // One completion carrying task_complete followed by another move:
        // the move must never execute.
        let completion = mxf_model::Completion {
            tool_calls: vec![
                mxf_model::RawToolCall {
                    id: "c1".into(),
                    name: "task_complete".into(),
                    arguments: json!({"summary": "early"}).to_string(),
                },
                mxf_model::RawToolCall {
                    id: "c2".into(),
                    name: "game_makeMove".into(),
                    arguments: json!({"row": 9}).to_string(),
                },
            ],
            ..Default::default()
        };
        let h = harness(vec![completion], AgentProfile::new("a1", "ch1"));
        let outcome = h.executor.run_session(&task(), &CancelHandle::new()).await;
        assert!(matches!(outcome, SessionOutcome::Completed { .. }));
        assert_eq!(h.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn safe_parallel_batch_resolves_all_calls() {
        let completion = mxf_model::Completion {
            tool_calls: vec![
                mxf_model::RawToolCall {
                    id: "c1".into(),
                    name: "game_getBoard".into(),
                    arguments: "{}".into(),
                },
                mxf_model::RawToolCall {
                    id: "c2".into(),
                    name: "game_getBoard".into(),
                    arguments: json!({"detail": true}).to_string(),
                },
            ],
            ..Default::default()
        };
        let mut h = harness(
            vec![
                completion,
                tool_call("c3", "task_complete", json!({"summary": "ok"})),
            ],
            AgentProfile::new("a1", "ch1"),
        );
        let outcome = h.executor.run_session(&task(), &CancelHandle::new()).await;
        assert!(matches!(outcome, SessionOutcome::Completed { .. }));
        assert_eq!(h.executions.load(Ordering::SeqCst), 2);

        // Both results were fed back before the next model call.
        let requests = h.provider.requests.lock().unwrap();
        let second = &requests[1];
        let results = second
            .messages
            .iter()
            .filter(|m| matches!(m.role, mxf_model::Role::Tool))
            .count();
        assert_eq!(results, 2);
        drop(requests);
        assert_eq!(drain_session_ended(&mut h.events).len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_failure_is_fed_back_and_session_continues() {
        let mut h = harness(
            vec![
                tool_call("c1", "no_such_tool", json!({})),
                tool_call("c2", "task_complete", json!({"summary": "recovered"})),
            ],
            AgentProfile::new("a1", "ch1"),
        );
        let outcome = h.executor.run_session(&task(), &CancelHandle::new()).await;
        assert!(matches!(outcome, SessionOutcome::Completed { .. }));

        // The failure went back to the model as a tool result.
        let requests = h.provider.requests.lock().unwrap();
        let fed = requests[1]
            .messages
            .iter()
            .any(|m| matches!(&m.content, mxf_model::MessageContent::ToolResult { content, .. } if content.contains("unknown_tool")));
        assert!(fed);
    }

    #[tokio::test]
    async fn pre_cancelled_session_never_calls_model() {
        let h = harness(
            vec![ScriptedProvider::text_completion("never")],
            AgentProfile::new("a1", "ch1"),
        );
        let cancel = CancelHandle::new();
        cancel.cancel("gone", true);
        let outcome = h.executor.run_session(&task(), &cancel).await;
        assert_eq!(
            outcome,
            SessionOutcome::Cancelled {
                reason: "gone".into(),
                silent: true
            }
        );
        assert_eq!(h.provider.calls(), 0);
    }
}
