// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Router assembly and the two transport handlers.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use mxf_core::ExecutorDeps;
use mxf_hub::{
    AdminSurface, AgentRecord, AgentWorker, ChannelHub, ChannelSpec, ConnectionState, KeyStore,
    TaskSpec,
};
use mxf_mcp::{McpAdapter, McpServerDescriptor};

use crate::frames::{AgentCommand, ServerFrame};
use crate::NodeError;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ChannelHub>,
    pub admin: Arc<AdminSurface>,
    pub keys: Arc<KeyStore>,
    pub adapter: Arc<McpAdapter>,
    pub deps: Arc<ExecutorDeps>,
    /// Raw admin token, read from the environment at startup.
    pub admin_token: Arc<String>,
}

/// Handle to a serving node.
pub struct NodeHandle {
    pub local_addr: std::net::SocketAddr,
}

/// Bind `bind` and serve the router in a background task.
pub async fn serve(state: AppState, bind: &str) -> anyhow::Result<NodeHandle> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    let local_addr = listener.local_addr()?;
    let app = build_router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("server error: {e}");
        }
    });
    info!(%local_addr, "node listening");
    Ok(NodeHandle { local_addr })
}

/// Build the axum router over the shared state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/channels", post(create_channel))
        .route("/admin/channels/:id", delete(delete_channel))
        .route("/admin/channels/:id/keys", post(issue_key).get(list_keys))
        .route("/admin/keys/:key_id", delete(revoke_key))
        .route("/admin/channels/:id/agents", post(register_agent))
        .route("/admin/channels/:id/mcp", post(register_mcp))
        .route("/tasks", post(create_task))
        .route("/user-input/:request_id/response", post(respond_user_input))
        .route("/ws/agent", get(agent_ws))
        .with_state(state)
}

// ── Admin auth ────────────────────────────────────────────────────────────────

/// Constant-time bearer token check against the configured admin token.
fn check_admin(state: &AppState, headers: &HeaderMap) -> Result<(), NodeError> {
    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(NodeError::Auth)?;
    let ok: bool = provided
        .as_bytes()
        .ct_eq(state.admin_token.as_bytes())
        .into();
    if !ok {
        return Err(NodeError::Auth);
    }
    Ok(())
}

// ── Admin routes ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateChannelBody {
    id: String,
    #[serde(default)]
    spec: Option<ChannelSpec>,
}

async fn create_channel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateChannelBody>,
) -> Result<impl IntoResponse, NodeError> {
    check_admin(&state, &headers)?;
    state
        .admin
        .create_channel(&body.id, body.spec.unwrap_or_default())
        .await?;
    Ok(Json(serde_json::json!({ "channel_id": body.id })))
}

async fn delete_channel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, NodeError> {
    check_admin(&state, &headers)?;
    state.admin.delete_channel(&id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

async fn issue_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, NodeError> {
    check_admin(&state, &headers)?;
    let key = state.admin.issue_key(&id)?;
    // The secret appears in this response and nowhere else, ever.
    Ok(Json(serde_json::json!({
        "key_id": key.key_id,
        "secret_key": key.secret,
    })))
}

async fn list_keys(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, NodeError> {
    check_admin(&state, &headers)?;
    Ok(Json(state.admin.list_keys(&id)))
}

async fn revoke_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key_id): Path<String>,
) -> Result<impl IntoResponse, NodeError> {
    check_admin(&state, &headers)?;
    state.admin.revoke_key(&key_id)?;
    Ok(Json(serde_json::json!({ "revoked": key_id })))
}

async fn register_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(mut record): Json<AgentRecord>,
) -> Result<impl IntoResponse, NodeError> {
    check_admin(&state, &headers)?;
    record.channel_id = id;
    if record.display_name.is_empty() {
        record.display_name = record.agent_id.clone();
    }
    let agent_id = record.agent_id.clone();
    state.admin.register_agent(record).await?;
    // Each registered agent gets its worker immediately; assignments created
    // before the agent's stream connects queue behind it.
    AgentWorker::spawn(Arc::clone(&state.hub), Arc::clone(&state.deps), &agent_id)?;
    Ok(Json(serde_json::json!({ "agent_id": agent_id })))
}

async fn register_mcp(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(descriptor): Json<McpServerDescriptor>,
) -> Result<impl IntoResponse, NodeError> {
    check_admin(&state, &headers)?;
    state.admin.register_mcp_server(&id, descriptor).await?;
    Ok(Json(serde_json::json!({ "registered": true })))
}

// ── Task creation endpoint ────────────────────────────────────────────────────

async fn create_task(
    State(state): State<AppState>,
    Json(spec): Json<TaskSpec>,
) -> Result<impl IntoResponse, NodeError> {
    let task = state.hub.create_task(spec).await?;
    Ok(Json(serde_json::json!({ "task_id": task.id })))
}

// ── User input response (human side) ──────────────────────────────────────────

#[derive(Deserialize)]
struct RespondBody {
    value: serde_json::Value,
}

async fn respond_user_input(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Json(body): Json<RespondBody>,
) -> Result<impl IntoResponse, NodeError> {
    state.hub.respond_user_input(&request_id, body.value)?;
    Ok(Json(serde_json::json!({ "responded": request_id })))
}

// ── Agent WebSocket ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AgentAuthQuery {
    channel_id: String,
    agent_id: String,
    key_id: String,
    secret_key: String,
}

async fn agent_ws(
    State(state): State<AppState>,
    Query(auth): Query<AgentAuthQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, NodeError> {
    // Authenticate before the upgrade so a bad key costs one HTTP round-trip.
    state
        .keys
        .verify(&auth.channel_id, &auth.key_id, &auth.secret_key)?;
    let agent = state
        .hub
        .agent(&auth.agent_id)
        .ok_or(NodeError::Auth)?;
    if agent.channel_id != auth.channel_id {
        return Err(NodeError::Auth);
    }

    info!(agent = %auth.agent_id, channel = %auth.channel_id, "agent connecting");
    Ok(ws.on_upgrade(move |socket| agent_session(state, auth, socket)))
}

async fn agent_session(state: AppState, auth: AgentAuthQuery, mut socket: WebSocket) {
    let agent_id = auth.agent_id.clone();
    let channel_id = auth.channel_id.clone();

    let _ = state
        .hub
        .set_connection(&agent_id, ConnectionState::Connecting);

    // Capability confirmation: permitted tools and LLM config.
    let confirmed = match (state.hub.grants_for(&agent_id), state.hub.agent(&agent_id)) {
        (Ok(grants), Some(record)) => {
            let tools = state.hub.registry().list_for(&channel_id, &grants);
            let frame = ServerFrame::Connected {
                agent_id: agent_id.clone(),
                channel_id: channel_id.clone(),
                tools,
                llm: record.llm,
            };
            send_frame(&mut socket, &frame).await
        }
        _ => false,
    };
    if !confirmed {
        let _ = state
            .hub
            .set_connection(&agent_id, ConnectionState::Offline);
        return;
    }
    let _ = state.hub.set_connection(&agent_id, ConnectionState::Online);
    // A live member cancels any pending keep-alive expiry of the channel's
    // tool servers.
    state.adapter.channel_active(&channel_id).await;

    let mut events = state.hub.subscribe();
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(ev) if ev.channel_id == channel_id => {
                        if !send_frame(&mut socket, &ServerFrame::Event { event: ev }).await {
                            break;
                        }
                    }
                    Ok(_) => {} // other channels are invisible
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(agent = %agent_id, missed = n, "agent stream lagged");
                    }
                    Err(_) => break,
                }
            }
            incoming = socket.recv() => {
                let Some(Ok(msg)) = incoming else { break };
                if let Message::Text(text) = msg {
                    handle_command(&state, &agent_id, &text).await;
                }
            }
        }
    }

    let _ = state
        .hub
        .set_connection(&agent_id, ConnectionState::Disconnecting);
    let _ = state
        .hub
        .set_connection(&agent_id, ConnectionState::Offline);
    // Last member out starts the keep-alive countdown for the channel's
    // tool servers.
    if !state.hub.channel_has_online_members(&channel_id) {
        state.adapter.channel_idle(&channel_id).await;
    }
    info!(agent = %agent_id, "agent disconnected");
}

async fn handle_command(state: &AppState, agent_id: &str, text: &str) {
    let command: AgentCommand = match serde_json::from_str(text) {
        Ok(c) => c,
        Err(e) => {
            debug!(agent = agent_id, "unparseable agent command: {e}");
            return;
        }
    };
    match command {
        AgentCommand::UserInputResponse { request_id, value } => {
            if let Err(e) = state.hub.respond_user_input(&request_id, value) {
                debug!(agent = agent_id, "user input response rejected: {e}");
            }
        }
        AgentCommand::CancelTask { task_id, reason } => {
            if let Err(e) = state.hub.cancel_task(&task_id, &reason).await {
                debug!(agent = agent_id, "cancel rejected: {e}");
            }
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => socket.send(Message::Text(json)).await.is_ok(),
        Err(_) => false,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
