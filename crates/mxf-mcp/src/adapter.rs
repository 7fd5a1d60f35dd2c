// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Lifecycle management for channel-scoped tool servers.
//!
//! The adapter keys servers by `(channel_id, server_id)`. Registration is
//! idempotent: re-registering an already-running pair never spawns a second
//! process. Each server runs under a supervisor task that performs the
//! handshake, publishes the tool manifest into the registry, and restarts
//! the process with exponential backoff when it crashes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mxf_tools::ToolRegistry;

use crate::client::McpClient;
use crate::descriptor::McpServerDescriptor;
use crate::proxy::{ClientSlot, McpProxyTool};

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);
/// Uptime after which the backoff resets to the initial value.
const BACKOFF_RESET_UPTIME: Duration = Duration::from_secs(30);
/// Handshake and manifest requests share this timeout.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default per-call timeout for proxied tools.
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Notifications emitted by the adapter.
#[derive(Debug, Clone)]
pub enum McpEvent {
    /// The announced tool set of a server changed (startup or restart).
    ToolListUpdated {
        channel_id: String,
        server_id: String,
        tools: Vec<String>,
    },
}

struct ServerEntry {
    descriptor: McpServerDescriptor,
    shutdown: CancellationToken,
    slot: ClientSlot,
    /// Abort handle of a pending keep-alive expiry, if one is scheduled.
    keep_alive: Option<tokio::task::JoinHandle<()>>,
}

/// Spawns, supervises, and scopes external tool servers.
pub struct McpAdapter {
    registry: Arc<ToolRegistry>,
    servers: Mutex<HashMap<(String, String), ServerEntry>>,
    events: broadcast::Sender<McpEvent>,
    workdir: Option<PathBuf>,
    call_timeout: Duration,
}

impl McpAdapter {
    pub fn new(registry: Arc<ToolRegistry>, workdir: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            registry,
            servers: Mutex::new(HashMap::new()),
            events,
            workdir,
            call_timeout: CALL_TIMEOUT,
        }
    }

    /// Subscribe to [`McpEvent`] notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<McpEvent> {
        self.events.subscribe()
    }

    /// Register and (auto-)start a server for a channel.
    ///
    /// Idempotent on `(channel_id, descriptor.server_id)`: a second call with
    /// the same key is a no-op and never spawns a second process.
    pub async fn register(&self, channel_id: &str, descriptor: McpServerDescriptor) {
        let key = (channel_id.to_string(), descriptor.server_id.clone());
        let mut servers = self.servers.lock().await;
        if servers.contains_key(&key) {
            return;
        }

        let shutdown = CancellationToken::new();
        let slot: ClientSlot = Arc::new(Mutex::new(None));
        let entry = ServerEntry {
            descriptor: descriptor.clone(),
            shutdown: shutdown.clone(),
            slot: Arc::clone(&slot),
            keep_alive: None,
        };
        servers.insert(key, entry);
        drop(servers);

        if descriptor.auto_start {
            self.spawn_supervisor(channel_id.to_string(), descriptor, slot, shutdown);
        }
    }

    /// Stop a server and withdraw its tools.
    pub async fn unregister(&self, channel_id: &str, server_id: &str) {
        let key = (channel_id.to_string(), server_id.to_string());
        if let Some(entry) = self.servers.lock().await.remove(&key) {
            if let Some(handle) = entry.keep_alive {
                handle.abort();
            }
            entry.shutdown.cancel();
            self.registry.withdraw_mcp(channel_id, server_id);
        }
    }

    /// The last agent of `channel_id` went offline: schedule termination of
    /// its servers after each one's keep-alive window.
    pub async fn channel_idle(&self, channel_id: &str) {
        let mut servers = self.servers.lock().await;
        for ((chan, _), entry) in servers.iter_mut() {
            if chan != channel_id || entry.keep_alive.is_some() {
                continue;
            }
            let window = Duration::from_secs(entry.descriptor.keep_alive_minutes * 60);
            let shutdown = entry.shutdown.clone();
            let server_id = entry.descriptor.server_id.clone();
            let channel = chan.clone();
            entry.keep_alive = Some(tokio::spawn(async move {
                tokio::time::sleep(window).await;
                info!(%channel, server = %server_id, "keep-alive expired, stopping tool server");
                shutdown.cancel();
            }));
        }
    }

    /// An agent of `channel_id` came (back) online: cancel pending
    /// keep-alive expirations.
    pub async fn channel_active(&self, channel_id: &str) {
        let mut servers = self.servers.lock().await;
        for ((chan, _), entry) in servers.iter_mut() {
            if chan == channel_id {
                if let Some(handle) = entry.keep_alive.take() {
                    handle.abort();
                }
            }
        }
    }

    /// Terminate every server immediately (node shutdown).
    pub async fn shutdown(&self) {
        let mut servers = self.servers.lock().await;
        for ((channel, server), entry) in servers.drain() {
            if let Some(handle) = entry.keep_alive {
                handle.abort();
            }
            entry.shutdown.cancel();
            self.registry.withdraw_mcp(&channel, &server);
        }
    }

    /// Number of registered servers (for admin listings).
    pub async fn server_count(&self) -> usize {
        self.servers.lock().await.len()
    }

    fn spawn_supervisor(
        &self,
        channel_id: String,
        descriptor: McpServerDescriptor,
        slot: ClientSlot,
        shutdown: CancellationToken,
    ) {
        let registry = Arc::clone(&self.registry);
        let events = self.events.clone();
        let workdir = self.workdir.clone();
        let call_timeout = self.call_timeout;

        tokio::spawn(async move {
            let mut backoff = BACKOFF_INITIAL;
            loop {
                if shutdown.is_cancelled() {
                    break;
                }

                let started = Instant::now();
                match McpClient::spawn(&descriptor, workdir.as_deref()) {
                    Ok(client) => {
                        let client = Arc::new(client);
                        match announce(
                            &client,
                            &registry,
                            &channel_id,
                            &descriptor,
                            &slot,
                            call_timeout,
                            &events,
                        )
                        .await
                        {
                            Ok(()) => {
                                *slot.lock().await = Some(Arc::clone(&client));
                                // Run until the process dies or we are told to stop.
                                tokio::select! {
                                    _ = shutdown.cancelled() => {
                                        *slot.lock().await = None;
                                        client.terminate().await;
                                        break;
                                    }
                                    _ = client.wait_exited() => {
                                        *slot.lock().await = None;
                                        warn!(channel = %channel_id, server = %descriptor.server_id, "tool server exited");
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(channel = %channel_id, server = %descriptor.server_id, "handshake failed: {e}");
                                client.terminate().await;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(channel = %channel_id, server = %descriptor.server_id, "spawn failed: {e}");
                    }
                }

                if !descriptor.restart_on_crash {
                    break;
                }
                if started.elapsed() >= BACKOFF_RESET_UPTIME {
                    backoff = BACKOFF_INITIAL;
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
        });
    }
}

/// Handshake with a fresh process and publish its manifest.
async fn announce(
    client: &Arc<McpClient>,
    registry: &Arc<ToolRegistry>,
    channel_id: &str,
    descriptor: &McpServerDescriptor,
    slot: &ClientSlot,
    call_timeout: Duration,
    events: &broadcast::Sender<McpEvent>,
) -> Result<(), crate::McpError> {
    client.initialize(HANDSHAKE_TIMEOUT).await?;
    let tools = client.list_tools(HANDSHAKE_TIMEOUT).await?;

    registry.withdraw_mcp(channel_id, &descriptor.server_id);
    let mut names = Vec::with_capacity(tools.len());
    for info in tools {
        names.push(info.name.clone());
        registry.register_mcp(
            channel_id,
            &descriptor.server_id,
            Arc::new(McpProxyTool::new(info, Arc::clone(slot), call_timeout)),
        );
    }
    info!(channel = %channel_id, server = %descriptor.server_id, tools = names.len(), "tool server online");

    // Listeners refresh prompt caches on this.
    let _ = events.send(McpEvent::ToolListUpdated {
        channel_id: channel_id.to_string(),
        server_id: descriptor.server_id.clone(),
        tools: names,
    });
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
