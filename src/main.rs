// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use mxf_core::{ActivitySource, ExecutorDeps, PromptAssembler};
use mxf_hub::{AdminSurface, ChannelHub, KeyStore, MemoryStore};
use mxf_mcp::McpAdapter;
use mxf_model::LlmGateway;
use mxf_node::AppState;
use mxf_tools::{builtin::register_builtin_tools, AgentServices, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Keygen => {
            println!("{}", mint_token());
            Ok(())
        }
        Commands::ShowConfig => {
            let config = mxf_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::Serve => serve(cli).await,
    }
}

async fn serve(cli: Cli) -> anyhow::Result<()> {
    let config = mxf_config::load(cli.config.as_deref())?;

    let admin_token = std::env::var(&config.server.admin_token_env).with_context(|| {
        format!(
            "admin token not set; export {} (generate one with `mxf keygen`)",
            config.server.admin_token_env
        )
    })?;

    // LLM gateway: one queue per configured provider.
    let mut gateway = LlmGateway::new();
    for (name, provider_cfg) in &config.providers {
        let provider = mxf_model::from_config(name, provider_cfg)
            .with_context(|| format!("building provider {name}"))?;
        gateway.register(
            name.clone(),
            Arc::from(provider),
            provider_cfg.concurrency,
            Duration::from_millis(provider_cfg.timeout_ms),
        );
    }

    let registry = Arc::new(ToolRegistry::new());
    let store = Arc::new(MemoryStore::new());
    let hub = ChannelHub::new(
        Arc::clone(&registry),
        store,
        config.runtime.clone(),
    );
    register_builtin_tools(&registry, Arc::clone(&hub) as Arc<dyn AgentServices>);

    let adapter = Arc::new(McpAdapter::new(
        Arc::clone(&registry),
        config.server.mcp_workdir.clone().map(Into::into),
    ));

    // Tool-manifest changes reach subscribers through the channel bus.
    {
        let mut mcp_events = adapter.subscribe();
        let hub_for_mcp = Arc::clone(&hub);
        tokio::spawn(async move {
            loop {
                match mcp_events.recv().await {
                    Ok(mxf_mcp::McpEvent::ToolListUpdated {
                        channel_id,
                        server_id,
                        tools,
                    }) => {
                        hub_for_mcp.publish_tool_list_updated(&channel_id, &server_id, tools);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
        });
    }
    let keys = Arc::new(KeyStore::new());
    let admin = Arc::new(AdminSurface::new(
        Arc::clone(&hub),
        Arc::clone(&keys),
        Arc::clone(&adapter),
    ));

    let deps = Arc::new(ExecutorDeps {
        gateway: Arc::new(gateway),
        registry,
        assembler: PromptAssembler::new(),
        activity: Arc::clone(&hub) as Arc<dyn ActivitySource>,
    });

    let state = AppState {
        hub: Arc::clone(&hub),
        admin,
        keys,
        adapter: Arc::clone(&adapter),
        deps,
        admin_token: Arc::new(admin_token),
    };

    let handle = mxf_node::serve(state, &config.server.bind).await?;
    println!("mxf node listening on {}", handle.local_addr);

    tokio::signal::ctrl_c().await?;
    // Open user-input requests drain as cancelled; tool servers get the
    // SIGTERM/SIGKILL sequence.
    hub.drain_user_input();
    adapter.shutdown().await;
    Ok(())
}

fn mint_token() -> String {
    use base64::Engine;
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
