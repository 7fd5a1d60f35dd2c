// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "mxf",
    about = "Model Exchange Framework — a server-mediated runtime for LLM-backed agents",
    version
)]
pub struct Cli {
    /// Explicit config file (merged over the default search paths)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log to stderr at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the node: admin API plus the agent WebSocket endpoint
    Serve,
    /// Generate a random admin token (set it as MXF_ADMIN_TOKEN)
    Keygen,
    /// Print the effective merged configuration
    ShowConfig,
}
