// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod builtin;
mod error;
mod registry;
mod services;
mod tool;

pub use error::{ErrorKind, ServiceError};
pub use registry::{ToolFlags, ToolGrants, ToolRegistry};
pub use services::{
    AgentServices, CompletionAck, InputType, Urgency, UserInputOutcome, UserInputSpec,
    UserInputStatus,
};
pub use tool::{Tool, ToolCall, ToolContext, ToolDescriptor, ToolOrigin, ToolReturn};
