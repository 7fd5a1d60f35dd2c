// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The universal tool set every agent runtime registers at startup.
//!
//! Each tool acts through the injected [`crate::AgentServices`] handle, so
//! this module carries no hub types and every tool is testable against a
//! stub service.

mod messaging;
mod recommend;
mod request_input;
mod task_complete;
mod user_input;

pub use messaging::MessagingSendTool;
pub use recommend::ToolsRecommendTool;
pub use request_input::{GetUserInputResponseTool, RequestUserInputTool};
pub use task_complete::TaskCompleteTool;
pub use user_input::UserInputTool;

use std::sync::Arc;

use crate::{AgentServices, ToolRegistry};

/// Register the universal tools against `registry`.
pub fn register_builtin_tools(registry: &ToolRegistry, services: Arc<dyn AgentServices>) {
    registry.register(TaskCompleteTool::new(Arc::clone(&services)));
    registry.register(MessagingSendTool::new(Arc::clone(&services)));
    registry.register(UserInputTool::new(Arc::clone(&services)));
    registry.register(RequestUserInputTool::new(Arc::clone(&services)));
    registry.register(GetUserInputResponseTool::new(Arc::clone(&services)));
    registry.register(ToolsRecommendTool::new(services));
}
