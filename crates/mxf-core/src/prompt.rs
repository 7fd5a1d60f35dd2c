// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Deterministic prompt assembly.
//!
//! Given the same inputs the assembler produces byte-identical output, and
//! block order is fixed (identity, tool catalog, recent actions, channel
//! activity, task, conversation turns) so the provider's prompt cache can
//! reuse the stable prefix across iterations.

use mxf_memory::ActionEntry;
use mxf_model::ChatMessage;
use mxf_tools::ToolDescriptor;

/// Default number of own-action lines included in the prompt.
pub const RECENT_ACTIONS_LIMIT: usize = 20;
/// Default number of channel-wide activity lines included in the prompt.
pub const CHANNEL_ACTIVITY_LIMIT: usize = 5;

/// Everything the assembler folds into one prompt.
#[derive(Debug, Clone, Default)]
pub struct AssemblerInputs {
    pub agent_id: String,
    pub display_name: String,
    /// The agent's configured behavior prompt.
    pub behavior_prompt: String,
    pub task_title: String,
    pub task_description: String,
    /// Conversation turns, oldest first.
    pub turns: Vec<ChatMessage>,
    /// Own recent actions, newest first.
    pub actions: Vec<ActionEntry>,
    /// Channel-wide activity digest lines, newest first.
    pub channel_activity: Vec<String>,
    /// Tool catalog, already filtered through access control.
    pub tools: Vec<ToolDescriptor>,
}

/// A hook that may rewrite the assembler inputs before rendering.
/// Decorators run in registration order; with none registered the output is
/// exactly the six-block layout.
pub type PromptDecorator = Box<dyn Fn(AssemblerInputs) -> AssemblerInputs + Send + Sync>;

/// Builds the ordered message sequence for one LLM call.
#[derive(Default)]
pub struct PromptAssembler {
    decorators: Vec<PromptDecorator>,
    recent_actions_limit: usize,
    channel_activity_limit: usize,
}

impl PromptAssembler {
    pub fn new() -> Self {
        Self {
            decorators: Vec::new(),
            recent_actions_limit: RECENT_ACTIONS_LIMIT,
            channel_activity_limit: CHANNEL_ACTIVITY_LIMIT,
        }
    }

    pub fn with_limits(mut self, actions: usize, channel_activity: usize) -> Self {
        self.recent_actions_limit = actions;
        self.channel_activity_limit = channel_activity;
        self
    }

    /// Append a decorator to the chain.
    pub fn add_decorator(&mut self, decorator: PromptDecorator) {
        self.decorators.push(decorator);
    }

    /// Produce the message sequence: one system message carrying the five
    /// context blocks, followed by the conversation turns in order.
    pub fn assemble(&self, inputs: AssemblerInputs) -> Vec<ChatMessage> {
        let inputs = self
            .decorators
            .iter()
            .fold(inputs, |acc, decorate| decorate(acc));

        let mut system = String::new();

        // 1. Identity block.
        system.push_str(&format!(
            "You are agent \"{}\" (id: {}).\n",
            inputs.display_name, inputs.agent_id
        ));
        if !inputs.behavior_prompt.is_empty() {
            system.push_str(&inputs.behavior_prompt);
            system.push('\n');
        }

        // 2. Tool catalog block.
        if !inputs.tools.is_empty() {
            system.push_str("\n## Available tools\n");
            for tool in &inputs.tools {
                system.push_str(&format!(
                    "- {}: {}\n  schema: {}\n",
                    tool.name, tool.description, tool.parameters
                ));
            }
        }

        // 3. Recent-actions block, newest first.
        if !inputs.actions.is_empty() {
            system.push_str("\n## Your recent actions (newest first)\n");
            for entry in inputs.actions.iter().take(self.recent_actions_limit) {
                system.push_str(&format!("- {}\n", action_line(entry)));
            }
        }

        // 4. Channel-activity block.
        if !inputs.channel_activity.is_empty() {
            system.push_str("\n## Recent channel activity\n");
            for line in inputs
                .channel_activity
                .iter()
                .take(self.channel_activity_limit)
            {
                system.push_str(&format!("- {line}\n"));
            }
        }

        // 5. Task block.
        if !inputs.task_title.is_empty() || !inputs.task_description.is_empty() {
            system.push_str(&format!(
                "\n## Current task: {}\n{}\n",
                inputs.task_title, inputs.task_description
            ));
        }

        // 6. Conversation turns.
        let mut messages = Vec::with_capacity(1 + inputs.turns.len());
        messages.push(ChatMessage::system(system));
        messages.extend(inputs.turns);
        messages
    }
}

/// One formatted action-log line.
///
/// Messaging and completion actions get dedicated formats; everything else
/// falls back to `<tool>: <description>`.
fn action_line(entry: &ActionEntry) -> String {
    match entry.tool.as_str() {
        "messaging_send" => {
            let target = entry
                .metadata
                .target_agent_id
                .as_deref()
                .unwrap_or("unknown");
            format!("messaging_send → {target}")
        }
        "task_complete" => format!("task_complete: {}", entry.description),
        "tools_recommend" => format!("tools_recommend: {}", entry.result),
        tool => format!("{tool}: {}", entry.description),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use mxf_memory::ActionEntry;
    use mxf_tools::{ToolDescriptor, ToolOrigin};
    use serde_json::json;

    use super::*;

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.into(),
            description: format!("{name} tool"),
            parameters: json!({"type": "object"}),
            origin: ToolOrigin::Internal,
            provider: None,
            idempotent: false,
        }
    }

    fn inputs() -> AssemblerInputs {
        AssemblerInputs {
            agent_id: "a1".into(),
            display_name: "Scout".into(),
            behavior_prompt: "You play tic-tac-toe.".into(),
            task_title: "Win the game".into(),
            task_description: "Place three in a row.".into(),
            turns: vec![ChatMessage::user("your move")],
            actions: vec![ActionEntry::new("game_getBoard", "fetched the board")],
            channel_activity: vec!["a2 moved at (0,0)".into()],
            tools: vec![descriptor("game_makeMove")],
        }
    }

    #[test]
    fn assembly_is_deterministic() {
        let asm = PromptAssembler::new();
        let a = asm.assemble(inputs());
        let b = asm.assemble(inputs());
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn blocks_appear_in_fixed_order() {
        let asm = PromptAssembler::new();
        let messages = asm.assemble(inputs());
        let system = messages[0].as_text().unwrap();
        let identity = system.find("You are agent").unwrap();
        let tools = system.find("## Available tools").unwrap();
        let actions = system.find("## Your recent actions").unwrap();
        let activity = system.find("## Recent channel activity").unwrap();
        let task = system.find("## Current task").unwrap();
        assert!(identity < tools && tools < actions && actions < activity && activity < task);
    }

    #[test]
    fn turns_follow_the_system_message() {
        let asm = PromptAssembler::new();
        let messages = asm.assemble(inputs());
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].as_text(), Some("your move"));
    }

    #[test]
    fn empty_blocks_are_omitted() {
        let asm = PromptAssembler::new();
        let messages = asm.assemble(AssemblerInputs {
            agent_id: "a1".into(),
            display_name: "a1".into(),
            ..Default::default()
        });
        let system = messages[0].as_text().unwrap();
        assert!(!system.contains("## Available tools"));
        assert!(!system.contains("## Your recent actions"));
        assert!(!system.contains("## Current task"));
    }

    #[test]
    fn action_limit_is_applied() {
        let asm = PromptAssembler::new().with_limits(2, 5);
        let mut i = inputs();
        i.actions = (0..10)
            .map(|n| ActionEntry::new("t", format!("action {n}")))
            .collect();
        let messages = asm.assemble(i);
        let system = messages[0].as_text().unwrap();
        assert!(system.contains("action 0"));
        assert!(system.contains("action 1"));
        assert!(!system.contains("action 2"));
    }

    #[test]
    fn action_line_formats() {
        let mut send = ActionEntry::new("messaging_send", "sent a note");
        send.metadata.target_agent_id = Some("a2".into());
        assert_eq!(action_line(&send), "messaging_send → a2");

        let complete = ActionEntry::new("task_complete", "finished the job");
        assert_eq!(action_line(&complete), "task_complete: finished the job");

        let mut rec = ActionEntry::new("tools_recommend", "ranked");
        rec.result = "game_makeMove, game_getBoard".into();
        assert_eq!(
            action_line(&rec),
            "tools_recommend: game_makeMove, game_getBoard"
        );

        let other = ActionEntry::new("game_getBoard", "fetched the board");
        assert_eq!(action_line(&other), "game_getBoard: fetched the board");
    }

    #[test]
    fn decorator_chain_rewrites_inputs() {
        let mut asm = PromptAssembler::new();
        asm.add_decorator(Box::new(|mut i: AssemblerInputs| {
            i.behavior_prompt = format!("{} Be concise.", i.behavior_prompt);
            i
        }));
        let messages = asm.assemble(inputs());
        assert!(messages[0].as_text().unwrap().contains("Be concise."));
    }

    #[test]
    fn no_decorators_is_identity_layout() {
        let plain = PromptAssembler::new().assemble(inputs());
        let empty_chain = {
            let asm = PromptAssembler::new();
            asm.assemble(inputs())
        };
        assert_eq!(
            serde_json::to_string(&plain).unwrap(),
            serde_json::to_string(&empty_chain).unwrap()
        );
    }
}
