// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod admin;
mod channel;
mod error;
mod events;
mod hub;
mod keys;
mod runtime;
mod store;
mod task;
mod userinput;

pub use admin::AdminSurface;
pub use channel::{AgentRecord, ChannelRecord, ChannelSpec, ConnectionState};
pub use error::HubError;
pub use events::{ChannelEvent, EventPayload};
pub use hub::ChannelHub;
pub use keys::{IssuedKey, KeyRecord, KeyStore};
pub use runtime::AgentWorker;
pub use store::{KvStore, MemoryStore};
pub use task::{
    AssignmentScope, AssignmentStrategy, CoordinationMode, Priority, TaskRecord, TaskSpec,
    TaskStatus,
};
pub use userinput::UserInputBridge;
