// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The persistence contract: a key-value store with per-key atomicity and
//! prefix listing. Channels, agents, tasks, key credentials, and truncated
//! action logs are persisted through this seam; nothing in the runtime
//! assumes transactions across keys.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::HubError;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), HubError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, HubError>;
    async fn delete(&self, key: &str) -> Result<(), HubError>;
    /// Keys starting with `prefix`, in lexicographic order.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, HubError>;
}

/// JSON helpers over the raw byte contract.
pub async fn put_json<T: Serialize>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
) -> Result<(), HubError> {
    let bytes = serde_json::to_vec(value).map_err(|e| HubError::Store(e.to_string()))?;
    store.put(key, bytes).await
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, HubError> {
    match store.get(key).await? {
        None => Ok(None),
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| HubError::Store(e.to_string())),
    }
}

/// In-memory store. The default for tests and single-node deployments
/// without durability requirements.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), HubError> {
        self.data.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, HubError> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), HubError> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, HubError> {
        let data = self.data.lock().unwrap();
        Ok(data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
