// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Channel key credentials.
//!
//! A key is `(key_id, secret)`. The raw secret is returned exactly once at
//! issuance; only its SHA-256 digest is stored, and verification compares
//! digests in constant time. Keys authenticate agent connection
//! establishment and persist until revoked.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::HubError;

/// Returned to the admin at issuance. The `secret` field is the only copy
/// of the raw secret that will ever exist.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub key_id: String,
    pub secret: String,
}

/// Stored form of a key — digest only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key_id: String,
    pub channel_id: String,
    #[serde(with = "hex_bytes")]
    secret_hash: [u8; 32],
    pub created_at: DateTime<Utc>,
    pub revoked: bool,
}

impl KeyRecord {
    /// Constant-time secret check.
    pub fn verify(&self, secret: &str) -> bool {
        if self.revoked {
            return false;
        }
        let provided: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
        bool::from(provided.ct_eq(&self.secret_hash))
    }
}

/// In-memory key table.
#[derive(Default)]
pub struct KeyStore {
    keys: Mutex<HashMap<String, KeyRecord>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a key for a channel. The raw secret is 43 chars of base64url
    /// over 256 random bits.
    pub fn issue(&self, channel_id: &str) -> IssuedKey {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let secret = base64url(&bytes);

        let key_id = format!("key_{}", Uuid::new_v4().simple());
        let record = KeyRecord {
            key_id: key_id.clone(),
            channel_id: channel_id.to_string(),
            secret_hash: Sha256::digest(secret.as_bytes()).into(),
            created_at: Utc::now(),
            revoked: false,
        };
        self.keys.lock().unwrap().insert(key_id.clone(), record);
        IssuedKey { key_id, secret }
    }

    /// Authenticate a connection attempt.
    pub fn verify(&self, channel_id: &str, key_id: &str, secret: &str) -> Result<(), HubError> {
        let keys = self.keys.lock().unwrap();
        let record = keys.get(key_id).ok_or(HubError::AuthFailed)?;
        if record.channel_id != channel_id || !record.verify(secret) {
            return Err(HubError::AuthFailed);
        }
        Ok(())
    }

    pub fn revoke(&self, key_id: &str) -> Result<(), HubError> {
        let mut keys = self.keys.lock().unwrap();
        let record = keys
            .get_mut(key_id)
            .ok_or_else(|| HubError::KeyNotFound(key_id.to_string()))?;
        record.revoked = true;
        Ok(())
    }

    /// Key records for a channel (digests only, safe to list).
    pub fn list(&self, channel_id: &str) -> Vec<KeyRecord> {
        let keys = self.keys.lock().unwrap();
        let mut out: Vec<KeyRecord> = keys
            .values()
            .filter(|k| k.channel_id == channel_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Drop every key of a deleted channel.
    pub fn purge_channel(&self, channel_id: &str) {
        self.keys
            .lock()
            .unwrap()
            .retain(|_, k| k.channel_id != channel_id);
    }
}

fn base64url(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Serde helper: `[u8; 32]` as a lowercase hex string.
mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("expected 32-byte hex"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
