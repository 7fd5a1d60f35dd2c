// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The user-input request/response bridge.
//!
//! One backing table serves both modes. Blocking mode parks the caller on a
//! oneshot until the request reaches a terminal state; async mode returns
//! the request id immediately and the agent polls. Deadlines come from one
//! monotonic clock ([`tokio::time::Instant`]) and each request times out at
//! most once. On shutdown every open request drains as cancelled.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use mxf_tools::{UserInputOutcome, UserInputSpec, UserInputStatus};

use crate::HubError;

struct RequestEntry {
    agent_id: String,
    status: UserInputStatus,
    value: Option<serde_json::Value>,
    /// Parked blocking caller, if any.
    waiter: Option<oneshot::Sender<UserInputOutcome>>,
    /// Async-mode deadline, checked lazily against the monotonic clock.
    deadline: Option<Instant>,
}

impl RequestEntry {
    fn outcome(&self, request_id: &str) -> UserInputOutcome {
        UserInputOutcome {
            request_id: request_id.to_string(),
            status: self.status,
            value: self.value.clone(),
        }
    }
}

/// Request table shared by the blocking and async user-input tools.
#[derive(Default)]
pub struct UserInputBridge {
    requests: Mutex<HashMap<String, RequestEntry>>,
}

impl UserInputBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an async-mode request. Returns the generated request id.
    pub fn open(&self, agent_id: &str, spec: &UserInputSpec) -> String {
        let request_id = format!("uir_{}", Uuid::new_v4().simple());
        let deadline = spec
            .timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        self.requests.lock().unwrap().insert(
            request_id.clone(),
            RequestEntry {
                agent_id: agent_id.to_string(),
                status: UserInputStatus::Pending,
                value: None,
                waiter: None,
                deadline,
            },
        );
        debug!(agent = agent_id, request = %request_id, "user input request opened");
        request_id
    }

    /// First half of a blocking request: insert the entry and return the id
    /// plus the parked receiver. Lets the caller announce the request on the
    /// event bus before waiting.
    pub fn prepare_blocking(&self, agent_id: &str) -> (String, oneshot::Receiver<UserInputOutcome>) {
        let request_id = format!("uir_{}", Uuid::new_v4().simple());
        let (tx, rx) = oneshot::channel();
        self.requests.lock().unwrap().insert(
            request_id.clone(),
            RequestEntry {
                agent_id: agent_id.to_string(),
                status: UserInputStatus::Pending,
                value: None,
                waiter: Some(tx),
                deadline: None,
            },
        );
        debug!(agent = agent_id, request = %request_id, "blocking user input request opened");
        (request_id, rx)
    }

    /// Second half of a blocking request: wait for the terminal outcome.
    /// A timeout converts the wait into a `timed_out` outcome; it never errors.
    pub async fn wait_blocking(
        &self,
        request_id: &str,
        rx: oneshot::Receiver<UserInputOutcome>,
        timeout_ms: Option<u64>,
    ) -> UserInputOutcome {
        let outcome = match timeout_ms {
            None => rx.await.ok(),
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), rx).await {
                Ok(result) => result.ok(),
                Err(_) => {
                    // The single timeout firing for this request.
                    let _ = self.transition(request_id, UserInputStatus::TimedOut, None);
                    None
                }
            },
        };

        outcome.unwrap_or_else(|| {
            self.requests
                .lock()
                .unwrap()
                .get(request_id)
                .map(|e| e.outcome(request_id))
                .unwrap_or(UserInputOutcome {
                    request_id: request_id.to_string(),
                    status: UserInputStatus::Cancelled,
                    value: None,
                })
        })
    }

    /// Convenience wrapper over [`Self::prepare_blocking`] +
    /// [`Self::wait_blocking`].
    pub async fn open_blocking(
        &self,
        agent_id: &str,
        spec: &UserInputSpec,
    ) -> (String, UserInputOutcome) {
        let (request_id, rx) = self.prepare_blocking(agent_id);
        let outcome = self.wait_blocking(&request_id, rx, spec.timeout_ms).await;
        (request_id, outcome)
    }

    /// Deliver the human's answer. A response to an already-terminal request
    /// is ignored.
    pub fn respond(&self, request_id: &str, value: serde_json::Value) -> Result<(), HubError> {
        self.transition(request_id, UserInputStatus::Responded, Some(value))
    }

    /// Cancel one request (agent disconnect, task cancel, explicit call).
    pub fn cancel(&self, request_id: &str) -> Result<(), HubError> {
        self.transition(request_id, UserInputStatus::Cancelled, None)
    }

    /// Cancel every open request of one agent.
    pub fn cancel_for_agent(&self, agent_id: &str) {
        let ids: Vec<String> = {
            let requests = self.requests.lock().unwrap();
            requests
                .iter()
                .filter(|(_, e)| e.agent_id == agent_id && e.status == UserInputStatus::Pending)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in ids {
            let _ = self.cancel(&id);
        }
    }

    /// Drain every open request as cancelled (process shutdown/restart).
    pub fn drain_all(&self) {
        let ids: Vec<String> = {
            let requests = self.requests.lock().unwrap();
            requests
                .iter()
                .filter(|(_, e)| e.status == UserInputStatus::Pending)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in ids {
            let _ = self.cancel(&id);
        }
    }

    /// Poll an async-mode request. Applies the lazy deadline check, so an
    /// expired request reports `timed_out` exactly once and stays terminal.
    pub fn poll(&self, request_id: &str) -> Result<UserInputOutcome, HubError> {
        let mut requests = self.requests.lock().unwrap();
        let entry = requests
            .get_mut(request_id)
            .ok_or_else(|| HubError::RequestNotFound(request_id.to_string()))?;

        if entry.status == UserInputStatus::Pending {
            if let Some(deadline) = entry.deadline {
                if Instant::now() >= deadline {
                    entry.status = UserInputStatus::TimedOut;
                    entry.deadline = None;
                }
            }
        }
        Ok(entry.outcome(request_id))
    }

    /// The agent a request belongs to, for event attribution.
    pub fn agent_of(&self, request_id: &str) -> Option<String> {
        self.requests
            .lock()
            .unwrap()
            .get(request_id)
            .map(|e| e.agent_id.clone())
    }

    pub fn open_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.status == UserInputStatus::Pending)
            .count()
    }

    fn transition(
        &self,
        request_id: &str,
        status: UserInputStatus,
        value: Option<serde_json::Value>,
    ) -> Result<(), HubError> {
        let mut requests = self.requests.lock().unwrap();
        let entry = requests
            .get_mut(request_id)
            .ok_or_else(|| HubError::RequestNotFound(request_id.to_string()))?;
        if entry.status != UserInputStatus::Pending {
            // Terminal states are final; late responses are dropped.
            return Ok(());
        }
        entry.status = status;
        entry.value = value;
        entry.deadline = None;
        if let Some(waiter) = entry.waiter.take() {
            let _ = waiter.send(entry.outcome(request_id));
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use mxf_tools::InputType;

    use super::*;

    fn spec(timeout_ms: Option<u64>) -> UserInputSpec {
        UserInputSpec {
            input_type: InputType::Text,
            prompt: "?".into(),
            options: vec![],
            urgency: Default::default(),
            theme: None,
            timeout_ms,
        }
    }

    #[tokio::test]
    async fn async_open_then_respond_then_poll() {
        let bridge = UserInputBridge::new();
        let id = bridge.open("a1", &spec(None));

        let pending = bridge.poll(&id).unwrap();
        assert_eq!(pending.status, UserInputStatus::Pending);

        bridge.respond(&id, serde_json::json!("blue")).unwrap();
        let done = bridge.poll(&id).unwrap();
        assert_eq!(done.status, UserInputStatus::Responded);
        assert_eq!(done.value, Some(serde_json::json!("blue")));
    }

    #[tokio::test]
    async fn blocking_resolves_on_response() {
        let bridge = std::sync::Arc::new(UserInputBridge::new());
        let responder = std::sync::Arc::clone(&bridge);
        tokio::spawn(async move {
            // Wait until the request shows up, then answer it.
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let ids: Vec<String> = {
                    let requests = responder.requests.lock().unwrap();
                    requests.keys().cloned().collect()
                };
                if let Some(id) = ids.first() {
                    responder.respond(id, serde_json::json!(42)).unwrap();
                    break;
                }
            }
        });

        let (_, outcome) = bridge.open_blocking("a1", &spec(None)).await;
        assert_eq!(outcome.status, UserInputStatus::Responded);
        assert_eq!(outcome.value, Some(serde_json::json!(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_times_out() {
        let bridge = UserInputBridge::new();
        let (id, outcome) = bridge.open_blocking("a1", &spec(Some(1000))).await;
        assert_eq!(outcome.status, UserInputStatus::TimedOut);
        // The stored state is terminal too.
        assert_eq!(bridge.poll(&id).unwrap().status, UserInputStatus::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn async_deadline_is_applied_on_poll() {
        let bridge = UserInputBridge::new();
        let id = bridge.open("a1", &spec(Some(500)));
        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(bridge.poll(&id).unwrap().status, UserInputStatus::TimedOut);
        // A late response is dropped.
        bridge.respond(&id, serde_json::json!("late")).unwrap();
        assert_eq!(bridge.poll(&id).unwrap().status, UserInputStatus::TimedOut);
    }

    #[tokio::test]
    async fn cancel_for_agent_only_touches_that_agent() {
        let bridge = UserInputBridge::new();
        let id1 = bridge.open("a1", &spec(None));
        let id2 = bridge.open("a2", &spec(None));
        bridge.cancel_for_agent("a1");
        assert_eq!(bridge.poll(&id1).unwrap().status, UserInputStatus::Cancelled);
        assert_eq!(bridge.poll(&id2).unwrap().status, UserInputStatus::Pending);
    }

    #[tokio::test]
    async fn drain_all_cancels_every_open_request() {
        let bridge = UserInputBridge::new();
        let id1 = bridge.open("a1", &spec(None));
        let id2 = bridge.open("a2", &spec(None));
        bridge.drain_all();
        assert_eq!(bridge.poll(&id1).unwrap().status, UserInputStatus::Cancelled);
        assert_eq!(bridge.poll(&id2).unwrap().status, UserInputStatus::Cancelled);
        assert_eq!(bridge.open_count(), 0);
    }

    #[tokio::test]
    async fn poll_unknown_request_is_an_error() {
        let bridge = UserInputBridge::new();
        assert!(matches!(
            bridge.poll("uir_missing"),
            Err(HubError::RequestNotFound(_))
        ));
    }

    #[tokio::test]
    async fn responded_state_is_final() {
        let bridge = UserInputBridge::new();
        let id = bridge.open("a1", &spec(None));
        bridge.respond(&id, serde_json::json!(1)).unwrap();
        bridge.cancel(&id).unwrap();
        assert_eq!(bridge.poll(&id).unwrap().status, UserInputStatus::Responded);
    }
}
