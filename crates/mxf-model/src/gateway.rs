// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The queued, provider-agnostic LLM gateway.
//!
//! One logical FIFO queue exists per registered provider; a fixed pool of
//! workers (default 4) drains it, so at most `concurrency` requests are in
//! flight against any endpoint. Callers enqueue with
//! [`LlmGateway::complete`] and await the normalized [`ParsedResponse`].
//!
//! # Failure semantics
//!
//! Transient failures (5xx, connection reset, rate limit) are retried with
//! exponential backoff (500 ms base, doubling, 3 retries). Non-transient
//! failures surface immediately. A cancellation token is honored at every
//! await point: while the job is queued, between retries, and mid-flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{parse_response, CompletionRequest, LlmError, ModelProvider, ParsedResponse};

const RETRY_BASE: Duration = Duration::from_millis(500);
const MAX_RETRIES: u32 = 3;

/// One enqueued completion call.
pub struct GatewayRequest {
    pub agent_id: String,
    pub request: CompletionRequest,
    /// Cancelling this token aborts the call at the next await point and
    /// surfaces [`LlmError::Cancelled`] to the caller.
    pub cancel: CancellationToken,
}

struct Job {
    agent_id: String,
    request: CompletionRequest,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<ParsedResponse, LlmError>>,
}

struct ProviderQueue {
    tx: mpsc::Sender<Job>,
}

/// Queued, rate-limited access to all configured model providers.
pub struct LlmGateway {
    queues: HashMap<String, ProviderQueue>,
}

impl LlmGateway {
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
        }
    }

    /// Register a provider under `name` with a worker pool of `concurrency`
    /// and a whole-call timeout. Jobs are picked up in enqueue order.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        provider: Arc<dyn ModelProvider>,
        concurrency: usize,
        call_timeout: Duration,
    ) {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Job>(256);
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..concurrency.max(1) {
            let rx = Arc::clone(&rx);
            let provider = Arc::clone(&provider);
            let queue_name = name.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let Some(job) = job else { break };
                    debug!(provider = %queue_name, worker, agent = %job.agent_id, "llm call start");
                    let result = run_job(provider.as_ref(), &job, call_timeout).await;
                    let _ = job.reply.send(result);
                }
            });
        }

        self.queues.insert(name, ProviderQueue { tx });
    }

    /// Enqueue a completion against `provider` and await the parsed result.
    pub async fn complete(
        &self,
        provider: &str,
        req: GatewayRequest,
    ) -> Result<ParsedResponse, LlmError> {
        let queue = self
            .queues
            .get(provider)
            .ok_or_else(|| LlmError::UnknownProvider(provider.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            agent_id: req.agent_id,
            request: req.request,
            cancel: req.cancel,
            reply: reply_tx,
        };
        queue
            .tx
            .send(job)
            .await
            .map_err(|_| LlmError::Unreachable("gateway queue closed".into()))?;

        reply_rx
            .await
            .map_err(|_| LlmError::Unreachable("gateway worker dropped the job".into()))?
    }

    pub fn has_provider(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }
}

impl Default for LlmGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Execute one job with retry, timeout, and cancellation.
async fn run_job(
    provider: &dyn ModelProvider,
    job: &Job,
    call_timeout: Duration,
) -> Result<ParsedResponse, LlmError> {
    // The job may have been cancelled while sitting in the queue.
    if job.cancel.is_cancelled() {
        return Err(LlmError::Cancelled);
    }

    let mut attempt = 0u32;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = job.cancel.cancelled() => return Err(LlmError::Cancelled),
            res = tokio::time::timeout(call_timeout, provider.complete(job.request.clone())) => {
                match res {
                    Ok(inner) => inner,
                    Err(_) => Err(LlmError::Timeout),
                }
            }
        };

        match outcome {
            Ok(completion) => return Ok(parse_response(completion)),
            Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                let delay = RETRY_BASE * 2u32.pow(attempt);
                attempt += 1;
                warn!(
                    provider = provider.name(),
                    agent = %job.agent_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient llm failure, retrying: {e}"
                );
                tokio::select! {
                    biased;
                    _ = job.cancel.cancelled() => return Err(LlmError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{Completion, ScriptedProvider};

    fn request(cancel: CancellationToken) -> GatewayRequest {
        GatewayRequest {
            agent_id: "a1".into(),
            request: CompletionRequest::default(),
            cancel,
        }
    }

    fn gateway_with(provider: Arc<dyn ModelProvider>) -> LlmGateway {
        let mut gw = LlmGateway::new();
        gw.register("test", provider, 4, Duration::from_secs(5));
        gw
    }

    #[tokio::test]
    async fn unknown_provider_is_an_error() {
        let gw = LlmGateway::new();
        let err = gw
            .complete("nope", request(CancellationToken::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn scripted_text_reply_round_trips() {
        let gw = gateway_with(Arc::new(ScriptedProvider::always_text("hello")));
        let parsed = gw
            .complete("test", request(CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(parsed.text.as_deref(), Some("hello"));
    }

    /// A provider that fails transiently `failures` times, then succeeds.
    struct FlakyProvider {
        failures: AtomicU32,
    }

    #[async_trait]
    impl ModelProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn complete(&self, _req: CompletionRequest) -> Result<Completion, LlmError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(LlmError::Provider {
                    status: 503,
                    message: "overloaded".into(),
                    retryable: true,
                });
            }
            Ok(Completion {
                text: Some("recovered".into()),
                ..Default::default()
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let gw = gateway_with(Arc::new(FlakyProvider {
            failures: AtomicU32::new(2),
        }));
        let parsed = gw
            .complete("test", request(CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(parsed.text.as_deref(), Some("recovered"));
    }

    /// A provider that fails non-transiently.
    struct RejectingProvider;

    #[async_trait]
    impl ModelProvider for RejectingProvider {
        fn name(&self) -> &str {
            "rejecting"
        }
        async fn complete(&self, _req: CompletionRequest) -> Result<Completion, LlmError> {
            Err(LlmError::Provider {
                status: 401,
                message: "bad key".into(),
                retryable: false,
            })
        }
    }

    #[tokio::test]
    async fn non_transient_failure_surfaces_immediately() {
        let gw = gateway_with(Arc::new(RejectingProvider));
        let err = gw
            .complete("test", request(CancellationToken::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Provider { status: 401, .. }));
    }

    /// A provider that never resolves, to exercise cancellation.
    struct HangingProvider;

    #[async_trait]
    impl ModelProvider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }
        async fn complete(&self, _req: CompletionRequest) -> Result<Completion, LlmError> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    #[tokio::test]
    async fn cancellation_aborts_inflight_call() {
        let gw = gateway_with(Arc::new(HangingProvider));
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = tokio::time::timeout(
            Duration::from_secs(1),
            gw.complete("test", request(cancel)),
        )
        .await
        .expect("cancellation must resolve the call quickly")
        .unwrap_err();
        assert!(matches!(err, LlmError::Cancelled));
    }

    #[tokio::test]
    async fn pre_cancelled_request_never_reaches_provider() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let gw = gateway_with(Arc::new(HangingProvider));
        let err = gw.complete("test", request(cancel)).await.unwrap_err();
        assert!(matches!(err, LlmError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out_and_retries_until_exhausted() {
        let mut gw = LlmGateway::new();
        gw.register(
            "test",
            Arc::new(HangingProvider),
            1,
            Duration::from_millis(100),
        );
        let err = gw
            .complete("test", request(CancellationToken::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout));
    }
}
