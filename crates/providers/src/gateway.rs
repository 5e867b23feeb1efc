//! Provider gateway: tiered fallback with sequential and racing walks.
//!
//! A call walks the primary pool, then the fallback pool. Within a pool the
//! gateway either tries providers one at a time in list order, or races all
//! of them and adopts the first success. Every attempt is wrapped in the
//! per-call timeout; a timeout is just another provider failure.

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vanillaclaw_core::error::FailedAttempt;
use vanillaclaw_core::{
    ChatRequest, ChatResponse, Provider, ProviderError, ProviderExhausted, ProviderTier,
    StrategyMode, Usage,
};

use crate::group::{Pool, ProviderGroup, all_paid};

/// How a single pool is walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Walk {
    Sequential,
    Race,
}

/// How one provider attempt ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "cause", rename_all = "lowercase")]
pub enum AttemptOutcome {
    Succeeded,
    Failed(ProviderError),
    /// Lost a race; the in-flight request was dropped.
    Abandoned,
}

/// One entry of the provider call history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider_id: String,
    pub tier: ProviderTier,
    pub pool: Pool,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
}

impl ProviderAttempt {
    pub fn failed(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Failed(_))
    }
}

impl From<FailedAttempt> for ProviderAttempt {
    fn from(attempt: FailedAttempt) -> Self {
        Self {
            provider_id: attempt.provider_id,
            tier: attempt.tier,
            pool: attempt.pool,
            outcome: AttemptOutcome::Failed(attempt.cause),
            latency_ms: attempt.latency_ms,
        }
    }
}

/// A successful gateway call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResult {
    /// Raw model text
    pub content: String,
    pub usage: Option<Usage>,
    /// Provider whose response was adopted
    pub provider_id: String,
    pub tier: ProviderTier,
    pub latency_ms: u64,
    /// Every attempt made for this call, in settlement order
    pub attempts: Vec<ProviderAttempt>,
}

struct Settled {
    response: ChatResponse,
    provider_id: String,
    tier: ProviderTier,
    latency_ms: u64,
}

/// Routes a chat request across a [`ProviderGroup`].
#[derive(Debug, Clone)]
pub struct ProviderGateway {
    call_timeout: Duration,
    racing_enabled: bool,
}

impl ProviderGateway {
    /// Create a gateway with the given per-call timeout. Racing is enabled.
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            call_timeout,
            racing_enabled: true,
        }
    }

    /// Allow or forbid racing paid pools under [`StrategyMode::Smart`].
    pub fn with_racing(mut self, enabled: bool) -> Self {
        self.racing_enabled = enabled;
        self
    }

    /// Decide how a pool is walked.
    ///
    /// Free or mixed pools are never raced under `Smart`, so quota is only
    /// spent on one provider at a time. Once a raced primary pool has failed
    /// the fallback pool is always walked sequentially.
    pub fn walk_for(
        &self,
        pool: Pool,
        providers: &[Arc<dyn Provider>],
        mode: StrategyMode,
        primary_raced: bool,
    ) -> Walk {
        if providers.len() < 2 {
            return Walk::Sequential;
        }
        match (mode, pool) {
            (_, Pool::Fallback) if primary_raced => Walk::Sequential,
            (StrategyMode::Sequential, _) => Walk::Sequential,
            (StrategyMode::Racing, Pool::Primary) => Walk::Race,
            (StrategyMode::Racing, Pool::Fallback) => Walk::Sequential,
            (StrategyMode::Smart, _) if self.racing_enabled && all_paid(providers) => Walk::Race,
            (StrategyMode::Smart, _) => Walk::Sequential,
        }
    }

    /// Send `request` to the group, primary pool first.
    pub async fn call(
        &self,
        request: &ChatRequest,
        group: &ProviderGroup,
        mode: StrategyMode,
    ) -> Result<ChatResult, ProviderExhausted> {
        let mut attempts = Vec::new();
        let mut primary_raced = false;

        for (pool, providers) in group.pools() {
            if providers.is_empty() {
                continue;
            }

            let walk = self.walk_for(pool, providers, mode, primary_raced);
            info!(
                pool = %pool,
                walk = ?walk,
                providers = providers.len(),
                "Gateway: walking pool"
            );

            let settled = match walk {
                Walk::Sequential => {
                    self.call_sequential(request, pool, providers, &mut attempts)
                        .await
                }
                Walk::Race => {
                    primary_raced = pool == Pool::Primary;
                    self.call_racing(request, pool, providers, &mut attempts).await
                }
            };

            if let Some(settled) = settled {
                return Ok(ChatResult {
                    content: settled.response.content,
                    usage: settled.response.usage,
                    provider_id: settled.provider_id,
                    tier: settled.tier,
                    latency_ms: settled.latency_ms,
                    attempts,
                });
            }

            warn!(pool = %pool, "Gateway: every provider in pool failed");
        }

        let failed = attempts
            .into_iter()
            .filter_map(|a| match a.outcome {
                AttemptOutcome::Failed(cause) => Some(FailedAttempt {
                    provider_id: a.provider_id,
                    tier: a.tier,
                    pool: a.pool,
                    cause,
                    latency_ms: a.latency_ms,
                }),
                _ => None,
            })
            .collect();
        Err(ProviderExhausted { attempts: failed })
    }

    async fn call_sequential(
        &self,
        request: &ChatRequest,
        pool: Pool,
        providers: &[Arc<dyn Provider>],
        attempts: &mut Vec<ProviderAttempt>,
    ) -> Option<Settled> {
        for (i, provider) in providers.iter().enumerate() {
            info!(
                provider = %provider.id(),
                attempt = i + 1,
                total = providers.len(),
                "Gateway: trying provider"
            );

            let started = Instant::now();
            let result = self.attempt(provider, request.clone()).await;
            let latency_ms = elapsed_ms(started);

            match result {
                Ok(response) => {
                    attempts.push(record(provider, pool, AttemptOutcome::Succeeded, latency_ms));
                    return Some(Settled {
                        response,
                        provider_id: provider.id().to_string(),
                        tier: provider.tier(),
                        latency_ms,
                    });
                }
                Err(e) => {
                    warn!(
                        provider = %provider.id(),
                        error = %e,
                        "Gateway: provider failed, trying next"
                    );
                    attempts.push(record(provider, pool, AttemptOutcome::Failed(e), latency_ms));
                }
            }
        }
        None
    }

    async fn call_racing(
        &self,
        request: &ChatRequest,
        pool: Pool,
        providers: &[Arc<dyn Provider>],
        attempts: &mut Vec<ProviderAttempt>,
    ) -> Option<Settled> {
        let started = Instant::now();
        let mut racers: FuturesUnordered<_> = providers
            .iter()
            .enumerate()
            .map(|(i, provider)| {
                let request = request.clone();
                async move { (i, self.attempt(provider, request).await) }
            })
            .collect();
        let mut settled = vec![false; providers.len()];

        while let Some((i, result)) = racers.next().await {
            settled[i] = true;
            let provider = &providers[i];
            let latency_ms = elapsed_ms(started);

            match result {
                Ok(response) => {
                    info!(
                        provider = %provider.id(),
                        latency_ms,
                        "Gateway: race won"
                    );
                    attempts.push(record(provider, pool, AttemptOutcome::Succeeded, latency_ms));
                    for (j, loser) in providers.iter().enumerate() {
                        if !settled[j] {
                            debug!(provider = %loser.id(), "Gateway: abandoning racer");
                            attempts.push(record(loser, pool, AttemptOutcome::Abandoned, latency_ms));
                        }
                    }
                    // Dropping `racers` cancels the outstanding requests.
                    return Some(Settled {
                        response,
                        provider_id: provider.id().to_string(),
                        tier: provider.tier(),
                        latency_ms,
                    });
                }
                Err(e) => {
                    warn!(provider = %provider.id(), error = %e, "Gateway: racer failed");
                    attempts.push(record(provider, pool, AttemptOutcome::Failed(e), latency_ms));
                }
            }
        }
        None
    }

    async fn attempt(
        &self,
        provider: &Arc<dyn Provider>,
        request: ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        match tokio::time::timeout(self.call_timeout, provider.chat(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "Provider '{}' timed out after {}ms",
                provider.id(),
                self.call_timeout.as_millis()
            ))),
        }
    }
}

fn record(
    provider: &Arc<dyn Provider>,
    pool: Pool,
    outcome: AttemptOutcome,
    latency_ms: u64,
) -> ProviderAttempt {
    ProviderAttempt {
        provider_id: provider.id().to_string(),
        tier: provider.tier(),
        pool,
        outcome,
        latency_ms,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
