//! Quorum dispatch of one routing request across several providers.
//!
//! Each selected model gets its own spawned task. The task owns the provider
//! call, the latency measurement and the statistics update, so every call
//! feeds the selector exactly once even when the coordinator has already
//! stopped listening. The coordinator only collects outcomes until the stop
//! condition fires, then signals cancellation through a `watch` channel.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::Instrument;

use super::selector::ModelSelector;
use crate::consensus::ConsensusEngine;
use crate::error::{Error, Result};
use crate::model::{ConsensusResult, Model, ModelKey, ModelResponse, RoutingRequest};
use crate::provider::{ProviderCall, ProviderClient, ProviderError};

/// Metadata key carrying a caller-supplied correlation id.
pub const REQUEST_ID_KEY: &str = "request_id";

/// Why the coordinator stopped collecting responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `max_responses` successful calls arrived.
    MaxResponses,
    /// Every dispatched call finished before the other conditions fired.
    AllCompleted,
    /// The request deadline elapsed.
    Timeout,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::MaxResponses => "max_responses",
            StopReason::AllCompleted => "all_completed",
            StopReason::Timeout => "timeout",
        }
    }
}

/// Result of one provider call as reported back to the coordinator.
struct CallOutcome {
    key: ModelKey,
    result: std::result::Result<ModelResponse, ProviderError>,
}

/// Top-level orchestrator: select, dispatch, await quorum, evaluate.
pub struct Router {
    selector: Arc<ModelSelector>,
    providers: HashMap<String, Arc<dyn ProviderClient>>,
    consensus: ConsensusEngine,
}

impl Router {
    /// Create a router over a shared model registry with no provider clients yet.
    pub fn new(selector: Arc<ModelSelector>) -> Self {
        Self {
            selector,
            providers: HashMap::new(),
            consensus: ConsensusEngine::new(),
        }
    }

    /// Add (or replace) the client for the provider it names.
    pub fn with_provider(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.providers.insert(client.name().to_string(), client);
        self
    }

    /// The registry this router selects from and reports into.
    pub fn selector(&self) -> &Arc<ModelSelector> {
        &self.selector
    }

    /// Names of providers with a configured client.
    pub fn provider_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Route one request end to end.
    ///
    /// Fails with [`Error::InvalidRequest`], [`Error::InsufficientModels`] or
    /// [`Error::UnknownModel`] before any provider is called, and with
    /// [`Error::QuorumNotMet`] when fewer than `min_responses` calls succeed
    /// before the deadline. Individual provider failures never surface on
    /// their own.
    pub async fn route(&self, request: RoutingRequest) -> Result<ConsensusResult> {
        request.validate()?;

        let request_id = request
            .metadata
            .get(REQUEST_ID_KEY)
            .cloned()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let span = tracing::info_span!("route", request_id = %request_id);

        self.route_inner(Arc::new(request), request_id)
            .instrument(span)
            .await
    }

    async fn route_inner(
        &self,
        request: Arc<RoutingRequest>,
        request_id: String,
    ) -> Result<ConsensusResult> {
        let selected = self.selector.select(&request)?;
        let deadline = Instant::now() + request.timeout;

        tracing::info!(
            models = selected.len(),
            strategy = %request.consensus_strategy,
            min_responses = request.min_responses,
            max_responses = request.max_responses,
            "dispatching request"
        );

        let (outcome_tx, mut outcome_rx) = mpsc::channel(selected.len().max(1));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut failures: Vec<String> = Vec::new();

        for model in selected {
            match self.providers.get(&model.key.provider) {
                Some(client) => self.spawn_call(
                    model,
                    Arc::clone(client),
                    Arc::clone(&request),
                    deadline,
                    outcome_tx.clone(),
                    cancel_rx.clone(),
                ),
                None => {
                    let err = ProviderError::NotConfigured(model.key.provider.clone());
                    tracing::warn!(model = %model.key, error = %err, "skipping model");
                    failures.push(format!("{}: {}", model.key, err));
                }
            }
        }
        // Only the spawned tasks hold senders now, so `recv` ends when they all do.
        drop(outcome_tx);

        let mut responses: Vec<ModelResponse> = Vec::new();
        let stop_reason = loop {
            if responses.len() >= request.max_responses {
                break StopReason::MaxResponses;
            }
            match tokio::time::timeout_at(deadline, outcome_rx.recv()).await {
                Ok(Some(outcome)) => record_outcome(outcome, &mut responses, &mut failures),
                Ok(None) => break StopReason::AllCompleted,
                Err(_) => {
                    // Outcomes already buffered finished inside the deadline.
                    while responses.len() < request.max_responses {
                        match outcome_rx.try_recv() {
                            Ok(outcome) => record_outcome(outcome, &mut responses, &mut failures),
                            Err(_) => break,
                        }
                    }
                    break StopReason::Timeout;
                }
            }
        };

        // Calls beyond a full quorum are interrupted and record nothing. Calls
        // still running at the deadline are left to finish so their stats
        // reflect what actually happened.
        if stop_reason == StopReason::MaxResponses {
            let _ = cancel_tx.send(true);
        }
        drop(outcome_rx);

        tracing::info!(
            stop_reason = stop_reason.as_str(),
            succeeded = responses.len(),
            failed = failures.len(),
            "stopped collecting responses"
        );

        if responses.len() < request.min_responses {
            tracing::warn!(
                required = request.min_responses,
                received = responses.len(),
                failures = ?failures,
                "quorum not met"
            );
            return Err(Error::QuorumNotMet {
                required: request.min_responses,
                received: responses.len(),
                failures,
            });
        }

        let mut result = self
            .consensus
            .evaluate(&responses, request.consensus_strategy);

        result
            .metadata
            .insert(REQUEST_ID_KEY.to_string(), json!(request_id));
        result
            .metadata
            .insert("stop_reason".to_string(), json!(stop_reason.as_str()));
        result
            .metadata
            .insert("failed_models".to_string(), json!(failures));
        if !request.metadata.is_empty() {
            result
                .metadata
                .insert("request_metadata".to_string(), json!(request.metadata));
        }

        Ok(result)
    }

    /// Spawn one provider call.
    ///
    /// The task runs the call until it completes, the coordinator signals
    /// cancellation, or a grace period of one more request timeout past the
    /// deadline runs out. Completed and abandoned calls update the selector
    /// once with the observed latency and outcome, then report back; the
    /// report is dropped silently if the coordinator has already moved on.
    /// Cancelled calls never completed and leave the stats untouched.
    fn spawn_call(
        &self,
        model: Model,
        client: Arc<dyn ProviderClient>,
        request: Arc<RoutingRequest>,
        deadline: Instant,
        outcome_tx: mpsc::Sender<CallOutcome>,
        mut cancel_rx: watch::Receiver<bool>,
    ) {
        let selector = Arc::clone(&self.selector);

        tokio::spawn(
            async move {
                let started = Instant::now();
                let call = ProviderCall {
                    prompt: &request.prompt,
                    model_id: &model.key.model_id,
                    context: &request.context,
                    timeout: deadline.saturating_duration_since(started),
                };

                let abandon_at = deadline + request.timeout;

                let result = tokio::select! {
                    outcome = tokio::time::timeout_at(abandon_at, client.generate(call)) => {
                        outcome.unwrap_or_else(|_| {
                            Err(ProviderError::Timeout(abandon_at.saturating_duration_since(started)))
                        })
                    }
                    // A dropped sender disables this branch; only an explicit cancel interrupts.
                    Ok(_) = cancel_rx.wait_for(|cancelled| *cancelled) => {
                        tracing::debug!(model = %model.key, "provider call cancelled after quorum");
                        return;
                    }
                };
                let latency = started.elapsed();

                selector.update_performance(&model.key, latency, result.is_ok());

                let result = result.map(|generation| ModelResponse {
                    model: model.key.clone(),
                    confidence: generation.resolved_confidence(),
                    text: generation.text,
                    latency,
                    tokens_used: generation.tokens_used,
                    cost: generation.cost,
                    weight: model.weight,
                });

                match &result {
                    Ok(_) => tracing::debug!(
                        model = %model.key,
                        latency_ms = latency.as_millis() as u64,
                        "provider call succeeded"
                    ),
                    Err(e) => tracing::warn!(
                        model = %model.key,
                        latency_ms = latency.as_millis() as u64,
                        error = %e,
                        "provider call failed"
                    ),
                }

                let outcome = CallOutcome {
                    key: model.key,
                    result,
                };
                if outcome_tx.send(outcome).await.is_err() {
                    tracing::debug!("discarding outcome that arrived after quorum decision");
                }
            }
            .in_current_span(),
        );
    }
}

fn record_outcome(
    outcome: CallOutcome,
    responses: &mut Vec<ModelResponse>,
    failures: &mut Vec<String>,
) {
    match outcome.result {
        Ok(response) => responses.push(response),
        Err(e) => failures.push(format!("{}: {}", outcome.key, e)),
    }
}
