//! Model registry and participant selection.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::{Model, ModelKey, RoutingRequest};

/// Default ε added to latency and cost in the composite score.
pub const DEFAULT_SCORE_EPSILON: f64 = 1e-3;

/// Weight of the newest observation in the moving averages.
const SMOOTHING: f64 = 0.1;

/// One registry slot. Stats live behind their own mutex so updates to
/// different keys never contend beyond a shared shard read.
struct RegisteredModel {
    /// Registration order, kept across re-registration.
    seq: u64,
    stats: Mutex<Model>,
}

impl RegisteredModel {
    fn snapshot(&self) -> Model {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Registry of known models with live performance statistics.
///
/// Created once by the composition root and shared by reference (usually
/// behind an `Arc`) with every router that needs it.
pub struct ModelSelector {
    models: DashMap<ModelKey, RegisteredModel>,
    next_seq: AtomicU64,
    epsilon: f64,
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelSelector {
    /// Create an empty registry with the default score ε.
    pub fn new() -> Self {
        Self::with_epsilon(DEFAULT_SCORE_EPSILON)
    }

    /// Create an empty registry with a custom score ε.
    pub fn with_epsilon(epsilon: f64) -> Self {
        Self {
            models: DashMap::new(),
            next_seq: AtomicU64::new(0),
            epsilon,
        }
    }

    /// Insert a model, or replace the stats of an existing one with the same key.
    ///
    /// Replacement keeps the model's original registration position.
    pub fn register(&self, model: Model) {
        match self.models.entry(model.key.clone()) {
            Entry::Occupied(existing) => {
                tracing::debug!(model = %model.key, "re-registering model");
                *existing
                    .get()
                    .stats
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = model;
            }
            Entry::Vacant(slot) => {
                tracing::debug!(model = %model.key, weight = model.weight, "registering model");
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                slot.insert(RegisteredModel {
                    seq,
                    stats: Mutex::new(model),
                });
            }
        }
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Snapshot of a single model.
    pub fn get(&self, key: &ModelKey) -> Option<Model> {
        self.models.get(key).map(|entry| entry.value().snapshot())
    }

    /// Read-only snapshot of every model, in registration order.
    pub fn list_models(&self) -> Vec<Model> {
        let mut models: Vec<(u64, Model)> = self
            .models
            .iter()
            .map(|entry| (entry.value().seq, entry.value().snapshot()))
            .collect();
        models.sort_by_key(|(seq, _)| *seq);
        models.into_iter().map(|(_, model)| model).collect()
    }

    /// Composite ranking score: `weight × success_rate / (latency + ε) / (cost + ε)`.
    pub fn composite_score(&self, model: &Model) -> f64 {
        model.weight * model.success_rate
            / (model.avg_latency + self.epsilon)
            / (model.cost_per_unit + self.epsilon)
    }

    /// Choose the models that participate in `request`.
    ///
    /// Explicit model lists are authoritative (duplicates collapse, no cap).
    /// Otherwise the top `max_responses` models by composite score are taken,
    /// ties going to the lower average latency and then to the earlier
    /// registration.
    pub fn select(&self, request: &RoutingRequest) -> Result<Vec<Model>> {
        let available = self.len();
        if available < request.min_responses {
            tracing::warn!(
                required = request.min_responses,
                available,
                "registry too small for requested quorum"
            );
            return Err(Error::InsufficientModels {
                required: request.min_responses,
                available,
            });
        }

        if let Some(keys) = &request.explicit_models {
            return self.select_explicit(keys, request.min_responses);
        }

        let mut ranked: Vec<(u64, f64, Model)> = self
            .models
            .iter()
            .map(|entry| {
                let model = entry.value().snapshot();
                (entry.value().seq, self.composite_score(&model), model)
            })
            .collect();

        ranked.sort_by(|(seq_a, score_a, a), (seq_b, score_b, b)| {
            score_b
                .total_cmp(score_a)
                .then_with(|| a.avg_latency.total_cmp(&b.avg_latency))
                .then_with(|| seq_a.cmp(seq_b))
        });
        ranked.truncate(request.max_responses);

        tracing::debug!(
            selected = ?ranked.iter().map(|(_, score, m)| format!("{}={:.3}", m.key, score)).collect::<Vec<_>>(),
            "selected models by composite score"
        );

        Ok(ranked.into_iter().map(|(_, _, model)| model).collect())
    }

    fn select_explicit(&self, keys: &[ModelKey], min_responses: usize) -> Result<Vec<Model>> {
        let mut seen = HashSet::with_capacity(keys.len());
        let mut selected = Vec::with_capacity(keys.len());

        for key in keys {
            if !seen.insert(key) {
                continue;
            }
            let model = self.get(key).ok_or_else(|| Error::UnknownModel {
                key: key.to_string(),
            })?;
            selected.push(model);
        }

        if selected.len() < min_responses {
            return Err(Error::InsufficientModels {
                required: min_responses,
                available: selected.len(),
            });
        }

        tracing::debug!(count = selected.len(), "using explicit model selection");
        Ok(selected)
    }

    /// Fold one completed call into the model's moving averages.
    ///
    /// Returns the updated snapshot, or `None` if the key is not registered.
    pub fn update_performance(
        &self,
        key: &ModelKey,
        observed_latency: Duration,
        succeeded: bool,
    ) -> Option<Model> {
        let Some(entry) = self.models.get(key) else {
            tracing::debug!(model = %key, "ignoring stats for unregistered model");
            return None;
        };

        let mut model = entry
            .value()
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let outcome = if succeeded { 1.0 } else { 0.0 };
        model.avg_latency =
            (1.0 - SMOOTHING) * model.avg_latency + SMOOTHING * observed_latency.as_secs_f64();
        model.success_rate = (1.0 - SMOOTHING) * model.success_rate + SMOOTHING * outcome;

        tracing::debug!(
            model = %key,
            succeeded,
            avg_latency = model.avg_latency,
            success_rate = model.success_rate,
            "updated model performance"
        );

        Some(model.clone())
    }
}
