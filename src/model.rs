//! Core data types shared by the selector, router, and consensus engine.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default quorum size for requests that don't set one.
pub const DEFAULT_MIN_RESPONSES: usize = 2;

/// Default fan-out cap for requests that don't set one.
pub const DEFAULT_MAX_RESPONSES: usize = 3;

/// Default per-request wall-clock budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity of a model: the provider that serves it plus the provider's model id.
///
/// Displays and parses as `provider/model_id`, splitting on the first `/`
/// so model ids such as `meta/llama-3` survive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelKey {
    pub provider: String,
    pub model_id: String,
}

impl ModelKey {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model_id)
    }
}

impl FromStr for ModelKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((provider, model_id)) if !provider.is_empty() && !model_id.is_empty() => {
                Ok(ModelKey::new(provider, model_id))
            }
            _ => Err(Error::InvalidRequest(format!(
                "Model key '{}' must have the form 'provider/model_id'",
                s
            ))),
        }
    }
}

impl Serialize for ModelKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ModelKey {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A registered model and its live performance statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Model {
    pub key: ModelKey,
    /// Operator-assigned priority, never negative.
    pub weight: f64,
    /// Exponentially smoothed latency in seconds.
    pub avg_latency: f64,
    /// Exponentially smoothed success rate in `0.0..=1.0`.
    pub success_rate: f64,
    /// Cost per token in the operator's currency.
    pub cost_per_unit: f64,
}

impl Model {
    /// A fresh model: weight 1, no latency history, full success rate, free.
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            key: ModelKey::new(provider, model_id),
            weight: 1.0,
            avg_latency: 0.0,
            success_rate: 1.0,
            cost_per_unit: 0.0,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight.max(0.0);
        self
    }

    pub fn with_cost_per_unit(mut self, cost: f64) -> Self {
        self.cost_per_unit = cost.max(0.0);
        self
    }

    pub fn with_avg_latency(mut self, seconds: f64) -> Self {
        self.avg_latency = seconds.max(0.0);
        self
    }

    pub fn with_success_rate(mut self, rate: f64) -> Self {
        self.success_rate = rate.clamp(0.0, 1.0);
        self
    }
}

/// Algorithm used to reduce several model responses to one answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusStrategy {
    #[default]
    Majority,
    Weighted,
    BestOfN,
    Hybrid,
}

impl ConsensusStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusStrategy::Majority => "majority",
            ConsensusStrategy::Weighted => "weighted",
            ConsensusStrategy::BestOfN => "best_of_n",
            ConsensusStrategy::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for ConsensusStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsensusStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "majority" => Ok(ConsensusStrategy::Majority),
            "weighted" => Ok(ConsensusStrategy::Weighted),
            "best_of_n" | "bestofn" | "best-of-n" => Ok(ConsensusStrategy::BestOfN),
            "hybrid" => Ok(ConsensusStrategy::Hybrid),
            other => Err(Error::InvalidRequest(format!(
                "Unknown consensus strategy '{}'",
                other
            ))),
        }
    }
}

/// One logical routing call.
///
/// Built with [`RoutingRequest::new`] and the `with_*` methods; the router
/// never mutates it.
#[derive(Debug, Clone)]
pub struct RoutingRequest {
    pub prompt: String,
    /// Passed through verbatim to every provider.
    pub context: HashMap<String, String>,
    /// When set, selection is exactly this set instead of the score ranking.
    pub explicit_models: Option<Vec<ModelKey>>,
    pub consensus_strategy: ConsensusStrategy,
    pub min_responses: usize,
    pub max_responses: usize,
    pub timeout: Duration,
    pub metadata: HashMap<String, String>,
}

impl RoutingRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: HashMap::new(),
            explicit_models: None,
            consensus_strategy: ConsensusStrategy::default(),
            min_responses: DEFAULT_MIN_RESPONSES,
            max_responses: DEFAULT_MAX_RESPONSES,
            timeout: DEFAULT_TIMEOUT,
            metadata: HashMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_models(mut self, models: Vec<ModelKey>) -> Self {
        self.explicit_models = Some(models);
        self
    }

    pub fn with_strategy(mut self, strategy: ConsensusStrategy) -> Self {
        self.consensus_strategy = strategy;
        self
    }

    pub fn with_quorum(mut self, min_responses: usize, max_responses: usize) -> Self {
        self.min_responses = min_responses;
        self.max_responses = max_responses;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Check the request's own constraints before any selection happens.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(Error::InvalidRequest("Prompt must not be empty".to_string()));
        }
        if self.min_responses == 0 {
            return Err(Error::InvalidRequest(
                "min_responses must be at least 1".to_string(),
            ));
        }
        if self.max_responses < self.min_responses {
            return Err(Error::InvalidRequest(format!(
                "max_responses ({}) must be >= min_responses ({})",
                self.max_responses, self.min_responses
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidRequest(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A successful answer from one model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelResponse {
    pub model: ModelKey,
    pub text: String,
    /// Wall-clock time of the call as measured by the router.
    #[serde(rename = "latency_secs", serialize_with = "serialize_secs")]
    pub latency: Duration,
    pub tokens_used: u32,
    pub cost: f64,
    /// Confidence in `0.0..=1.0`.
    pub confidence: f64,
    /// The model's registry weight at dispatch time, used by weighted consensus.
    pub weight: f64,
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// The single answer returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusResult {
    pub final_text: String,
    pub strategy_used: ConsensusStrategy,
    pub confidence: f64,
    pub agreement_ratio: f64,
    pub participating_models: Vec<ModelKey>,
    pub individual_responses: Vec<ModelResponse>,
    /// Diagnostics, e.g. which sub-strategy a hybrid run settled on.
    pub metadata: BTreeMap<String, serde_json::Value>,
}
