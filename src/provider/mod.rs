//! Provider clients.
//!
//! A provider client turns one prompt into one generation for a given model.
//! The router owns timing and statistics; clients only report what the
//! backend returned or why it failed.

pub mod openai;

pub use openai::OpenAiCompatibleClient;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Confidence assigned when a provider doesn't report one.
pub const DEFAULT_CONFIDENCE: f64 = 0.75;

/// Everything a provider needs for one call.
#[derive(Debug, Clone)]
pub struct ProviderCall<'a> {
    pub prompt: &'a str,
    pub model_id: &'a str,
    pub context: &'a HashMap<String, String>,
    /// Remaining wall-clock budget of the routed request.
    pub timeout: Duration,
}

/// What a provider produced for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub tokens_used: u32,
    pub cost: f64,
    /// Provider-reported confidence, if the backend exposes one.
    pub confidence: Option<f64>,
}

impl Generation {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens_used: 0,
            cost: 0.0,
            confidence: None,
        }
    }

    /// Provider confidence clamped to `0.0..=1.0`, or the heuristic fallback
    /// when none (or a non-finite value) was reported.
    pub fn resolved_confidence(&self) -> f64 {
        match self.confidence {
            Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
            _ => heuristic_confidence(&self.text),
        }
    }
}

/// Confidence for providers that don't report one: nothing for an empty
/// answer, [`DEFAULT_CONFIDENCE`] otherwise.
pub fn heuristic_confidence(text: &str) -> f64 {
    if text.trim().is_empty() {
        0.0
    } else {
        DEFAULT_CONFIDENCE
    }
}

/// Why a single provider call failed.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("no client configured for provider '{0}'")]
    NotConfigured(String),

    #[error("{0}")]
    Other(String),
}

/// One backend. Must be safe to call concurrently and must tolerate its
/// future being dropped mid-flight.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Provider name as used in model keys.
    fn name(&self) -> &str;

    async fn generate(&self, call: ProviderCall<'_>) -> Result<Generation, ProviderError>;
}
