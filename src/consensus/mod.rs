//! Consensus engine.
//!
//! Turns the successful responses of one routed request into a single
//! [`ConsensusResult`]. Evaluation is pure CPU work: similarity is computed
//! over token sets, never through an external embedding call.

mod similarity;
mod strategies;

pub use similarity::jaccard;
pub use strategies::{
    BestOfN, Hybrid, Majority, Strategy, Weighted, HYBRID_AGREEMENT_THRESHOLD,
    SIMILARITY_THRESHOLD,
};

use serde_json::json;

use crate::model::{ConsensusResult, ConsensusStrategy, ModelResponse};

/// Dispatches to one of the four strategies by the request's enum value.
#[derive(Debug, Clone, Default)]
pub struct ConsensusEngine {
    majority: Majority,
    weighted: Weighted,
    best_of_n: BestOfN,
    hybrid: Hybrid,
}

impl ConsensusEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn strategy(&self, kind: ConsensusStrategy) -> &dyn Strategy {
        match kind {
            ConsensusStrategy::Majority => &self.majority,
            ConsensusStrategy::Weighted => &self.weighted,
            ConsensusStrategy::BestOfN => &self.best_of_n,
            ConsensusStrategy::Hybrid => &self.hybrid,
        }
    }

    /// Reduce `responses` to one result using `kind`.
    ///
    /// # Panics
    ///
    /// Panics if `responses` is empty. The router only calls this once a
    /// quorum of at least one response has been met.
    pub fn evaluate(&self, responses: &[ModelResponse], kind: ConsensusStrategy) -> ConsensusResult {
        assert!(
            !responses.is_empty(),
            "consensus evaluation requires at least one response"
        );

        let mut result = self.strategy(kind).evaluate(responses);
        result
            .metadata
            .insert("strategy".to_string(), json!(kind.as_str()));
        result
            .metadata
            .insert("response_count".to_string(), json!(responses.len()));

        tracing::debug!(
            strategy = %kind,
            responses = responses.len(),
            confidence = result.confidence,
            agreement = result.agreement_ratio,
            "consensus evaluated"
        );

        result
    }
}
