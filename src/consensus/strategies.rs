//! The four consensus strategies.
//!
//! Every strategy first puts its input into a canonical order (confidence
//! descending, then latency, model key and text ascending). Clustering and
//! tie-breaking then only ever see that order, so the outcome does not depend
//! on the order in which responses arrived.

use serde_json::json;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::similarity::jaccard;
use crate::model::{ConsensusResult, ConsensusStrategy, ModelResponse};

/// Minimum similarity to a cluster's first member for a response to join it.
pub const SIMILARITY_THRESHOLD: f64 = 0.6;

/// Majority agreement a hybrid run needs before it skips the weighted fallback.
pub const HYBRID_AGREEMENT_THRESHOLD: f64 = 0.6;

/// Upper bound on the latency deduction applied by best-of-N.
const MAX_LATENCY_PENALTY: f64 = 0.3;

/// Reduces a non-empty response list to a single result.
pub trait Strategy {
    fn evaluate(&self, responses: &[ModelResponse]) -> ConsensusResult;
}

fn canonical_cmp(a: &ModelResponse, b: &ModelResponse) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.latency.cmp(&b.latency))
        .then_with(|| a.model.cmp(&b.model))
        .then_with(|| a.text.cmp(&b.text))
}

fn canonical(responses: &[ModelResponse]) -> Vec<ModelResponse> {
    let mut ordered = responses.to_vec();
    ordered.sort_by(canonical_cmp);
    ordered
}

/// Index of the highest-scoring response; ties go to lower latency, then model key.
fn argmax_by_score(ordered: &[ModelResponse], scores: &[f64]) -> usize {
    (0..ordered.len())
        .min_by(|&i, &j| {
            scores[j]
                .total_cmp(&scores[i])
                .then_with(|| ordered[i].latency.cmp(&ordered[j].latency))
                .then_with(|| ordered[i].model.cmp(&ordered[j].model))
        })
        .unwrap_or(0)
}

fn build_result(
    strategy: ConsensusStrategy,
    winner: &ModelResponse,
    confidence: f64,
    agreement_ratio: f64,
    ordered: Vec<ModelResponse>,
    metadata: BTreeMap<String, serde_json::Value>,
) -> ConsensusResult {
    ConsensusResult {
        final_text: winner.text.clone(),
        strategy_used: strategy,
        confidence: confidence.clamp(0.0, 1.0),
        agreement_ratio: agreement_ratio.clamp(0.0, 1.0),
        participating_models: ordered.iter().map(|r| r.model.clone()).collect(),
        individual_responses: ordered,
        metadata,
    }
}

/// Greedy similarity clustering; the largest cluster wins.
#[derive(Debug, Clone)]
pub struct Majority {
    pub threshold: f64,
}

impl Default for Majority {
    fn default() -> Self {
        Self {
            threshold: SIMILARITY_THRESHOLD,
        }
    }
}

impl Majority {
    /// Clusters as lists of indices into `ordered`, in formation order.
    fn cluster(&self, ordered: &[ModelResponse]) -> Vec<Vec<usize>> {
        let mut clusters: Vec<Vec<usize>> = Vec::new();
        for (i, response) in ordered.iter().enumerate() {
            let home = clusters
                .iter_mut()
                .find(|c| jaccard(&ordered[c[0]].text, &response.text) >= self.threshold);
            match home {
                Some(cluster) => cluster.push(i),
                None => clusters.push(vec![i]),
            }
        }
        clusters
    }
}

impl Strategy for Majority {
    fn evaluate(&self, responses: &[ModelResponse]) -> ConsensusResult {
        let ordered = canonical(responses);
        let clusters = self.cluster(&ordered);

        // Strictly larger only, so the earliest-formed cluster wins ties.
        let mut largest = &clusters[0];
        for cluster in &clusters[1..] {
            if cluster.len() > largest.len() {
                largest = cluster;
            }
        }

        // Members are in canonical order: the first has the highest
        // confidence, ties already resolved by latency.
        let winner = ordered[largest[0]].clone();
        let confidence =
            largest.iter().map(|&i| ordered[i].confidence).sum::<f64>() / largest.len() as f64;
        let agreement = largest.len() as f64 / ordered.len() as f64;

        let mut metadata = BTreeMap::new();
        metadata.insert("cluster_count".to_string(), json!(clusters.len()));
        metadata.insert("cluster_size".to_string(), json!(largest.len()));

        build_result(
            ConsensusStrategy::Majority,
            &winner,
            confidence,
            agreement,
            ordered,
            metadata,
        )
    }
}

/// Highest `confidence × weight` wins.
#[derive(Debug, Clone, Default)]
pub struct Weighted;

impl Strategy for Weighted {
    fn evaluate(&self, responses: &[ModelResponse]) -> ConsensusResult {
        let ordered = canonical(responses);
        let scores: Vec<f64> = ordered.iter().map(|r| r.confidence * r.weight).collect();
        let best = argmax_by_score(&ordered, &scores);
        let total: f64 = scores.iter().sum();

        // All-zero weights carry no dominance signal; report a uniform share.
        let agreement = if total > 0.0 {
            scores[best] / total
        } else {
            1.0 / ordered.len() as f64
        };

        let winner = ordered[best].clone();
        let mut metadata = BTreeMap::new();
        metadata.insert("winner_score".to_string(), json!(scores[best]));
        metadata.insert("total_score".to_string(), json!(total));

        build_result(
            ConsensusStrategy::Weighted,
            &winner,
            winner.confidence,
            agreement,
            ordered,
            metadata,
        )
    }
}

/// Highest confidence after a latency deduction wins, text unmodified.
#[derive(Debug, Clone, Default)]
pub struct BestOfN;

impl BestOfN {
    fn score(response: &ModelResponse) -> f64 {
        let penalty = (response.latency.as_secs_f64() / 10.0).min(MAX_LATENCY_PENALTY);
        response.confidence - penalty
    }
}

impl Strategy for BestOfN {
    fn evaluate(&self, responses: &[ModelResponse]) -> ConsensusResult {
        let ordered = canonical(responses);
        let scores: Vec<f64> = ordered.iter().map(Self::score).collect();
        let best = argmax_by_score(&ordered, &scores);
        let winner = ordered[best].clone();

        let mut metadata = BTreeMap::new();
        metadata.insert("winner_score".to_string(), json!(scores[best]));

        build_result(
            ConsensusStrategy::BestOfN,
            &winner,
            winner.confidence,
            1.0 / ordered.len() as f64,
            ordered,
            metadata,
        )
    }
}

/// Majority when it is convincing enough, weighted otherwise.
#[derive(Debug, Clone)]
pub struct Hybrid {
    pub majority: Majority,
    pub weighted: Weighted,
    pub agreement_threshold: f64,
}

impl Default for Hybrid {
    fn default() -> Self {
        Self {
            majority: Majority::default(),
            weighted: Weighted,
            agreement_threshold: HYBRID_AGREEMENT_THRESHOLD,
        }
    }
}

impl Strategy for Hybrid {
    fn evaluate(&self, responses: &[ModelResponse]) -> ConsensusResult {
        let majority = self.majority.evaluate(responses);
        let majority_agreement = majority.agreement_ratio;

        let (mut result, method) = if majority_agreement >= self.agreement_threshold {
            (majority, "majority")
        } else {
            tracing::debug!(
                majority_agreement,
                threshold = self.agreement_threshold,
                "majority agreement too low, falling back to weighted consensus"
            );
            (self.weighted.evaluate(responses), "weighted")
        };

        result.strategy_used = ConsensusStrategy::Hybrid;
        result
            .metadata
            .insert("method_used".to_string(), json!(method));
        result
            .metadata
            .insert("majority_agreement".to_string(), json!(majority_agreement));
        result
    }
}
