//! Wire types for the HTTP surface.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::RoutingConfig;
use crate::error::Result;
use crate::model::{ModelKey, RoutingRequest};

/// Body of `POST /v1/route`. Omitted fields fall back to `[routing]` defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RouteRequestBody {
    pub prompt: String,
    #[serde(default)]
    pub context: HashMap<String, String>,
    /// Explicit `provider/model_id` keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_responses: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_responses: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl RouteRequestBody {
    /// Resolve against the configured defaults.
    ///
    /// Malformed model keys, unknown strategy names and non-finite or
    /// negative timeouts are rejected as invalid requests. Quorum bounds are
    /// left for [`RoutingRequest::validate`].
    pub fn into_request(self, defaults: &RoutingConfig) -> Result<RoutingRequest> {
        let mut request = defaults.request(self.prompt);
        request.context = self.context;
        request.metadata = self.metadata;

        if let Some(models) = self.models {
            let keys = models
                .iter()
                .map(|m| m.parse::<ModelKey>())
                .collect::<Result<Vec<_>>>()?;
            request = request.with_models(keys);
        }
        if let Some(strategy) = self.strategy {
            request = request.with_strategy(strategy.parse()?);
        }

        let min = self.min_responses.unwrap_or(request.min_responses);
        // A lone min above the default max lifts max with it.
        let max = self
            .max_responses
            .unwrap_or_else(|| request.max_responses.max(min));
        request = request.with_quorum(min, max);

        if let Some(secs) = self.timeout_secs {
            let timeout = Duration::try_from_secs_f64(secs).map_err(|_| {
                crate::error::Error::InvalidRequest(format!("Invalid timeout_secs: {}", secs))
            })?;
            request = request.with_timeout(timeout);
        }

        Ok(request)
    }
}
