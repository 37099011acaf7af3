//! Scripted provider shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use concord::provider::{Generation, ProviderCall, ProviderClient, ProviderError};

/// How one scripted model answers.
#[derive(Clone)]
pub enum Script {
    Reply {
        text: String,
        delay: Duration,
        confidence: Option<f64>,
    },
    Fail {
        delay: Duration,
    },
    Hang,
}

pub fn reply(text: &str, ms: u64) -> Script {
    Script::Reply {
        text: text.to_string(),
        delay: Duration::from_millis(ms),
        confidence: None,
    }
}

pub fn reply_with_confidence(text: &str, ms: u64, confidence: f64) -> Script {
    Script::Reply {
        text: text.to_string(),
        delay: Duration::from_millis(ms),
        confidence: Some(confidence),
    }
}

pub fn fail(ms: u64) -> Script {
    Script::Fail {
        delay: Duration::from_millis(ms),
    }
}

pub struct ScriptedProvider {
    name: String,
    scripts: HashMap<String, Script>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(name: &str, scripts: Vec<(&str, Script)>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            scripts: scripts
                .into_iter()
                .map(|(model, script)| (model.to_string(), script))
                .collect(),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, call: ProviderCall<'_>) -> Result<Generation, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.scripts.get(call.model_id).cloned() {
            Some(Script::Reply {
                text,
                delay,
                confidence,
            }) => {
                tokio::time::sleep(delay).await;
                let mut generation = Generation::new(text);
                generation.tokens_used = 20;
                generation.confidence = confidence;
                Ok(generation)
            }
            Some(Script::Fail { delay }) => {
                tokio::time::sleep(delay).await;
                Err(ProviderError::Status {
                    status: 503,
                    message: "overloaded".to_string(),
                })
            }
            Some(Script::Hang) => std::future::pending().await,
            None => Err(ProviderError::Other(format!(
                "no script for model '{}'",
                call.model_id
            ))),
        }
    }
}
