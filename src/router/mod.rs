//! Router module for model selection and quorum dispatch.
//!
//! This module handles:
//! - Keeping the model registry and its live performance statistics
//! - Ranking models by composite score, or honouring an explicit list
//! - Fanning a request out to providers and waiting for a quorum

mod dispatch;
mod selector;

pub use dispatch::{Router, StopReason, REQUEST_ID_KEY};
pub use selector::{ModelSelector, DEFAULT_SCORE_EPSILON};
