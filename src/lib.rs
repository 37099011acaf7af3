//! concord - Multi-provider LLM routing with response consensus
//!
//! This library provides the core functionality for concord: model
//! selection, quorum dispatch to providers, and consensus over the answers.

pub mod config;
pub mod consensus;
pub mod error;
pub mod model;
pub mod provider;
pub mod router;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
pub use model::{ConsensusResult, ConsensusStrategy, Model, ModelKey, ModelResponse, RoutingRequest};
