//! # chorus-core
//!
//! Core types for the Chorus multi-agent coordination engine.
//!
//! A plan is split across cooperating sub-agents, the sub-agents form a
//! dependency graph, and the graph is executed layer by layer.
//!
//! ## Contents
//!
//! - Plan, skill and goal definitions handed in by upstream planners
//! - Coordination strategy, sub-agent and dependency graph model
//! - `ChorusError`, the unified error type
//! - `ChorusConfig`, loaded from `.chorus/config.toml`
//! - Free-text duration parsing shared by analysis and generation

pub mod config;
pub mod duration;
mod error;
pub mod fail_open;
mod types;

pub use config::{AnalyzerConfig, ChorusConfig, OrchestratorSettings, StateConfig};
pub use error::{ChorusError, Result};
pub use types::*;
