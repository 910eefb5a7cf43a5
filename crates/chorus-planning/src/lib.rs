//! Chorus Planning - deciding how a plan is split across agents
//!
//! This crate analyzes an execution plan, picks a coordination strategy and
//! turns the strategy into a dependency graph of sub-agents with roles and a
//! layered execution order.

pub mod analyzer;
pub mod generator;
pub mod templates;
pub mod topology;

pub use analyzer::{CoordinationAnalyzer, PlanAssessment};
pub use generator::SubAgentGenerator;
pub use templates::{chained_plan, example_goal, example_skills, minimal_plan, parallel_plan};
pub use topology::{layered_order, parallel_opportunities, LayeredOrder};
