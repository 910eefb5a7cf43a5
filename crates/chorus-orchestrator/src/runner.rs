//! Phase execution capability
//!
//! The orchestration layer never runs phases itself; it hands each phase to a
//! `PhaseRunner` together with the outputs of the phases it depends on.

use std::time::Duration;

use async_trait::async_trait;
use chorus_core::{PlanPhase, Result, SubAgentDefinition};
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::shared_state::SharedStateManager;

/// Output of one phase, stored under `phase.{name}.output`
pub type PhaseOutput = Map<String, Value>;

/// Everything a runner sees while executing one phase
#[derive(Debug, Clone, Copy)]
pub struct PhaseContext<'a> {
    pub agent: &'a SubAgentDefinition,
    pub phase: &'a PlanPhase,
    /// Position of the phase within the agent's plan
    pub phase_index: usize,
    /// Upstream phase name -> its stored output
    pub inputs: &'a Map<String, Value>,
    pub store: &'a SharedStateManager,
}

/// Executes a single phase on behalf of an agent
#[async_trait]
pub trait PhaseRunner: Send + Sync {
    /// Run the phase
    ///
    /// An error fails the phase and, with it, the owning agent.
    async fn run_phase(&self, ctx: PhaseContext<'_>) -> Result<PhaseOutput>;
}

/// Runner that echoes its inputs back, optionally after a delay
///
/// Used for dry runs.
#[derive(Debug, Clone, Default)]
pub struct EchoRunner {
    delay: Option<Duration>,
}

impl EchoRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl PhaseRunner for EchoRunner {
    async fn run_phase(&self, ctx: PhaseContext<'_>) -> Result<PhaseOutput> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        debug!(agent = %ctx.agent.name, phase = %ctx.phase.name, "Echoing phase");

        let mut output = Map::new();
        output.insert("status".to_string(), json!("completed"));
        output.insert("phase_name".to_string(), json!(ctx.phase.name));
        output.insert("agent_id".to_string(), json!(ctx.agent.id.to_string()));
        output.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
        output.insert("inputs".to_string(), Value::Object(ctx.inputs.clone()));
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::{ExecutionPlan, GoalDefinition};

    #[tokio::test]
    async fn test_echo_runner_echoes_inputs() {
        let phase = PlanPhase::new("merge", "Merge").with_dependencies(["fetch"]);
        let agent = SubAgentDefinition::new(
            "agent-1-data",
            GoalDefinition::new("g", "data"),
            ExecutionPlan::new(vec![phase.clone()]),
        )
        .unwrap();
        let store = SharedStateManager::in_memory();
        let mut inputs = Map::new();
        inputs.insert("fetch".to_string(), json!({"rows": 3}));

        let output = EchoRunner::new()
            .with_delay(Duration::from_millis(1))
            .run_phase(PhaseContext {
                agent: &agent,
                phase: &phase,
                phase_index: 0,
                inputs: &inputs,
                store: &store,
            })
            .await
            .unwrap();

        assert_eq!(output["status"], json!("completed"));
        assert_eq!(output["phase_name"], json!("merge"));
        assert_eq!(output["agent_id"], json!(agent.id.to_string()));
        assert_eq!(output["inputs"]["fetch"]["rows"], json!(3));
    }
}
