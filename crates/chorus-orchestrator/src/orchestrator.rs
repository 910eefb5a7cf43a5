//! Dependency-ordered execution of a sub-agent graph

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chorus_core::{
    phase_output_key, AgentDependencyGraph, AgentId, ChorusError, OrchestratorSettings, PlanPhase,
    Result, SubAgentDefinition,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::policy::failure_escalates;
use crate::protocol::{CompletionStatus, CoordinationProtocol};
use crate::runner::{PhaseContext, PhaseRunner};
use crate::shared_state::{SharedStateManager, MESSAGES_PREFIX};

/// Store keys written by a run: phase outputs/status, agent status/progress, messages
const RUN_STATE_PREFIXES: [&str; 3] = ["phase.", "agent.", MESSAGES_PREFIX];

/// Configuration for an orchestration run
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Agents running at once within a layer (at least 1)
    pub max_concurrent_agents: usize,
    /// Bound on the whole run
    pub timeout: Duration,
    /// Refuse to run a graph whose layering hit a cycle
    pub fail_on_cycle: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 5,
            timeout: Duration::from_secs(3600),
            fail_on_cycle: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &OrchestratorSettings) -> Self {
        Self::default()
            .with_max_concurrent_agents(settings.max_concurrent_agents)
            .with_timeout(settings.timeout())
            .with_fail_on_cycle(settings.fail_on_cycle)
    }

    pub fn with_max_concurrent_agents(mut self, max: usize) -> Self {
        self.max_concurrent_agents = max.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fail_on_cycle(mut self, fail: bool) -> Self {
        self.fail_on_cycle = fail;
        self
    }
}

/// Summary of one orchestration run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub success: bool,
    pub completed: Vec<AgentId>,
    pub failed: Vec<AgentId>,
    pub skipped: Vec<AgentId>,
    pub total_duration_seconds: f64,
    /// Failure message per failed agent
    pub errors: HashMap<AgentId, String>,
    /// Phase name -> output, per completed agent
    pub outputs: HashMap<AgentId, Map<String, Value>>,
    /// Run-level errors not tied to an agent (timeout, cycle, internal)
    pub orchestration_errors: Vec<String>,
    pub cycle_detected: bool,
    /// Critical agent whose failure stopped scheduling
    pub aborted_by: Option<AgentId>,
}

impl OrchestrationResult {
    /// Completed over classified agents; 0 when nothing was classified
    pub fn completion_rate(&self) -> f64 {
        let total = self.completed.len() + self.failed.len() + self.skipped.len();
        if total == 0 {
            return 0.0;
        }
        self.completed.len() as f64 / total as f64
    }

    fn is_classified(&self, id: &AgentId) -> bool {
        self.completed.contains(id) || self.failed.contains(id) || self.skipped.contains(id)
    }

    /// Mark every agent of the graph not yet classified as skipped
    fn skip_unclassified(&mut self, graph: &AgentDependencyGraph) {
        let remaining: Vec<AgentId> = graph
            .nodes
            .keys()
            .filter(|id| !self.is_classified(id))
            .copied()
            .collect();
        self.skipped.extend(remaining);
    }

    /// Order each outcome list by the graph's node order
    fn sort_by_graph(&mut self, graph: &AgentDependencyGraph) {
        let position = |id: &AgentId| graph.nodes.get_index_of(id).unwrap_or(usize::MAX);
        self.completed.sort_by_key(position);
        self.failed.sort_by_key(position);
        self.skipped.sort_by_key(position);
    }
}

impl std::fmt::Display for OrchestrationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "OrchestrationResult(success={}, completed={}, failed={}, skipped={}, duration={:.2}s)",
            self.success,
            self.completed.len(),
            self.failed.len(),
            self.skipped.len(),
            self.total_duration_seconds
        )
    }
}

/// Removes an agent from the running set when its task ends or is aborted
struct RunningGuard {
    running: Arc<Mutex<HashSet<AgentId>>>,
    id: AgentId,
}

impl RunningGuard {
    fn enter(running: &Arc<Mutex<HashSet<AgentId>>>, id: AgentId) -> Self {
        running.lock().insert(id);
        Self {
            running: Arc::clone(running),
            id,
        }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.lock().remove(&self.id);
    }
}

/// Executes one agent's phases inside its own task
struct AgentTask {
    agent: SubAgentDefinition,
    store: Arc<SharedStateManager>,
    runner: Arc<dyn PhaseRunner>,
}

impl AgentTask {
    #[instrument(skip(self), fields(agent = %self.agent.name, role = %self.agent.role))]
    async fn run(self) -> Result<Map<String, Value>> {
        let agent = &self.agent;
        let id = agent.id;

        let capabilities = agent.plan.capabilities();
        self.store.publish_message(&CoordinationProtocol::agent_started(
            id,
            &agent.name,
            Some(agent.role),
            &capabilities,
        )?)?;
        self.store.set(&agent.status_key(), json!("running"), Some(id));
        self.store.set(&agent.progress_key(), json!(0.0), Some(id));

        match self.run_phases().await {
            Ok(outputs) => {
                self.store.set(&agent.status_key(), json!("completed"), Some(id));
                self.store.set(&agent.progress_key(), json!(1.0), Some(id));
                self.store.publish_message(&CoordinationProtocol::agent_completed(
                    id,
                    CompletionStatus::Success,
                    None,
                    Some(outputs.clone()),
                )?)?;
                info!(phases = outputs.len(), "Agent completed");
                Ok(outputs)
            }
            Err(e) => {
                self.store.set(&agent.status_key(), json!("failed"), Some(id));
                let published = CoordinationProtocol::agent_failed(id, &e.to_string(), None, Some(false))
                    .and_then(|msg| self.store.publish_message(&msg));
                if let Err(publish_err) = published {
                    warn!("Failed to publish AgentFailed: {}", publish_err);
                }
                warn!("Agent failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run_phases(&self) -> Result<Map<String, Value>> {
        let agent = &self.agent;
        let id = agent.id;
        let total = agent.plan.phases.len();
        let mut outputs = Map::new();

        for (index, phase) in agent.plan.phases.iter().enumerate() {
            self.store
                .set(&agent.progress_key(), json!(index as f64 / total as f64), Some(id));
            self.store.publish_message(&CoordinationProtocol::phase_started(
                id,
                &phase.name,
                Some(index),
                Some(total),
            )?)?;

            let started = Instant::now();
            match self.run_phase(index, phase).await {
                Ok(output) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    let output_key = phase.output_key();
                    self.store.set(&output_key, Value::Object(output.clone()), Some(id));
                    self.store.set(&phase.status_key(), json!("completed"), Some(id));

                    self.store.publish_message(&CoordinationProtocol::phase_completed(
                        id,
                        &phase.name,
                        true,
                        Some(output.clone()),
                        Some(elapsed),
                    )?)?;
                    let mut metadata = Map::new();
                    metadata.insert("phase".to_string(), json!(phase.name));
                    self.store.publish_message(&CoordinationProtocol::data_available(
                        id,
                        &output_key,
                        Some("map"),
                        Some(metadata),
                    )?)?;

                    debug!(phase = %phase.name, elapsed, "Phase completed");
                    outputs.insert(phase.name.clone(), Value::Object(output));
                }
                Err(e) => {
                    self.store.set(&phase.status_key(), json!("failed"), Some(id));
                    self.store.publish_message(&CoordinationProtocol::phase_failed(
                        id,
                        &phase.name,
                        &e.to_string(),
                        Some(0),
                        Some(false),
                    )?)?;
                    return Err(match e {
                        ChorusError::Dependency { .. } => e,
                        other => ChorusError::AgentExecution {
                            agent: agent.name.clone(),
                            phase: phase.name.clone(),
                            message: other.to_string(),
                        },
                    });
                }
            }
        }
        Ok(outputs)
    }

    /// Resolve upstream outputs, then hand the phase to the runner
    async fn run_phase(&self, index: usize, phase: &PlanPhase) -> Result<Map<String, Value>> {
        let mut inputs = Map::new();
        for dep in &phase.dependencies {
            let value = self
                .store
                .get_as(&phase_output_key(dep), self.agent.id)
                .ok_or_else(|| ChorusError::Dependency {
                    phase: phase.name.clone(),
                    dependency: dep.clone(),
                })?;
            inputs.insert(dep.clone(), value);
        }

        self.runner
            .run_phase(PhaseContext {
                agent: &self.agent,
                phase,
                phase_index: index,
                inputs: &inputs,
                store: &self.store,
            })
            .await
    }
}

/// Runs a dependency graph layer by layer with bounded concurrency
pub struct OrchestrationLayer {
    store: Arc<SharedStateManager>,
    runner: Arc<dyn PhaseRunner>,
    config: OrchestratorConfig,
    running: Arc<Mutex<HashSet<AgentId>>>,
}

impl OrchestrationLayer {
    pub fn new(
        store: Arc<SharedStateManager>,
        runner: Arc<dyn PhaseRunner>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            runner,
            config,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SharedStateManager> {
        &self.store
    }

    /// Drop everything a previous run left in the store; returns keys removed
    ///
    /// Other keys (configuration, user data) are kept.
    pub fn reset_run_state(&self) -> usize {
        let removed = self.store.delete_prefixed(&RUN_STATE_PREFIXES);
        if removed > 0 {
            debug!(removed, "Cleared state from a previous run");
        }
        removed
    }

    /// Agents currently executing
    pub fn running_agents(&self) -> Vec<AgentId> {
        self.running.lock().iter().copied().collect()
    }

    /// Execute the graph; never fails, every node ends up classified
    #[instrument(skip(self, graph), fields(agents = graph.len(), layers = graph.execution_order.len()))]
    pub async fn orchestrate(&self, graph: &AgentDependencyGraph) -> OrchestrationResult {
        let started = Instant::now();
        let mut result = OrchestrationResult {
            cycle_detected: graph.cycle_detected,
            ..Default::default()
        };

        if graph.is_empty() {
            result.success = true;
            return result;
        }

        if graph.cycle_detected {
            warn!("Executing a cycle-degraded graph");
            if self.config.fail_on_cycle {
                let err = ChorusError::CycleDetected { total: graph.len() };
                error!("{}", err);
                result.orchestration_errors.push(err.to_string());
                result.skip_unclassified(graph);
                result.total_duration_seconds = started.elapsed().as_secs_f64();
                return result;
            }
        }

        info!("Starting orchestration");
        let outcome = tokio::time::timeout(self.config.timeout, self.run_layers(graph, &mut result)).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Orchestration error: {}", e);
                result.orchestration_errors.push(format!("Orchestration error: {}", e));
            }
            Err(_) => {
                let err = ChorusError::OrchestrationTimeout(self.config.timeout);
                warn!("{}", err);
                result.orchestration_errors.push(err.to_string());
            }
        }

        result.skip_unclassified(graph);
        result.sort_by_graph(graph);
        result.success = result.failed.is_empty()
            && result.orchestration_errors.is_empty()
            && result.completed.len() == graph.len();
        result.total_duration_seconds = started.elapsed().as_secs_f64();

        info!(
            success = result.success,
            completed = result.completed.len(),
            failed = result.failed.len(),
            skipped = result.skipped.len(),
            "Orchestration finished"
        );
        result
    }

    async fn run_layers(&self, graph: &AgentDependencyGraph, result: &mut OrchestrationResult) -> Result<()> {
        for (index, layer) in graph.execution_order.iter().enumerate() {
            let (runnable, blocked): (Vec<AgentId>, Vec<AgentId>) = layer
                .iter()
                .filter(|id| !result.is_classified(id))
                .copied()
                .partition(|id| {
                    graph
                        .dependencies_of(id)
                        .iter()
                        .all(|dep| !result.failed.contains(dep) && !result.skipped.contains(dep))
                });

            if !blocked.is_empty() {
                debug!(layer = index, count = blocked.len(), "Skipping agents with failed prerequisites");
            }
            result.skipped.extend(blocked);

            let failed_before = result.failed.len();
            for batch in runnable.chunks(self.config.max_concurrent_agents) {
                self.run_batch(graph, batch, result).await?;
            }

            let critical = result.failed[failed_before..].iter().copied().find(|id| {
                graph
                    .node(id)
                    .map(|agent| failure_escalates(agent.role))
                    .unwrap_or(false)
            });
            if let Some(id) = critical {
                warn!(agent = %id, layer = index, "Critical agent failed, stopping orchestration");
                result.aborted_by = Some(id);
                break;
            }
        }
        Ok(())
    }

    /// Run one batch to completion; dropping the JoinSet aborts its tasks
    async fn run_batch(
        &self,
        graph: &AgentDependencyGraph,
        batch: &[AgentId],
        result: &mut OrchestrationResult,
    ) -> Result<()> {
        let mut tasks = JoinSet::new();
        for id in batch {
            let agent = graph
                .node(id)
                .cloned()
                .ok_or_else(|| ChorusError::InvalidGraph(format!("agent {} is not in the graph", id)))?;
            let task = AgentTask {
                agent,
                store: Arc::clone(&self.store),
                runner: Arc::clone(&self.runner),
            };
            let running = Arc::clone(&self.running);
            let id = *id;
            tasks.spawn(async move {
                let _guard = RunningGuard::enter(&running, id);
                (id, task.run().await)
            });
        }

        // Classify on arrival: a timeout may drop this future mid-batch
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(outputs))) => {
                    result.completed.push(id);
                    result.outputs.insert(id, outputs);
                }
                Ok((id, Err(e))) => {
                    result.failed.push(id);
                    result.errors.insert(id, e.to_string());
                }
                Err(e) => error!("Agent task ended abnormally: {}", e),
            }
        }

        let missing: Vec<AgentId> = batch.iter().filter(|id| !result.is_classified(id)).copied().collect();
        for id in &missing {
            let message = "Agent task panicked".to_string();
            let published = CoordinationProtocol::agent_failed(*id, &message, None, Some(false))
                .and_then(|msg| self.store.publish_message(&msg));
            if let Err(publish_err) = published {
                warn!("Failed to publish AgentFailed: {}", publish_err);
            }
            result.failed.push(*id);
            result.errors.insert(*id, message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_and_floor() {
        let config = OrchestratorConfig::new();
        assert_eq!(config.max_concurrent_agents, 5);
        assert_eq!(config.timeout, Duration::from_secs(3600));
        assert!(!config.fail_on_cycle);

        assert_eq!(config.with_max_concurrent_agents(0).max_concurrent_agents, 1);
    }

    #[test]
    fn test_config_from_settings() {
        let settings = OrchestratorSettings {
            max_concurrent_agents: 2,
            timeout_secs: 10,
            fail_on_cycle: true,
        };
        let config = OrchestratorConfig::from_settings(&settings);
        assert_eq!(config.max_concurrent_agents, 2);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.fail_on_cycle);
    }

    #[test]
    fn test_completion_rate() {
        let mut result = OrchestrationResult::default();
        assert_eq!(result.completion_rate(), 0.0);

        result.completed.push(AgentId::new_v4());
        result.failed.push(AgentId::new_v4());
        result.skipped.push(AgentId::new_v4());
        result.skipped.push(AgentId::new_v4());
        assert_eq!(result.completion_rate(), 0.25);
    }

    #[test]
    fn test_result_display() {
        let result = OrchestrationResult {
            success: true,
            completed: vec![AgentId::new_v4()],
            ..Default::default()
        };
        assert_eq!(
            result.to_string(),
            "OrchestrationResult(success=true, completed=1, failed=0, skipped=0, duration=0.00s)"
        );
    }

    #[tokio::test]
    async fn test_missing_upstream_output_is_dependency_error() {
        use chorus_core::{ExecutionPlan, GoalDefinition};

        let store = Arc::new(SharedStateManager::in_memory());
        let agent = SubAgentDefinition::new(
            "agent-a",
            GoalDefinition::new("consume", "test"),
            ExecutionPlan::new(vec![PlanPhase::new("a", "").with_dependencies(["ghost"])]),
        )
        .unwrap();
        let status_key = agent.status_key();
        let task = AgentTask {
            agent,
            store: Arc::clone(&store),
            runner: Arc::new(crate::runner::EchoRunner::new()),
        };

        match task.run().await {
            Err(ChorusError::Dependency { phase, dependency }) => {
                assert_eq!(phase, "a");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("expected a dependency error, got {:?}", other),
        }
        assert_eq!(store.get(&status_key), Some(json!("failed")));
        assert_eq!(store.get("phase.a.status"), Some(json!("failed")));
    }

    #[tokio::test]
    async fn test_runner_error_is_wrapped_with_agent_and_phase() {
        use chorus_core::{ExecutionPlan, GoalDefinition};

        struct Refusing;

        #[async_trait::async_trait]
        impl PhaseRunner for Refusing {
            async fn run_phase(&self, _ctx: PhaseContext<'_>) -> Result<Map<String, Value>> {
                Err(ChorusError::Other("refused".to_string()))
            }
        }

        let agent = SubAgentDefinition::new(
            "agent-a",
            GoalDefinition::new("refuse", "test"),
            ExecutionPlan::new(vec![PlanPhase::new("a", "")]),
        )
        .unwrap();
        let task = AgentTask {
            agent,
            store: Arc::new(SharedStateManager::in_memory()),
            runner: Arc::new(Refusing),
        };

        match task.run().await {
            Err(ChorusError::AgentExecution { agent, phase, message }) => {
                assert_eq!(agent, "agent-a");
                assert_eq!(phase, "a");
                assert!(message.contains("refused"));
            }
            other => panic!("expected an execution error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_graph_succeeds() {
        let layer = OrchestrationLayer::new(
            Arc::new(SharedStateManager::in_memory()),
            Arc::new(crate::runner::EchoRunner::new()),
            OrchestratorConfig::new(),
        );
        let result = layer.orchestrate(&AgentDependencyGraph::default()).await;
        assert!(result.success);
        assert_eq!(result.completion_rate(), 0.0);
        assert!(layer.running_agents().is_empty());
    }
}
