//! Sub-agent generation from a coordination strategy

use std::collections::HashMap;

use chorus_core::duration;
use chorus_core::{
    phase_output_key, AgentDependencyGraph, AgentId, AgentRole, ChorusError, CoordinationStrategy,
    ExecutionPlan, GoalDefinition, PlanPhase, Result, SkillDefinition, SubAgentDefinition,
};
use indexmap::IndexMap;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::analyzer::capability_domain;
use crate::topology::{layered_order, parallel_opportunities};

/// Fallback for a phase estimate that cannot be parsed
const DEFAULT_PHASE_MINUTES: f64 = 15.0;

/// Turns a plan and a strategy into a graph of sub-agents
#[derive(Debug, Clone, Default)]
pub struct SubAgentGenerator;

impl SubAgentGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Build the dependency graph of sub-agents for a plan
    ///
    /// Roles are assigned and the execution order is computed. A cyclic
    /// phase dependency degrades the order to one layer and sets
    /// `cycle_detected`; it is not an error.
    #[instrument(skip_all, fields(goal_id = %plan.goal_id, coordination = %strategy.coordination_type))]
    pub fn generate(
        &self,
        goal: &GoalDefinition,
        plan: &ExecutionPlan,
        skills: &[SkillDefinition],
        strategy: &CoordinationStrategy,
    ) -> Result<AgentDependencyGraph> {
        if !strategy.coordination_type.is_multi_agent() {
            return self.single_agent_graph(goal, plan, skills);
        }

        let agents = self.create_sub_agents(goal, plan, skills, strategy)?;
        if agents.is_empty() {
            return Err(ChorusError::InvalidStrategy(format!(
                "{} strategy produced no agents: no grouping names a known phase",
                strategy.coordination_type
            )));
        }

        let mut graph = build_dependency_graph(agents)?;
        assign_roles(&mut graph);

        let order = layered_order(&graph);
        let graph = graph.with_execution_order(order.layers, order.cycle_detected);

        info!(
            agents = graph.len(),
            layers = graph.execution_order.len(),
            cycle_detected = graph.cycle_detected,
            "Generated sub-agent graph"
        );
        Ok(graph)
    }

    fn single_agent_graph(
        &self,
        goal: &GoalDefinition,
        plan: &ExecutionPlan,
        skills: &[SkillDefinition],
    ) -> Result<AgentDependencyGraph> {
        let capabilities = plan.capabilities();
        let matched: Vec<SkillDefinition> = if capabilities.is_empty() {
            skills.to_vec()
        } else {
            skills
                .iter()
                .filter(|s| s.provides_any(&capabilities))
                .cloned()
                .collect()
        };

        let agent = SubAgentDefinition::new(
            format!("agent-{}", goal.domain),
            goal.clone(),
            plan.clone(),
        )?
        .with_role(AgentRole::Leader)
        .with_skills(matched);
        let id = agent.id;

        let mut nodes = IndexMap::new();
        nodes.insert(id, agent);
        let graph = AgentDependencyGraph::new(nodes, IndexMap::new())?;

        debug!(agent = %id, "Single agent graph");
        Ok(graph.with_execution_order(vec![vec![id]], false))
    }

    fn create_sub_agents(
        &self,
        goal: &GoalDefinition,
        plan: &ExecutionPlan,
        skills: &[SkillDefinition],
        strategy: &CoordinationStrategy,
    ) -> Result<Vec<SubAgentDefinition>> {
        let mut agents = Vec::new();

        for (index, grouping) in strategy.agent_groupings.iter().enumerate() {
            let phases: Vec<PlanPhase> = grouping
                .iter()
                .filter_map(|name| plan.phase(name))
                .cloned()
                .collect();
            if phases.is_empty() {
                debug!(index, "Skipping grouping with no known phases");
                continue;
            }

            let agent_goal = sub_goal(goal, &phases, index);
            let agent_plan = sub_plan(plan, phases);
            let required = agent_plan.required_skills.clone();
            let matched: Vec<SkillDefinition> = skills
                .iter()
                .filter(|s| s.provides_any(&required))
                .cloned()
                .collect();

            let name = format!("agent-{}-{}", index + 1, agent_goal.domain);
            let mut agent =
                SubAgentDefinition::new(name, agent_goal, agent_plan)?.with_skills(matched);
            agent.shared_state_keys = shared_state_keys(&agent);
            agents.push(agent);
        }
        Ok(agents)
    }
}

/// Most frequent leading capability token; first seen wins ties
fn infer_domain(phases: &[PlanPhase]) -> Option<String> {
    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    let mut seen: Vec<&str> = Vec::new();
    for cap in phases.iter().flat_map(|p| &p.required_capabilities) {
        if seen.contains(&cap.as_str()) {
            continue;
        }
        seen.push(cap);
        *counts.entry(capability_domain(cap)).or_default() += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for (domain, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((domain, count));
        }
    }
    best.map(|(domain, _)| domain.to_string())
}

fn sub_goal(parent: &GoalDefinition, phases: &[PlanPhase], index: usize) -> GoalDefinition {
    let descriptions: Vec<&str> = phases.iter().map(|p| p.description.as_str()).collect();
    let text = format!("Sub-goal {}: {}", index + 1, descriptions.join("; "));

    let domain = if phases.iter().all(|p| p.required_capabilities.is_empty()) {
        "general".to_string()
    } else {
        infer_domain(phases).unwrap_or_else(|| parent.domain.clone())
    };

    let mut context = serde_json::Map::new();
    context.insert("parent_goal".to_string(), json!(parent.goal));
    context.insert("agent_index".to_string(), json!(index));
    context.insert("phase_count".to_string(), json!(phases.len()));

    GoalDefinition {
        goal: text,
        domain,
        constraints: parent.constraints.clone(),
        success_criteria: phases
            .iter()
            .flat_map(|p| p.success_indicators.iter().cloned())
            .collect(),
        context,
        complexity: parent.complexity,
    }
}

fn sub_plan(parent: &ExecutionPlan, phases: Vec<PlanPhase>) -> ExecutionPlan {
    let minutes: f64 = phases
        .iter()
        .map(|p| duration::minutes_or(&p.estimated_duration, DEFAULT_PHASE_MINUTES))
        .sum();

    let mut required_skills: Vec<String> = Vec::new();
    for cap in phases.iter().flat_map(|p| &p.required_capabilities) {
        if !required_skills.contains(cap) {
            required_skills.push(cap.clone());
        }
    }

    let opportunities = parallel_opportunities(&phases);
    ExecutionPlan {
        goal_id: parent.goal_id,
        phases,
        total_estimated_duration: duration::format_minutes(minutes),
        required_skills,
        parallel_opportunities: opportunities,
        risk_factors: Vec::new(),
    }
}

fn shared_state_keys(agent: &SubAgentDefinition) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    let mut push = |key: String| {
        if !keys.contains(&key) {
            keys.push(key);
        }
    };

    for phase in &agent.plan.phases {
        for dep in &phase.dependencies {
            push(phase_output_key(dep));
        }
        push(phase.output_key());
        push(phase.status_key());
    }
    push(agent.status_key());
    push(agent.progress_key());
    keys
}

/// Edge from each agent to the owners of phases it depends on
fn build_dependency_graph(mut agents: Vec<SubAgentDefinition>) -> Result<AgentDependencyGraph> {
    let owner: HashMap<String, AgentId> = agents
        .iter()
        .flat_map(|a| a.plan.phases.iter().map(move |p| (p.name.clone(), a.id)))
        .collect();

    let mut edges: IndexMap<AgentId, Vec<AgentId>> = IndexMap::new();
    for agent in &mut agents {
        let mut deps: Vec<AgentId> = Vec::new();
        for dep in agent.plan.phases.iter().flat_map(|p| &p.dependencies) {
            if let Some(&owner_id) = owner.get(dep) {
                if owner_id != agent.id && !deps.contains(&owner_id) {
                    deps.push(owner_id);
                }
            }
        }
        agent.dependencies = deps.clone();
        edges.insert(agent.id, deps);
    }

    let nodes = agents.into_iter().map(|a| (a.id, a)).collect();
    AgentDependencyGraph::new(nodes, edges)
}

/// Leader is the first root, monitor the last leaf when distinct
fn assign_roles(graph: &mut AgentDependencyGraph) {
    let leader = match graph.roots().first().copied() {
        Some(id) => id,
        None => match graph.nodes.keys().next().copied() {
            Some(id) => id,
            None => return,
        },
    };
    let monitor = graph.leaves().last().copied().filter(|id| *id != leader);

    for (id, agent) in graph.nodes.iter_mut() {
        agent.role = if *id == leader {
            AgentRole::Leader
        } else if Some(*id) == monitor {
            AgentRole::Monitor
        } else {
            AgentRole::Worker
        };
    }
}
