//! Core type definitions for Chorus coordination

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{ChorusError, Result};

/// Identifier of a generated sub-agent
pub type AgentId = Uuid;

/// Version tag stamped on every sub-agent and coordination message
pub const PROTOCOL_VERSION: &str = "v1";

fn default_true() -> bool {
    true
}

/// Single phase of an execution plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanPhase {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Free-text estimate, e.g. "20 minutes" or "1 hour"
    #[serde(default)]
    pub estimated_duration: String,
    /// Names of prerequisite phases
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Whether this phase may run alongside others
    #[serde(default = "default_true")]
    pub parallel_safe: bool,
    #[serde(default)]
    pub success_indicators: Vec<String>,
}

impl PlanPhase {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required_capabilities: Vec::new(),
            estimated_duration: String::new(),
            dependencies: Vec::new(),
            parallel_safe: true,
            success_indicators: Vec::new(),
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_duration(mut self, estimate: impl Into<String>) -> Self {
        self.estimated_duration = estimate.into();
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_success_indicators<I, S>(mut self, indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.success_indicators = indicators.into_iter().map(Into::into).collect();
        self
    }

    /// Mark the phase as unsafe to run in parallel
    pub fn sequential(mut self) -> Self {
        self.parallel_safe = false;
        self
    }

    pub fn depends_on(&self, other: &str) -> bool {
        self.dependencies.iter().any(|d| d == other)
    }

    /// Store key holding this phase's output
    pub fn output_key(&self) -> String {
        phase_output_key(&self.name)
    }

    /// Store key holding this phase's status
    pub fn status_key(&self) -> String {
        format!("phase.{}.status", self.name)
    }
}

/// Store key holding the output of the phase called `name`
pub fn phase_output_key(name: &str) -> String {
    format!("phase.{}.output", name)
}

/// Multi-phase plan for achieving a goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    #[serde(default = "Uuid::new_v4")]
    pub goal_id: Uuid,
    pub phases: Vec<PlanPhase>,
    #[serde(default)]
    pub total_estimated_duration: String,
    #[serde(default)]
    pub required_skills: Vec<String>,
    /// Declared groups of phase names that may run concurrently
    #[serde(default)]
    pub parallel_opportunities: Vec<Vec<String>>,
    #[serde(default)]
    pub risk_factors: Vec<String>,
}

impl ExecutionPlan {
    pub fn new(phases: Vec<PlanPhase>) -> Self {
        Self {
            goal_id: Uuid::new_v4(),
            phases,
            total_estimated_duration: String::new(),
            required_skills: Vec::new(),
            parallel_opportunities: Vec::new(),
            risk_factors: Vec::new(),
        }
    }

    pub fn with_total_duration(mut self, estimate: impl Into<String>) -> Self {
        self.total_estimated_duration = estimate.into();
        self
    }

    pub fn with_parallel_opportunities(mut self, groups: Vec<Vec<String>>) -> Self {
        self.parallel_opportunities = groups;
        self
    }

    pub fn with_required_skills(mut self, skills: Vec<String>) -> Self {
        self.required_skills = skills;
        self
    }

    pub fn phase_count(&self) -> usize {
        self.phases.len()
    }

    pub fn phase(&self, name: &str) -> Option<&PlanPhase> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Every capability tag required by any phase, in first-seen order
    pub fn capabilities(&self) -> Vec<String> {
        let mut caps: Vec<String> = Vec::new();
        for cap in self.phases.iter().flat_map(|p| &p.required_capabilities) {
            if !caps.contains(cap) {
                caps.push(cap.clone());
            }
        }
        caps
    }
}

/// Estimated goal complexity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    #[default]
    Moderate,
    Complex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Moderate => write!(f, "moderate"),
            Self::Complex => write!(f, "complex"),
        }
    }
}

impl std::str::FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "moderate" => Ok(Self::Moderate),
            "complex" => Ok(Self::Complex),
            _ => Err(format!("Invalid complexity: {}", s)),
        }
    }
}

/// What the operator asked for, already interpreted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalDefinition {
    pub goal: String,
    /// e.g. "data-processing", "security-analysis"
    pub domain: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub complexity: Complexity,
}

impl GoalDefinition {
    pub fn new(goal: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            domain: domain.into(),
            constraints: Vec::new(),
            success_criteria: Vec::new(),
            context: Map::new(),
            complexity: Complexity::default(),
        }
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_success_criteria(mut self, criteria: Vec<String>) -> Self {
        self.success_criteria = criteria;
        self
    }
}

/// A reusable skill an agent can be equipped with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl SkillDefinition {
    pub fn new<I, S>(name: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: String::new(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }

    /// True if the skill offers at least one of the given capabilities
    pub fn provides_any(&self, capabilities: &[String]) -> bool {
        self.capabilities.iter().any(|c| capabilities.contains(c))
    }
}

/// How work is divided between agents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationType {
    #[default]
    Single,
    MultiParallel,
    MultiSequential,
    Hybrid,
}

impl CoordinationType {
    pub fn is_multi_agent(&self) -> bool {
        !matches!(self, Self::Single)
    }
}

impl std::fmt::Display for CoordinationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::MultiParallel => write!(f, "multi_parallel"),
            Self::MultiSequential => write!(f, "multi_sequential"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for CoordinationType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "single" => Ok(Self::Single),
            "multi_parallel" | "parallel" => Ok(Self::MultiParallel),
            "multi_sequential" | "sequential" => Ok(Self::MultiSequential),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(format!("Invalid coordination type: {}", s)),
        }
    }
}

/// Chosen way of splitting a plan across agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationStrategy {
    pub coordination_type: CoordinationType,
    pub agent_count: usize,
    /// Phase names owned by each prospective agent
    pub agent_groupings: Vec<Vec<String>>,
    /// Expected cost of coordinating, 0.0-1.0
    pub coordination_overhead: f64,
    /// Expected gain from splitting, 0.0-1.0
    pub parallelization_benefit: f64,
    pub recommendation_reason: String,
}

impl CoordinationStrategy {
    /// Build a validated strategy
    pub fn new(
        coordination_type: CoordinationType,
        agent_groupings: Vec<Vec<String>>,
        coordination_overhead: f64,
        parallelization_benefit: f64,
        recommendation_reason: impl Into<String>,
    ) -> Result<Self> {
        let strategy = Self {
            coordination_type,
            agent_count: agent_groupings.len().max(1),
            agent_groupings,
            coordination_overhead,
            parallelization_benefit,
            recommendation_reason: recommendation_reason.into(),
        };
        strategy.validate()?;
        Ok(strategy)
    }

    /// One agent, no groupings, no overhead
    pub fn single(reason: impl Into<String>) -> Self {
        Self {
            coordination_type: CoordinationType::Single,
            agent_count: 1,
            agent_groupings: Vec::new(),
            coordination_overhead: 0.0,
            parallelization_benefit: 0.0,
            recommendation_reason: reason.into(),
        }
    }

    /// Check the invariants a deserialized strategy may have skipped
    pub fn validate(&self) -> Result<()> {
        if self.agent_count < 1 {
            return Err(ChorusError::InvalidStrategy(format!(
                "agent count must be >= 1, got {}",
                self.agent_count
            )));
        }
        if !(0.0..=1.0).contains(&self.coordination_overhead) {
            return Err(ChorusError::InvalidStrategy(format!(
                "coordination overhead must be 0-1, got {}",
                self.coordination_overhead
            )));
        }
        if !(0.0..=1.0).contains(&self.parallelization_benefit) {
            return Err(ChorusError::InvalidStrategy(format!(
                "parallelization benefit must be 0-1, got {}",
                self.parallelization_benefit
            )));
        }
        if self.coordination_type.is_multi_agent() && self.recommendation_reason.trim().is_empty() {
            return Err(ChorusError::InvalidStrategy(
                "multi-agent strategies must include a recommendation reason".to_string(),
            ));
        }
        Ok(())
    }
}

/// Role of a sub-agent within the dependency graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// First root of the graph
    Leader,
    #[default]
    Worker,
    /// Last leaf of the graph
    Monitor,
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leader => write!(f, "leader"),
            Self::Worker => write!(f, "worker"),
            Self::Monitor => write!(f, "monitor"),
        }
    }
}

impl std::str::FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "leader" => Ok(Self::Leader),
            "worker" => Ok(Self::Worker),
            "monitor" => Ok(Self::Monitor),
            _ => Err(format!("Invalid agent role: {}", s)),
        }
    }
}

/// A generated sub-agent owning part of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAgentDefinition {
    pub id: AgentId,
    pub name: String,
    pub role: AgentRole,
    pub goal: GoalDefinition,
    pub plan: ExecutionPlan,
    #[serde(default)]
    pub skills: Vec<SkillDefinition>,
    /// Agents that must finish first
    #[serde(default)]
    pub dependencies: Vec<AgentId>,
    /// Store keys this agent reads or writes
    #[serde(default)]
    pub shared_state_keys: Vec<String>,
    pub coordination_protocol: String,
    pub created_at: DateTime<Utc>,
}

impl SubAgentDefinition {
    pub fn new(name: impl Into<String>, goal: GoalDefinition, plan: ExecutionPlan) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ChorusError::InvalidDefinition(
                "sub-agent must have a name".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            role: AgentRole::Worker,
            goal,
            plan,
            skills: Vec::new(),
            dependencies: Vec::new(),
            shared_state_keys: Vec::new(),
            coordination_protocol: PROTOCOL_VERSION.to_string(),
            created_at: Utc::now(),
        })
    }

    pub fn with_role(mut self, role: AgentRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_skills(mut self, skills: Vec<SkillDefinition>) -> Self {
        self.skills = skills;
        self
    }

    pub fn with_shared_state_keys(mut self, keys: Vec<String>) -> Self {
        self.shared_state_keys = keys;
        self
    }

    /// Store key holding this agent's lifecycle status
    pub fn status_key(&self) -> String {
        format!("agent.{}.status", self.id)
    }

    /// Store key holding this agent's progress fraction
    pub fn progress_key(&self) -> String {
        format!("agent.{}.progress", self.id)
    }
}

/// Sub-agents plus the prerequisite relation between them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentDependencyGraph {
    /// Agents in generation order
    pub nodes: IndexMap<AgentId, SubAgentDefinition>,
    /// Dependent -> prerequisites
    pub edges: IndexMap<AgentId, Vec<AgentId>>,
    /// Layers; every agent of layer i depends only on agents in earlier layers
    pub execution_order: Vec<Vec<AgentId>>,
    /// Set when layering hit a cycle and fell back to a single layer
    #[serde(default)]
    pub cycle_detected: bool,
}

impl AgentDependencyGraph {
    /// Build a graph, rejecting edges that reference unknown agents
    ///
    /// Every node gets an edge entry, empty when it has no prerequisites. The
    /// execution order starts empty; see `with_execution_order`.
    pub fn new(
        nodes: IndexMap<AgentId, SubAgentDefinition>,
        mut edges: IndexMap<AgentId, Vec<AgentId>>,
    ) -> Result<Self> {
        for (agent, deps) in &edges {
            if !nodes.contains_key(agent) {
                return Err(ChorusError::InvalidGraph(format!(
                    "edge references non-existent agent: {}",
                    agent
                )));
            }
            if let Some(missing) = deps.iter().find(|d| !nodes.contains_key(*d)) {
                return Err(ChorusError::InvalidGraph(format!(
                    "dependency references non-existent agent: {}",
                    missing
                )));
            }
        }
        for id in nodes.keys() {
            edges.entry(*id).or_default();
        }
        Ok(Self {
            nodes,
            edges,
            execution_order: Vec::new(),
            cycle_detected: false,
        })
    }

    pub fn with_execution_order(mut self, order: Vec<Vec<AgentId>>, cycle_detected: bool) -> Self {
        self.execution_order = order;
        self.cycle_detected = cycle_detected;
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &AgentId) -> Option<&SubAgentDefinition> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &AgentId) -> Option<&mut SubAgentDefinition> {
        self.nodes.get_mut(id)
    }

    pub fn dependencies_of(&self, id: &AgentId) -> &[AgentId] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Agents that list `id` as a prerequisite, in node order
    pub fn dependents_of(&self, id: &AgentId) -> Vec<AgentId> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains(id))
            .map(|(agent, _)| *agent)
            .collect()
    }

    /// Agents with no prerequisites, in node order
    pub fn roots(&self) -> Vec<AgentId> {
        self.nodes
            .keys()
            .filter(|id| self.dependencies_of(id).is_empty())
            .copied()
            .collect()
    }

    /// Agents nothing depends on, in node order
    pub fn leaves(&self) -> Vec<AgentId> {
        self.nodes
            .keys()
            .filter(|id| !self.edges.values().any(|deps| deps.contains(id)))
            .copied()
            .collect()
    }

    pub fn layer_of(&self, id: &AgentId) -> Option<usize> {
        self.execution_order
            .iter()
            .position(|layer| layer.contains(id))
    }
}
