//! Coordination analysis: should a plan be split, and how

use std::collections::{HashMap, HashSet};

use chorus_core::duration;
use chorus_core::{AnalyzerConfig, CoordinationStrategy, CoordinationType, ExecutionPlan, PlanPhase};
use serde::Serialize;
use tracing::{debug, info, instrument};

/// Fallback when the plan's total estimate cannot be parsed
const DEFAULT_PLAN_MINUTES: f64 = 30.0;

const PARALLEL_OVERHEAD: f64 = 0.15;
const SEQUENTIAL_OVERHEAD: f64 = 0.05;
const HYBRID_OVERHEAD: f64 = 0.20;

const SEQUENTIAL_BENEFIT: f64 = 0.1;
const HYBRID_BENEFIT_SCALE: f64 = 0.8;

const HIGH_POTENTIAL: f64 = 0.6;
const LOW_POTENTIAL: f64 = 0.3;

/// Leading token of a capability tag, e.g. `data` for `data-processing-csv`
///
/// Splits on the first hyphen if there is one, otherwise on the first
/// underscore.
pub fn capability_domain(capability: &str) -> &str {
    let sep = if capability.contains('-') { '-' } else { '_' };
    capability.split(sep).next().unwrap_or(capability)
}

/// Complexity metrics computed for a plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanAssessment {
    pub phase_count: usize,
    pub estimated_minutes: f64,
    pub domain_diversity: usize,
    pub parallelization_potential: f64,
    pub needs_coordination: bool,
}

impl std::fmt::Display for PlanAssessment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Phases: {}", self.phase_count)?;
        writeln!(f, "Estimated duration: {}", duration::format_minutes(self.estimated_minutes))?;
        writeln!(f, "Domain diversity: {}", self.domain_diversity)?;
        writeln!(
            f,
            "Parallelization potential: {:.1}%",
            self.parallelization_potential * 100.0
        )?;
        write!(
            f,
            "Multi-agent coordination: {}",
            if self.needs_coordination { "recommended" } else { "not needed" }
        )
    }
}

/// Chooses a coordination strategy for an execution plan
#[derive(Debug, Clone, Default)]
pub struct CoordinationAnalyzer {
    config: AnalyzerConfig,
}

impl CoordinationAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Compute the metrics the strategy decision is based on
    pub fn assess(&self, plan: &ExecutionPlan) -> PlanAssessment {
        let phase_count = plan.phase_count();
        let estimated_minutes =
            duration::minutes_or(&plan.total_estimated_duration, DEFAULT_PLAN_MINUTES);
        let domain_diversity = domain_diversity(&plan.phases);
        let parallelization_potential = parallelization_potential(plan);

        let needs_coordination = phase_count > 0
            && (phase_count >= self.config.phase_threshold
                || estimated_minutes >= self.config.duration_threshold_minutes
                || domain_diversity >= self.config.domain_threshold);

        PlanAssessment {
            phase_count,
            estimated_minutes,
            domain_diversity,
            parallelization_potential,
            needs_coordination,
        }
    }

    /// Decide how to split the plan
    ///
    /// Never fails; every strategy carries a justification.
    #[instrument(skip(self, plan), fields(goal_id = %plan.goal_id, phases = plan.phase_count()))]
    pub fn analyze(&self, plan: &ExecutionPlan) -> CoordinationStrategy {
        let assessment = self.assess(plan);
        debug!(
            minutes = assessment.estimated_minutes,
            diversity = assessment.domain_diversity,
            potential = assessment.parallelization_potential,
            "Assessed plan"
        );

        if !assessment.needs_coordination {
            info!("Single agent is sufficient");
            return CoordinationStrategy::single("Goal is simple enough for single agent execution");
        }

        let potential = assessment.parallelization_potential;
        let strategy = if potential > HIGH_POTENTIAL && !plan.parallel_opportunities.is_empty() {
            parallel_strategy(plan, potential)
        } else if potential < LOW_POTENTIAL {
            sequential_strategy(plan)
        } else {
            hybrid_strategy(plan, potential)
        };

        debug_assert!(strategy.validate().is_ok());
        info!(
            coordination = %strategy.coordination_type,
            agents = strategy.agent_count,
            "Selected coordination strategy"
        );
        strategy
    }
}

/// Distinct leading tokens across all capability tags
fn domain_diversity(phases: &[PlanPhase]) -> usize {
    phases
        .iter()
        .flat_map(|p| &p.required_capabilities)
        .map(|c| capability_domain(c))
        .collect::<HashSet<_>>()
        .len()
}

fn parallelization_potential(plan: &ExecutionPlan) -> f64 {
    let total = plan.phase_count();
    if total == 0 {
        return 0.0;
    }

    let covered: HashSet<&str> = plan
        .parallel_opportunities
        .iter()
        .flatten()
        .filter(|name| plan.phase(name).is_some())
        .map(String::as_str)
        .collect();
    let independent = plan.phases.iter().filter(|p| p.dependencies.is_empty()).count();

    let group_score = covered.len() as f64 / total as f64;
    let independence_score = independent as f64 / total as f64;
    0.6 * group_score + 0.4 * independence_score
}

/// Claim declared parallel groups first-come; a group is skipped if any of
/// its known phases is already claimed
fn claim_declared_groups(plan: &ExecutionPlan, claimed: &mut HashSet<String>) -> Vec<Vec<String>> {
    let mut groupings = Vec::new();
    for group in &plan.parallel_opportunities {
        let known: Vec<String> = group
            .iter()
            .filter(|name| plan.phase(name).is_some())
            .cloned()
            .collect();
        if known.is_empty() || known.iter().any(|name| claimed.contains(name)) {
            continue;
        }
        claimed.extend(known.iter().cloned());
        groupings.push(known);
    }
    groupings
}

fn multi_strategy(
    coordination_type: CoordinationType,
    agent_groupings: Vec<Vec<String>>,
    coordination_overhead: f64,
    parallelization_benefit: f64,
    recommendation_reason: String,
) -> CoordinationStrategy {
    CoordinationStrategy {
        coordination_type,
        agent_count: agent_groupings.len().max(1),
        agent_groupings,
        coordination_overhead,
        parallelization_benefit: parallelization_benefit.clamp(0.0, 1.0),
        recommendation_reason,
    }
}

fn parallel_strategy(plan: &ExecutionPlan, potential: f64) -> CoordinationStrategy {
    let mut claimed = HashSet::new();
    let mut groupings = claim_declared_groups(plan, &mut claimed);
    for phase in &plan.phases {
        if claimed.insert(phase.name.clone()) {
            groupings.push(vec![phase.name.clone()]);
        }
    }

    let reason = format!(
        "High parallelization potential ({:.1}%) with {} parallel opportunities. \
         Splitting into {} parallel agents will reduce total execution time.",
        potential * 100.0,
        plan.parallel_opportunities.len(),
        groupings.len()
    );
    multi_strategy(
        CoordinationType::MultiParallel,
        groupings,
        PARALLEL_OVERHEAD,
        potential,
        reason,
    )
}

fn sequential_strategy(plan: &ExecutionPlan) -> CoordinationStrategy {
    let phases: Vec<&PlanPhase> = plan.phases.iter().collect();
    let groupings = dependency_chains(&phases);

    let reason = format!(
        "Phases have strong dependencies requiring sequential execution. \
         Splitting into {} specialized agents improves modularity and allows \
         independent failure handling.",
        groupings.len()
    );
    multi_strategy(
        CoordinationType::MultiSequential,
        groupings,
        SEQUENTIAL_OVERHEAD,
        SEQUENTIAL_BENEFIT,
        reason,
    )
}

fn hybrid_strategy(plan: &ExecutionPlan, potential: f64) -> CoordinationStrategy {
    let mut claimed = HashSet::new();
    let mut groupings = claim_declared_groups(plan, &mut claimed);
    let remaining: Vec<&PlanPhase> = plan
        .phases
        .iter()
        .filter(|p| !claimed.contains(&p.name))
        .collect();
    groupings.extend(dependency_chains(&remaining));

    let reason = format!(
        "Mixed parallelization potential ({:.1}%) with some dependencies. \
         Using {} agents in hybrid coordination balances parallel execution \
         with dependency management.",
        potential * 100.0,
        groupings.len()
    );
    multi_strategy(
        CoordinationType::Hybrid,
        groupings,
        HYBRID_OVERHEAD,
        potential * HYBRID_BENEFIT_SCALE,
        reason,
    )
}

/// Split phases into dependency-ordered chains
///
/// Chains start at phases with no in-set dependency and follow, at each
/// step, the unvisited dependent with the longest downstream path (ties go to
/// declaration order). Phases never reached become singleton chains.
pub fn dependency_chains(phases: &[&PlanPhase]) -> Vec<Vec<String>> {
    let names: HashSet<&str> = phases.iter().map(|p| p.name.as_str()).collect();

    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for phase in phases {
        for dep in &phase.dependencies {
            if names.contains(dep.as_str()) {
                dependents.entry(dep.as_str()).or_default().push(phase.name.as_str());
            }
        }
    }

    let mut depth_memo = HashMap::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut chains = Vec::new();

    let roots = phases
        .iter()
        .filter(|p| !p.dependencies.iter().any(|d| names.contains(d.as_str())))
        .map(|p| p.name.as_str());

    for root in roots {
        if !visited.insert(root) {
            continue;
        }
        let mut chain = vec![root.to_string()];
        let mut current = root;
        loop {
            let next = dependents
                .get(current)
                .into_iter()
                .flatten()
                .filter(|d| !visited.contains(*d))
                .fold(None::<(&str, usize)>, |best, &candidate| {
                    let depth = downstream_depth(
                        candidate,
                        &dependents,
                        &mut depth_memo,
                        &mut HashSet::new(),
                    );
                    match best {
                        Some((_, best_depth)) if best_depth >= depth => best,
                        _ => Some((candidate, depth)),
                    }
                });
            let Some((next, _)) = next else { break };
            visited.insert(next);
            chain.push(next.to_string());
            current = next;
        }
        chains.push(chain);
    }

    for phase in phases {
        if visited.insert(phase.name.as_str()) {
            chains.push(vec![phase.name.clone()]);
        }
    }
    chains
}

/// Length of the longest dependent path starting at `name`
fn downstream_depth<'a>(
    name: &'a str,
    dependents: &HashMap<&'a str, Vec<&'a str>>,
    memo: &mut HashMap<&'a str, usize>,
    on_path: &mut HashSet<&'a str>,
) -> usize {
    if let Some(depth) = memo.get(name) {
        return *depth;
    }
    // Cycle guard; a back edge contributes nothing.
    if !on_path.insert(name) {
        return 0;
    }
    let depth = 1 + dependents
        .get(name)
        .into_iter()
        .flatten()
        .map(|d| downstream_depth(*d, dependents, memo, on_path))
        .max()
        .unwrap_or(0);
    on_path.remove(name);
    memo.insert(name, depth);
    depth
}
