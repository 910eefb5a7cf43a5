//! Chorus CLI - multi-agent plan coordination
//!
//! Usage:
//!   chorus init                 Write default config and an example plan
//!   chorus analyze <plan>       Show the coordination strategy for a plan
//!   chorus plan <plan>          Build the sub-agent dependency graph
//!   chorus run <plan>           Dry-run the graph with the echo runner
//!   chorus state show           Inspect the shared state snapshot
//!   chorus state clear          Empty the shared state snapshot

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chorus_core::{
    AgentDependencyGraph, ChorusConfig, CoordinationStrategy, ExecutionPlan, GoalDefinition,
    SkillDefinition,
};
use chorus_orchestrator::{EchoRunner, OrchestrationLayer, OrchestratorConfig, SharedStateManager};
use chorus_planning::{
    chained_plan, example_goal, example_skills, minimal_plan, parallel_plan, CoordinationAnalyzer,
    SubAgentGenerator,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "chorus")]
#[command(author, version, about = "Multi-agent plan coordination")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Repository root holding .chorus/
    #[arg(short = 'C', long, global = true, default_value = ".")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write .chorus/config.toml and an example plan
    Init {
        /// Example plan to write to .chorus/plan.json
        #[arg(long, value_enum, default_value = "parallel")]
        example: ExamplePlan,
    },

    /// Show the plan assessment and chosen coordination strategy
    Analyze {
        /// ExecutionPlan JSON file
        plan: PathBuf,

        /// Print the strategy as JSON
        #[arg(long)]
        json: bool,
    },

    /// Build the sub-agent dependency graph for a plan
    Plan {
        #[command(flatten)]
        input: PlanInput,

        /// Write the graph as JSON
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Execute the graph with the echo runner
    Run(RunArgs),

    /// Shared state snapshot management
    State {
        #[command(subcommand)]
        action: StateCommands,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// Print stored values and recent events
    Show {
        /// Only show this key
        #[arg(long)]
        key: Option<String>,

        /// Number of recent events to show
        #[arg(long, default_value = "10")]
        events: usize,
    },

    /// Remove every stored value
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExamplePlan {
    Parallel,
    Chained,
    Minimal,
}

#[derive(clap::Args)]
struct PlanInput {
    /// ExecutionPlan JSON file
    plan: PathBuf,

    /// GoalDefinition JSON file
    #[arg(long, value_name = "FILE")]
    goal: Option<PathBuf>,

    /// JSON array of SkillDefinition
    #[arg(long, value_name = "FILE")]
    skills: Option<PathBuf>,

    /// Use the built-in example goal and skill pool
    #[arg(long, conflicts_with_all = ["goal", "skills"])]
    examples: bool,
}

#[derive(clap::Args)]
struct RunArgs {
    #[command(flatten)]
    input: PlanInput,

    /// Maximum agents running at once (overrides config)
    #[arg(long)]
    max_agents: Option<usize>,

    /// Whole-run timeout in seconds (overrides config)
    #[arg(long)]
    timeout: Option<u64>,

    /// Simulated time per phase in milliseconds
    #[arg(long, default_value = "0")]
    delay_ms: u64,

    /// Keep phase outputs, agent status and messages from earlier runs
    #[arg(long)]
    keep_state: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ChorusConfig::load_or_default(&cli.dir).context("Failed to load .chorus/config.toml")?;

    match cli.command {
        Commands::Init { example } => cmd_init(&cli.dir, example).await,
        Commands::Analyze { plan, json } => cmd_analyze(&config, &plan, json).await,
        Commands::Plan { input, output } => cmd_plan(&config, &input, output).await,
        Commands::Run(args) => cmd_run(&cli.dir, &config, &args).await,
        Commands::State { action } => cmd_state(&cli.dir, &config, action).await,
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {} file {:?}", what, path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {} JSON {:?}", what, path))
}

/// Load the plan with its goal and skill pool
async fn load_input(input: &PlanInput) -> Result<(ExecutionPlan, GoalDefinition, Vec<SkillDefinition>)> {
    let plan: ExecutionPlan = read_json(&input.plan, "plan").await?;
    if input.examples {
        return Ok((plan, example_goal(), example_skills()));
    }

    let goal = match &input.goal {
        Some(path) => read_json(path, "goal").await?,
        None => {
            let name = input
                .plan
                .file_stem()
                .and_then(|n| n.to_str())
                .unwrap_or("plan");
            GoalDefinition::new(format!("Execute {}", name), "general")
        }
    };
    let skills = match &input.skills {
        Some(path) => read_json(path, "skills").await?,
        None => Vec::new(),
    };
    Ok((plan, goal, skills))
}

fn build_graph(
    config: &ChorusConfig,
    plan: &ExecutionPlan,
    goal: &GoalDefinition,
    skills: &[SkillDefinition],
) -> Result<(CoordinationStrategy, AgentDependencyGraph)> {
    let strategy = CoordinationAnalyzer::new(config.analyzer.clone()).analyze(plan);
    let graph = SubAgentGenerator::new()
        .generate(goal, plan, skills, &strategy)
        .context("Failed to generate sub-agents")?;
    Ok((strategy, graph))
}

fn print_graph(graph: &AgentDependencyGraph) {
    if graph.cycle_detected {
        println!("Warning: dependency cycle detected, agents run in a single layer");
    }
    for (index, layer) in graph.execution_order.iter().enumerate() {
        println!("Layer {}:", index + 1);
        for id in layer {
            let Some(agent) = graph.node(id) else { continue };
            let phases: Vec<&str> = agent.plan.phases.iter().map(|p| p.name.as_str()).collect();
            let deps: Vec<String> = graph
                .dependencies_of(id)
                .iter()
                .filter_map(|d| graph.node(d).map(|a| a.name.clone()))
                .collect();
            print!("  {} [{}] phases: {}", agent.name, agent.role, phases.join(", "));
            if !deps.is_empty() {
                print!(" (after {})", deps.join(", "));
            }
            println!();
        }
    }
}

async fn cmd_init(dir: &Path, example: ExamplePlan) -> Result<()> {
    info!("Initializing Chorus in {:?}", dir);

    let config_path = ChorusConfig::write_default(dir).context("Failed to write config")?;

    let plan = match example {
        ExamplePlan::Parallel => parallel_plan(),
        ExamplePlan::Chained => chained_plan(),
        ExamplePlan::Minimal => minimal_plan(),
    };
    let plan_path = dir.join(".chorus/plan.json");
    tokio::fs::write(&plan_path, serde_json::to_string_pretty(&plan)?).await?;

    println!("Initialized Chorus in {:?}", dir);
    println!("Created:");
    println!("  {}", config_path.display());
    println!("  {}", plan_path.display());
    println!("\nNext: chorus run {} --examples", plan_path.display());
    Ok(())
}

async fn cmd_analyze(config: &ChorusConfig, plan_path: &Path, json: bool) -> Result<()> {
    let plan: ExecutionPlan = read_json(plan_path, "plan").await?;
    let analyzer = CoordinationAnalyzer::new(config.analyzer.clone());
    let strategy = analyzer.analyze(&plan);

    if json {
        println!("{}", serde_json::to_string_pretty(&strategy)?);
        return Ok(());
    }

    println!("{}", analyzer.assess(&plan));
    println!();
    println!("Strategy: {}", strategy.coordination_type);
    println!("Agents: {}", strategy.agent_count);
    println!("Coordination overhead: {:.0}%", strategy.coordination_overhead * 100.0);
    println!("Parallelization benefit: {:.0}%", strategy.parallelization_benefit * 100.0);
    for (index, group) in strategy.agent_groupings.iter().enumerate() {
        println!("  Group {}: {}", index + 1, group.join(", "));
    }
    println!("\n{}", strategy.recommendation_reason);
    Ok(())
}

async fn cmd_plan(config: &ChorusConfig, input: &PlanInput, output: Option<PathBuf>) -> Result<()> {
    let (plan, goal, skills) = load_input(input).await?;
    let (strategy, graph) = build_graph(config, &plan, &goal, &skills)?;

    println!(
        "Strategy {} -> {} agents in {} layers\n",
        strategy.coordination_type,
        graph.len(),
        graph.execution_order.len()
    );
    print_graph(&graph);

    if let Some(path) = output {
        tokio::fs::write(&path, serde_json::to_string_pretty(&graph)?)
            .await
            .with_context(|| format!("Failed to write graph to {:?}", path))?;
        println!("\nWrote {}", path.display());
    }
    Ok(())
}

async fn cmd_run(dir: &Path, config: &ChorusConfig, args: &RunArgs) -> Result<()> {
    let (plan, goal, skills) = load_input(&args.input).await?;
    let (_, graph) = build_graph(config, &plan, &goal, &skills)?;

    let mut orchestrator_config = OrchestratorConfig::from_settings(&config.orchestrator);
    if let Some(max) = args.max_agents {
        orchestrator_config = orchestrator_config.with_max_concurrent_agents(max);
    }
    if let Some(secs) = args.timeout {
        orchestrator_config = orchestrator_config.with_timeout(Duration::from_secs(secs));
    }

    let store = Arc::new(open_store(dir, config));
    let runner = EchoRunner::new().with_delay(Duration::from_millis(args.delay_ms));
    let orchestrator = OrchestrationLayer::new(Arc::clone(&store), Arc::new(runner), orchestrator_config);
    if !args.keep_state {
        let removed = orchestrator.reset_run_state();
        info!(removed, "Reset state from the previous run");
    }

    info!(agents = graph.len(), "Running dry run");
    let result = orchestrator.orchestrate(&graph).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result);
        println!("Completion rate: {:.0}%", result.completion_rate() * 100.0);
        for (id, error) in &result.errors {
            let name = graph.node(id).map(|a| a.name.as_str()).unwrap_or("unknown");
            println!("  {} failed: {}", name, error);
        }
        for error in &result.orchestration_errors {
            println!("  {}", error);
        }
        if let Some(path) = store.snapshot_path() {
            println!("State written to {}", path.display());
        }
    }

    if !result.success {
        anyhow::bail!("Orchestration did not complete");
    }
    Ok(())
}

fn open_store(dir: &Path, config: &ChorusConfig) -> SharedStateManager {
    let mut state = config.state.clone();
    state.snapshot_path = dir.join(&state.snapshot_path);
    SharedStateManager::from_config(&state)
}

async fn cmd_state(dir: &Path, config: &ChorusConfig, action: StateCommands) -> Result<()> {
    let store = open_store(dir, config);

    match action {
        StateCommands::Show { key, events } => {
            match key {
                Some(key) => match store.entry(&key) {
                    Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
                    None => println!("No value stored under {}", key),
                },
                None => {
                    let all = store.get_all();
                    println!("{} keys", all.len());
                    for (key, value) in &all {
                        println!("  {} = {}", key, value);
                    }
                }
            }

            let log = store.event_log(Some(events));
            if !log.is_empty() {
                println!("\nRecent events:");
                for event in log {
                    println!("  {} {} {}", event.timestamp.to_rfc3339(), event.event_type, event.data);
                }
            }
        }
        StateCommands::Clear => {
            store.clear();
            println!("Cleared shared state");
        }
    }
    Ok(())
}
