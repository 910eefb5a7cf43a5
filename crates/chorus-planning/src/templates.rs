//! Template plans for common coordination shapes

use chorus_core::{Complexity, ExecutionPlan, GoalDefinition, PlanPhase, SkillDefinition};

/// Goal used by the example plans
pub fn example_goal() -> GoalDefinition {
    GoalDefinition::new(
        "Build a nightly sales report from the order, customer, product and inventory systems",
        "data-processing",
    )
    .with_complexity(Complexity::Complex)
    .with_success_criteria(vec![
        "Report published".to_string(),
        "All sources reconciled".to_string(),
    ])
}

/// Four independent fetches fanning into a merge and a report
///
/// Declares the fetches as one parallel opportunity; analyzes as
/// multi_parallel.
pub fn parallel_plan() -> ExecutionPlan {
    let fetch = |name: &str, source: &str| {
        PlanPhase::new(name, format!("Fetch {} records", source))
            .with_capabilities(["data-fetch", "api-client"])
            .with_duration("15 minutes")
            .with_success_indicators([format!("{} records fetched", source)])
    };

    ExecutionPlan::new(vec![
        fetch("fetch-orders", "order"),
        fetch("fetch-customers", "customer"),
        fetch("fetch-products", "product"),
        fetch("fetch-inventory", "inventory"),
        PlanPhase::new("merge", "Join all sources into one dataset")
            .with_capabilities(["data-transform"])
            .with_duration("20 minutes")
            .with_dependencies([
                "fetch-orders",
                "fetch-customers",
                "fetch-products",
                "fetch-inventory",
            ])
            .with_success_indicators(["Dataset reconciled"]),
        PlanPhase::new("report", "Render and publish the report")
            .with_capabilities(["report-render"])
            .with_duration("10 minutes")
            .with_dependencies(["merge"])
            .sequential()
            .with_success_indicators(["Report published"]),
    ])
    .with_total_duration("1.5 hours")
    .with_parallel_opportunities(vec![vec![
        "fetch-orders".to_string(),
        "fetch-customers".to_string(),
        "fetch-products".to_string(),
        "fetch-inventory".to_string(),
    ]])
}

/// Six phases in a strict chain; analyzes as multi_sequential
pub fn chained_plan() -> ExecutionPlan {
    let steps = [
        ("extract", "data-extract"),
        ("validate", "data-validate"),
        ("clean", "data-clean"),
        ("enrich", "data-enrich"),
        ("aggregate", "data-aggregate"),
        ("publish", "report-publish"),
    ];

    let mut previous: Option<&str> = None;
    let phases = steps
        .iter()
        .map(|(name, capability)| {
            let phase = PlanPhase::new(*name, format!("{} the dataset", name))
                .with_capabilities([*capability])
                .with_duration("10 minutes")
                .with_dependencies(previous)
                .with_success_indicators([format!("{} done", name)]);
            previous = Some(*name);
            phase
        })
        .collect();

    ExecutionPlan::new(phases).with_total_duration("1 hour")
}

/// Three short phases; analyzes as single
pub fn minimal_plan() -> ExecutionPlan {
    ExecutionPlan::new(vec![
        PlanPhase::new("read", "Read input")
            .with_capabilities(["file-read"])
            .with_duration("5 minutes"),
        PlanPhase::new("summarize", "Summarize input")
            .with_capabilities(["text-summarize"])
            .with_duration("5 minutes")
            .with_dependencies(["read"]),
        PlanPhase::new("write", "Write summary")
            .with_capabilities(["file-write"])
            .with_duration("5 minutes")
            .with_dependencies(["summarize"]),
    ])
    .with_total_duration("15 minutes")
}

/// Skill pool covering the example plans
pub fn example_skills() -> Vec<SkillDefinition> {
    vec![
        SkillDefinition::new("http-fetcher", ["data-fetch", "api-client"]),
        SkillDefinition::new("dataframe", ["data-transform", "data-clean", "data-aggregate"]),
        SkillDefinition::new("validator", ["data-validate"]),
        SkillDefinition::new("reporter", ["report-render", "report-publish"]),
        SkillDefinition::new("file-io", ["file-read", "file-write"]),
    ]
}
