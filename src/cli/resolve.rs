use std::path::PathBuf;
use std::sync::Arc;

use action_flow::{interpolate_step, load_playbook_file, Variables};
use action_locator::{HealingResult, HealingStats};
use action_primitives::FixturePage;
use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use serde::Serialize;

use super::context::CliContext;
use super::output::{print_structured, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct ResolveArgs {
    /// Playbook file (.yaml, .yml or .json)
    #[arg(value_name = "PLAYBOOK")]
    pub playbook: PathBuf,

    /// Fixture page to resolve against (.yaml or .json)
    #[arg(long, value_name = "FILE")]
    pub page: PathBuf,

    /// Id of the step whose target is resolved
    #[arg(long, value_name = "ID")]
    pub step: String,
}

#[derive(Serialize)]
struct ResolveReport<'a> {
    step: &'a str,
    result: &'a HealingResult,
    stats: &'a HealingStats,
}

pub async fn cmd_resolve(args: ResolveArgs, ctx: &CliContext, output: OutputFormat) -> Result<()> {
    let playbook = load_playbook_file(&args.playbook)
        .with_context(|| format!("Failed to load {}", args.playbook.display()))?;
    let step = playbook
        .find_step(&args.step)
        .ok_or_else(|| anyhow!("step '{}' not found in {}", args.step, playbook.metadata.id))?;

    // Selectors may reference variables; their defaults stand in for run input.
    let defaults: Variables = playbook
        .variables
        .iter()
        .filter_map(|(name, def)| def.default.clone().map(|value| (name.clone(), value)))
        .collect();
    let step = interpolate_step(step, &defaults);

    let page = FixturePage::from_path(&args.page)
        .with_context(|| format!("Failed to load page fixture {}", args.page.display()))?;
    let executor = ctx.executor(Arc::new(page));
    let result = executor.resolve(&step).await;
    let stats = executor.healing_stats();

    let report = ResolveReport {
        step: &step.id,
        result: &result,
        stats: &stats,
    };
    if !print_structured(&report, output)? {
        if result.success {
            println!(
                "Step {} resolved via {} -> {}",
                step.id,
                result.strategy.map(|s| s.name()).unwrap_or("unknown"),
                result.selector.as_deref().unwrap_or("-")
            );
            if result.is_healed() {
                println!("  healed: the recorded selector no longer matched");
            }
            if let Some(record) = &result.record {
                println!(
                    "  record: {} -> {} ({})",
                    record.original_selector,
                    record.healed_selector,
                    record.strategy.name()
                );
            }
        } else {
            println!(
                "Step {} could not be resolved: {}",
                step.id,
                result.error.as_deref().unwrap_or("no strategy matched")
            );
        }
        println!(
            "Stats: {} attempt(s), {:.0}% success",
            stats.total, stats.success_rate
        );
        for (kind, count) in &stats.by_strategy {
            println!("  {:<12} {}", kind.name(), count);
        }
    }

    if !result.success {
        bail!("no strategy located step '{}'", step.id);
    }
    Ok(())
}
