use std::path::PathBuf;

use action_flow::{load_playbook_file, PlaybookValidator};
use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;

use super::output::{print_structured, OutputFormat};
use action_flow::ValidationIssue;

#[derive(Args, Clone, Debug)]
pub struct ValidateArgs {
    /// Playbook file (.yaml, .yml or .json)
    #[arg(value_name = "PLAYBOOK")]
    pub playbook: PathBuf,
}

#[derive(Serialize)]
struct ValidateSummary<'a> {
    playbook: String,
    valid: bool,
    steps: usize,
    errors: &'a [ValidationIssue],
    warnings: &'a [ValidationIssue],
}

pub async fn cmd_validate(args: ValidateArgs, output: OutputFormat) -> Result<()> {
    let playbook = load_playbook_file(&args.playbook)
        .with_context(|| format!("Failed to load {}", args.playbook.display()))?;
    let report = PlaybookValidator::new().validate(&playbook);

    let summary = ValidateSummary {
        playbook: playbook.metadata.id.clone(),
        valid: report.is_valid(),
        steps: playbook.total_step_count(),
        errors: &report.errors,
        warnings: &report.warnings,
    };
    if !print_structured(&summary, output)? {
        println!(
            "Playbook {} ({}), {} steps",
            playbook.metadata.name, playbook.metadata.id, summary.steps
        );
        for issue in &report.errors {
            println!("  error   {}", issue);
        }
        for issue in &report.warnings {
            println!("  warning {}", issue);
        }
        if report.is_valid() {
            println!("OK");
        }
    }

    if !report.is_valid() {
        bail!(
            "{} has {} validation error(s)",
            args.playbook.display(),
            report.errors.len()
        );
    }
    Ok(())
}
