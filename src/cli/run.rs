use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use action_flow::{
    load_playbook_file, ExecutionContext, ExecutionStatus, PlaybookEngine, PlaybookEvent,
    Variables,
};
use action_primitives::FixturePage;
use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use replaybook_core_types::Playbook;
use replaybook_event_bus::to_mpsc;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use super::context::CliContext;
use super::output::OutputFormat;

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Playbook file (.yaml, .yml or .json)
    #[arg(value_name = "PLAYBOOK")]
    pub playbook: PathBuf,

    /// Fixture page to run against (.yaml or .json)
    #[arg(long, value_name = "FILE")]
    pub page: PathBuf,

    /// Variable assignment, repeatable (values parse as JSON when they can)
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_assignment)]
    pub vars: Vec<(String, Value)>,

    /// Confirm every user wait without prompting
    #[arg(long)]
    pub auto_confirm: bool,
}

/// How long a prompt waits for the printer to show the pending wait.
const PROMPT_SETTLE: Duration = Duration::from_millis(500);

enum Decision {
    Confirm,
    SkipVerification,
    Stop,
}

fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext, output: OutputFormat) -> Result<()> {
    let playbook = load_playbook_file(&args.playbook)
        .with_context(|| format!("Failed to load {}", args.playbook.display()))?;
    let page = FixturePage::from_path(&args.page)
        .with_context(|| format!("Failed to load page fixture {}", args.page.display()))?;

    let engine = ctx.engine(Arc::new(page));
    let events = to_mpsc(engine.events(), ctx.config().engine.event_capacity);
    let (printer, mut waiting) = spawn_printer(events, output);

    let outcome = drive(&engine, playbook, &args, &mut waiting).await;
    let context = engine.context();
    let total = engine.progress().total;

    // dropping the engine closes the bus, which ends the printer
    drop(engine);
    printer.await.context("event printer stopped unexpectedly")??;

    outcome?;
    finish(&context, total, output)
}

/// Prints events as they arrive and signals every printed `waiting_user`.
fn spawn_printer(
    mut events: mpsc::Receiver<PlaybookEvent>,
    output: OutputFormat,
) -> (JoinHandle<Result<()>>, mpsc::UnboundedReceiver<()>) {
    let (waiting_tx, waiting_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event, output)?;
            if matches!(event, PlaybookEvent::WaitingUser { .. }) {
                let _ = waiting_tx.send(());
            }
        }
        Ok(())
    });
    (printer, waiting_rx)
}

async fn drive(
    engine: &PlaybookEngine,
    playbook: Playbook,
    args: &RunArgs,
    waiting: &mut mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    engine.load(playbook)?;
    engine.set_variables(args.vars.iter().cloned().collect::<Variables>());
    engine.start().await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    while engine.status() == ExecutionStatus::WaitingUser {
        let decision = if args.auto_confirm {
            Decision::Confirm
        } else {
            // keep the prompt behind the event that asked for it
            let _ = timeout(PROMPT_SETTLE, waiting.recv()).await;
            prompt(&mut stdin).await?
        };

        match decision {
            Decision::Confirm => {
                let waiting_at = engine.context().current_step_index;
                engine.user_action(None).await?;
                let still_waiting = engine.status() == ExecutionStatus::WaitingUser
                    && engine.context().current_step_index == waiting_at;
                if args.auto_confirm && still_waiting {
                    warn!("verification failed at step {}, skipping it", waiting_at);
                    engine.skip_verification().await?;
                }
            }
            Decision::SkipVerification => engine.skip_verification().await?,
            Decision::Stop => engine.stop(),
        }
    }
    Ok(())
}

async fn prompt(stdin: &mut Lines<BufReader<Stdin>>) -> Result<Decision> {
    eprint!("[Enter] confirm, [s] skip verification, [q] stop > ");
    let line = stdin
        .next_line()
        .await
        .context("Failed to read from stdin")?;
    Ok(match line.as_deref().map(str::trim) {
        None => Decision::Stop,
        Some("q") | Some("quit") => Decision::Stop,
        Some("s") | Some("skip") => Decision::SkipVerification,
        Some(_) => Decision::Confirm,
    })
}

fn finish(context: &ExecutionContext, total: usize, output: OutputFormat) -> Result<()> {
    match context.status {
        ExecutionStatus::Completed => {
            info!("playbook completed");
            if matches!(output, OutputFormat::Human) {
                println!(
                    "Completed {}/{} steps ({} error(s) recorded)",
                    total,
                    total,
                    context.errors.len()
                );
            }
            Ok(())
        }
        ExecutionStatus::Error => {
            let last = context
                .last_error()
                .map(|err| format!("step {}: {}", err.step_id, err.message))
                .unwrap_or_else(|| "unknown error".to_string());
            bail!("playbook failed at {}", last)
        }
        ExecutionStatus::Idle => {
            if matches!(output, OutputFormat::Human) {
                println!("Stopped");
            }
            Ok(())
        }
        other => Err(anyhow!("playbook left in unexpected state {}", other)),
    }
}

fn print_event(event: &PlaybookEvent, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
        OutputFormat::Yaml => print!("---\n{}", serde_yaml::to_string(event)?),
        OutputFormat::Human => println!("{}", describe(event)),
    }
    Ok(())
}

fn describe(event: &PlaybookEvent) -> String {
    match event {
        PlaybookEvent::Loaded {
            playbook_id,
            name,
            step_count,
        } => format!("loaded {} ({}), {} steps", name, playbook_id, step_count),
        PlaybookEvent::Started { run_id } => format!("started run {}", run_id.0),
        PlaybookEvent::StepStarted {
            step_index,
            step_id,
            action,
        } => format!("[{}] {} {}", step_index + 1, action, step_id),
        PlaybookEvent::StepCompleted {
            step_index,
            step_id,
            result,
        } => {
            let mut line = format!("[{}] {} done", step_index + 1, step_id);
            if let Some(healing) = result.healing.as_ref().filter(|h| h.is_healed()) {
                line.push_str(&format!(
                    " (healed via {})",
                    healing.strategy.map(|s| s.name()).unwrap_or("unknown")
                ));
            }
            if let Some(message) = &result.message {
                line.push_str(&format!(": {}", message));
            }
            line
        }
        PlaybookEvent::WaitingUser {
            step_index,
            message,
        } => format!(
            "[{}] waiting for you: {}",
            step_index + 1,
            message.as_deref().unwrap_or("confirm to continue")
        ),
        PlaybookEvent::Verifying { step_index } => format!("[{}] verifying", step_index + 1),
        PlaybookEvent::VerifySucceeded { step_index, result } => format!(
            "[{}] verified ({:?})",
            step_index + 1,
            result.method
        ),
        PlaybookEvent::VerifyFailed { step_index, result } => format!(
            "[{}] verification failed: {}",
            step_index + 1,
            result
                .guidance
                .as_deref()
                .or(result.message.as_deref())
                .unwrap_or("no details")
        ),
        PlaybookEvent::Error { error } => format!("error in {}: {}", error.step_id, error.message),
        other => other.kind().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("count=3").unwrap(),
            ("count".to_string(), json!(3))
        );
        assert_eq!(
            parse_assignment("name=Ada Lovelace").unwrap(),
            ("name".to_string(), json!("Ada Lovelace"))
        );
        assert_eq!(
            parse_assignment("items=[\"a\",\"b\"]").unwrap(),
            ("items".to_string(), json!(["a", "b"]))
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=x").is_err());
    }

    #[test]
    fn test_describe_waiting_user_falls_back_to_prompt() {
        let line = describe(&PlaybookEvent::WaitingUser {
            step_index: 1,
            message: None,
        });
        assert_eq!(line, "[2] waiting for you: confirm to continue");
    }
}
