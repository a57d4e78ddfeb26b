//! Command handlers
//!
//! Implements the CLI commands on top of the engine library: manual ticks,
//! status, trajectory history, and plan listings. Each handler supports
//! plain-text and JSON output.

use anyhow::Result;
use serde_json::json;

use crate::config::Config;
use crate::daemon::{build_conductor, open_database};

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Run `count` orchestration cycles manually and print each report
pub async fn handle_tick(config: &Config, count: u64, format: OutputFormat) -> Result<()> {
    let db = open_database(config).await?;
    let mut conductor = build_conductor(config, &db).await?;

    for _ in 0..count {
        let report = conductor.tick().await;
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Text => {
                println!(
                    "tick {}: {} actions in {:.2}ms",
                    report.tick, report.actions_taken, report.duration_ms
                );
                for turn in &report.turns {
                    println!("  {:<10} {}", turn.chief, summarize_turn(turn));
                }
            }
        }
    }

    db.close().await?;
    Ok(())
}

/// Show configuration and store counters
pub async fn handle_status(config: &Config, format: OutputFormat) -> Result<()> {
    let db = open_database(config).await?;
    let plans = db.plans();
    let trajectories = db.trajectories();

    let trees = plans.recent_trees(1000).await?;
    let (mut active, mut completed, mut failed) = (0u64, 0u64, 0u64);
    for tree in &trees {
        match tree.status {
            crate::plan::types::TreeStatus::Completed => completed += 1,
            crate::plan::types::TreeStatus::Failed => failed += 1,
            _ if !tree.status.is_terminal() => active += 1,
            _ => {}
        }
    }
    let steps = trajectories.count().await?;

    match format {
        OutputFormat::Json => {
            let status = json!({
                "data_dir": config.data_dir()?.display().to_string(),
                "tick_interval_ms": config.conductor.tick_interval_ms,
                "chiefs": config.chiefs.enabled,
                "plan_trees": {
                    "active": active,
                    "completed": completed,
                    "failed": failed,
                },
                "trajectory_steps": steps,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        OutputFormat::Text => {
            println!("Data dir:        {}", config.data_dir()?.display());
            println!("Tick interval:   {}ms", config.conductor.tick_interval_ms);
            println!("Chiefs:          {}", config.chiefs.enabled.join(", "));
            println!(
                "Plan trees:      {} active, {} completed, {} failed",
                active, completed, failed
            );
            println!("Trajectory rows: {}", steps);
        }
    }

    db.close().await?;
    Ok(())
}

/// Show the most recent trajectory steps
pub async fn handle_history(config: &Config, limit: i64, format: OutputFormat) -> Result<()> {
    let db = open_database(config).await?;
    let steps = db.trajectories().recent(limit).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&steps)?),
        OutputFormat::Text => {
            if steps.is_empty() {
                println!("No trajectory steps recorded yet.");
            }
            for entry in &steps {
                println!(
                    "[tick {:>5}] {:<10} {:<18} reward {:+.2}{}",
                    entry.tick,
                    entry.chief,
                    entry.step.action.tag,
                    entry.step.reward,
                    if entry.step.done { "  (episode end)" } else { "" }
                );
            }
        }
    }

    db.close().await?;
    Ok(())
}

/// Show the most recent plan trees
pub async fn handle_plans(config: &Config, limit: i64, format: OutputFormat) -> Result<()> {
    let db = open_database(config).await?;
    let trees = db.plans().recent_trees(limit).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&trees)?),
        OutputFormat::Text => {
            if trees.is_empty() {
                println!("No plan trees recorded yet.");
            }
            for tree in &trees {
                println!(
                    "{}  {:<10} {}{}",
                    tree.id,
                    tree.status.as_str(),
                    tree.goal,
                    tree.error
                        .as_ref()
                        .map(|e| format!("  ({})", e))
                        .unwrap_or_default()
                );
            }
        }
    }

    db.close().await?;
    Ok(())
}

fn summarize_turn(turn: &crate::conductor::TurnRecord) -> String {
    use crate::conductor::TurnResult;
    match &turn.result {
        TurnResult::Acted { action, reward, .. } => {
            format!("{} (reward {:+.2})", action.tag, reward)
        }
        TurnResult::Waited { delay_ms, .. } => format!("wait {}ms", delay_ms),
        TurnResult::Deferred { to, .. } => format!("defer -> {}", to),
        TurnResult::Failed { stage, error } => format!("FAILED at {:?}: {}", stage, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_handlers_run_against_fresh_database() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.core.data_dir = dir.path().to_path_buf();

        handle_tick(&config, 2, OutputFormat::Text).await.unwrap();
        handle_status(&config, OutputFormat::Json).await.unwrap();
        handle_history(&config, 5, OutputFormat::Text).await.unwrap();
        handle_plans(&config, 5, OutputFormat::Text).await.unwrap();
    }
}
