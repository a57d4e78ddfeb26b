//! Daemon lifecycle management
//!
//! Wires the full engine together: configuration → database → conductor
//! with the built-in chiefs → local heartbeat, then runs cycles until a
//! shutdown signal arrives. Shutdown is graceful: the pulse task stops, no
//! new cycles start, and the SQLite WAL is flushed before exit.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::chiefs::built_in_chiefs;
use crate::conductor::Conductor;
use crate::config::Config;
use crate::db::Database;
use crate::heartbeat::{Heartbeat, LocalPulse};
use crate::plan::store::PlanStore;
use crate::trajectory::{MemorySink, TrajectorySink};

/// Database file name inside the data directory
const DB_FILE: &str = "maestro.db";

/// Build a conductor over the database with every configured chief
pub async fn build_conductor(config: &Config, db: &Database) -> Result<Conductor> {
    let sink: Arc<dyn TrajectorySink> = if config.trajectory.persist {
        Arc::new(db.trajectories())
    } else {
        Arc::new(MemorySink::new(config.trajectory.memory_capacity))
    };
    let store: Arc<dyn PlanStore> = Arc::new(db.plans());

    let mut conductor = Conductor::new(Arc::clone(&sink), config.conductor.ema_alpha);
    let bus = conductor.bus();
    for (name, chief) in built_in_chiefs(config, store, Some(Arc::clone(&sink)), Some(bus)) {
        conductor.register_chief(name, chief).await;
    }
    Ok(conductor)
}

/// Open the engine database for a configuration
pub async fn open_database(config: &Config) -> Result<Database> {
    let data_dir = config.data_dir().context("Failed to resolve data directory")?;
    Database::new(&data_dir.join(DB_FILE)).await
}

/// Foreground engine process
pub struct EngineDaemon {
    config: Config,
}

impl EngineDaemon {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until ctrl-c, then shut down gracefully
    pub async fn run(self) -> Result<()> {
        let db = open_database(&self.config).await?;
        let mut conductor = build_conductor(&self.config, &db).await?;

        let heartbeat = Heartbeat::new();
        let pulse = LocalPulse::start(
            heartbeat.clone(),
            Duration::from_millis(self.config.conductor.tick_interval_ms),
        );
        let shutdown = Arc::new(AtomicBool::new(false));
        let pulses = heartbeat.subscribe();

        info!(
            interval_ms = self.config.conductor.tick_interval_ms,
            chiefs = ?conductor.chief_names(),
            "engine running"
        );

        tokio::select! {
            _ = conductor.run(pulses, Arc::clone(&shutdown)) => {
                info!("heartbeat ended, engine stopping");
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for shutdown signal")?;
                info!("shutdown signal received");
                shutdown.store(true, Ordering::Relaxed);
            }
        }

        pulse.stop();

        let metrics = conductor.metrics();
        info!(
            cycles = metrics.cycles,
            actions = metrics.total_actions,
            "engine stopped"
        );

        db.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.core.data_dir = dir.path().to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_build_conductor_registers_configured_chiefs() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let db = open_database(&config).await.unwrap();
        let conductor = build_conductor(&config, &db).await.unwrap();

        assert_eq!(
            conductor.chief_names(),
            vec!["intake", "lineage", "mission", "replay", "balance"]
        );
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_conductor_ticks_against_real_database() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let db = open_database(&config).await.unwrap();
        let mut conductor = build_conductor(&config, &db).await.unwrap();

        let report = conductor.tick().await;
        assert!(!report.paused);
        assert_eq!(report.turns.len(), 5);
        // Every turn completes; nothing in a fresh context can fail a chief
        assert!(report.turns.iter().all(|t| t.result.is_ok()));

        db.close().await.unwrap();
    }
}
