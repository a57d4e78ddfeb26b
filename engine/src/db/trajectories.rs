//! Trajectory persistence operations
//!
//! SQLite-backed trajectory sink: one row per recorded step, keyed by
//! `(chief, tick)`, append-only. The read side exists for the CLI history
//! surface and offline export; nothing in the cycle reads it back.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{Action, FeatureMap, TrajectoryStep};
use sqlx::{Row, SqlitePool};

use crate::plan::types::now_ms;
use crate::trajectory::{RecordedStep, TrajectorySink};

fn db_err(e: sqlx::Error) -> EngineError {
    EngineError::Database(e.to_string())
}

/// Trajectory sink backed by SQLite
pub struct SqliteTrajectorySink {
    pool: SqlitePool,
}

impl SqliteTrajectorySink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Most recent steps, oldest first within the window
    pub async fn recent(&self, limit: i64) -> Result<Vec<RecordedStep>, EngineError> {
        let rows = sqlx::query(
            "SELECT chief, tick, state, action, reward, next_state, done, metadata \
             FROM (SELECT * FROM trajectory_steps ORDER BY id DESC LIMIT ?) ORDER BY id ASC",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut steps = Vec::with_capacity(rows.len());
        for row in rows {
            steps.push(recorded_from_row(&row)?);
        }
        Ok(steps)
    }

    /// All steps for one chief in tick order
    pub async fn steps_for(&self, chief: &str) -> Result<Vec<RecordedStep>, EngineError> {
        let rows = sqlx::query(
            "SELECT chief, tick, state, action, reward, next_state, done, metadata \
             FROM trajectory_steps WHERE chief = ? ORDER BY id ASC",
        )
        .bind(chief)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut steps = Vec::with_capacity(rows.len());
        for row in rows {
            steps.push(recorded_from_row(&row)?);
        }
        Ok(steps)
    }

    /// Total number of recorded steps
    pub async fn count(&self) -> Result<i64, EngineError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM trajectory_steps")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }
}

fn recorded_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<RecordedStep, EngineError> {
    let state: FeatureMap = serde_json::from_str(row.get::<String, _>("state").as_str())?;
    let action: Action = serde_json::from_str(row.get::<String, _>("action").as_str())?;
    let next_state: FeatureMap = serde_json::from_str(row.get::<String, _>("next_state").as_str())?;
    let metadata = serde_json::from_str(row.get::<String, _>("metadata").as_str())
        .unwrap_or(serde_json::Value::Null);

    let mut step = TrajectoryStep::new(
        state,
        action,
        row.get::<f64, _>("reward"),
        next_state,
        row.get::<i64, _>("done") != 0,
    );
    step.metadata = metadata;

    Ok(RecordedStep {
        chief: row.get("chief"),
        tick: row.get::<i64, _>("tick") as u64,
        step,
    })
}

#[async_trait]
impl TrajectorySink for SqliteTrajectorySink {
    async fn record(
        &self,
        chief: &str,
        tick: u64,
        step: &TrajectoryStep,
    ) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO trajectory_steps (chief, tick, state, action, reward, next_state, done, \
             metadata, recorded_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(chief)
        .bind(tick as i64)
        .bind(serde_json::to_string(&step.state)?)
        .bind(serde_json::to_string(&step.action)?)
        .bind(step.reward)
        .bind(serde_json::to_string(&step.next_state)?)
        .bind(step.done as i64)
        .bind(step.metadata.to_string())
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
