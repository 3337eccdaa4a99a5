// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Connection Pool
//!
//! Wraps `sqlx::sqlite::SqlitePool` in a thin `Database` newtype that is
//! injected into [`SqliteExperimentRepository`](super::repositories::SqliteExperimentRepository).
//!
//! The pool holds exactly one long-lived connection. That serialises all
//! storage access behind one lock and keeps `sqlite::memory:` databases alive
//! for the lifetime of the pool.

use crate::domain::repository::RepositoryError;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::debug;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS experiments (
        id          TEXT PRIMARY KEY NOT NULL,
        name        TEXT NOT NULL UNIQUE,
        created_at  TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS generations (
        seq            INTEGER PRIMARY KEY AUTOINCREMENT,
        id             TEXT NOT NULL UNIQUE,
        experiment_id  TEXT NOT NULL REFERENCES experiments(id),
        created_at     TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS individuals (
        seq            INTEGER PRIMARY KEY AUTOINCREMENT,
        id             TEXT NOT NULL UNIQUE,
        generation_id  TEXT NOT NULL REFERENCES generations(id),
        encoding       TEXT NOT NULL,
        fitness        REAL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_generations_experiment ON generations(experiment_id)",
    "CREATE INDEX IF NOT EXISTS idx_individuals_generation ON individuals(generation_id)",
];

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to `url` and create the schema if missing.
    pub async fn connect(url: &str) -> Result<Self, RepositoryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(url)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        debug!(url, "SQLite schema ready");

        Ok(Self { pool })
    }

    pub fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }
}
