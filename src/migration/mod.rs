//! Versioned schema migrations tracked in a ledger, followed by
//! environment-gated seeders.
//!
//! The runner makes no attempt at locking: two runners pointed at the same
//! database at the same time may both try to apply a pending version.

use std::collections::HashSet;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::db::Connection;

pub mod ledger;
pub mod migrations;
pub mod registry;
pub mod seeders;

use ledger::Ledger;

/// A forward schema change identified by a sortable version string such as
/// `20240815120000`.
#[async_trait]
pub trait Migration: Send + Sync {
    fn version(&self) -> &str;

    fn description(&self) -> &str;

    async fn up(&self, conn: &Connection) -> anyhow::Result<()>;

    /// Reverse action. Migrations without one refuse to run backwards.
    async fn down(&self, _conn: &Connection) -> anyhow::Result<()> {
        bail!("migration {} is irreversible", self.version())
    }
}

/// Baseline data for some environments. A seeder must check for existing
/// data itself; nothing records that it ran.
#[async_trait]
pub trait Seeder: Send + Sync {
    fn name(&self) -> &str;

    fn should_run(&self, env: &str) -> bool;

    async fn run(&self, conn: &Connection) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMigration {
    pub version: String,
    pub description: String,
}

/// Outcome of a [`Migrator::migrate`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

/// What a full run would do, without doing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub env: String,
    pub pending: Vec<PendingMigration>,
    pub seeders_to_run: Vec<String>,
    pub seeders_skipped: Vec<String>,
}

pub struct Migrator {
    conn: Connection,
    migrations: Vec<Box<dyn Migration>>,
    seeders: Vec<Box<dyn Seeder>>,
}

impl Migrator {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            migrations: Vec::new(),
            seeders: Vec::new(),
        }
    }

    pub fn add_migration(&mut self, migration: impl Migration + 'static) -> &mut Self {
        self.migrations.push(Box::new(migration));
        self
    }

    pub fn add_seeder(&mut self, seeder: impl Seeder + 'static) -> &mut Self {
        self.seeders.push(Box::new(seeder));
        self
    }

    /// Registered migrations in ascending version order. Registration order
    /// does not matter, but a version may only be registered once.
    fn ordered(&self) -> anyhow::Result<Vec<&dyn Migration>> {
        let mut ordered: Vec<&dyn Migration> = self.migrations.iter().map(|m| m.as_ref()).collect();
        ordered.sort_by(|a, b| a.version().cmp(b.version()));
        for pair in ordered.windows(2) {
            if pair[0].version() == pair[1].version() {
                bail!("migration version {} is registered twice", pair[0].version());
            }
        }
        Ok(ordered)
    }

    async fn applied(&self) -> anyhow::Result<HashSet<String>> {
        let ledger = Ledger::new(&self.conn);
        ledger
            .ensure()
            .await
            .context("failed to create migration ledger")?;
        ledger
            .applied()
            .await
            .context("failed to read migration ledger")
    }

    /// Applies every pending migration in version order. Stops at the first
    /// failure; versions applied before it stay applied.
    pub async fn migrate(&self) -> anyhow::Result<MigrationReport> {
        let ordered = self.ordered()?;
        let applied = self.applied().await?;
        let ledger = Ledger::new(&self.conn);
        let mut report = MigrationReport::default();

        for migration in ordered {
            let version = migration.version();
            if applied.contains(version) {
                debug!(version, description = migration.description(), "migration already applied");
                report.skipped.push(version.to_owned());
                continue;
            }

            info!(version, description = migration.description(), "running migration");
            if let Err(e) = migration.up(&self.conn).await {
                error!(version, error = %e, "migration failed");
                return Err(e.context(format!("migration {version} failed")));
            }
            ledger
                .record(version, migration.description())
                .await
                .with_context(|| format!("failed to record migration {version}"))?;

            info!(version, "migration completed");
            report.applied.push(version.to_owned());
        }

        Ok(report)
    }

    /// Runs the seeders that opt in for `env`, in registration order.
    pub async fn seed(&self, env: &str) -> anyhow::Result<Vec<String>> {
        let mut ran = Vec::new();
        for seeder in &self.seeders {
            let name = seeder.name();
            if !seeder.should_run(env) {
                debug!(seeder = name, env, "skipping seeder");
                continue;
            }
            info!(seeder = name, "running seeder");
            seeder
                .run(&self.conn)
                .await
                .with_context(|| format!("seeder {name} failed"))?;
            info!(seeder = name, "seeder completed");
            ran.push(name.to_owned());
        }
        Ok(ran)
    }

    /// Migrations, then seeders.
    pub async fn run(&self, env: &str) -> anyhow::Result<MigrationReport> {
        let report = self.migrate().await?;
        self.seed(env).await?;
        Ok(report)
    }

    /// Versions not yet in the ledger, in the order they would run.
    pub async fn pending(&self) -> anyhow::Result<Vec<PendingMigration>> {
        let ordered = self.ordered()?;
        let applied = self.applied().await?;
        Ok(ordered
            .into_iter()
            .filter(|m| !applied.contains(m.version()))
            .map(|m| PendingMigration {
                version: m.version().to_owned(),
                description: m.description().to_owned(),
            })
            .collect())
    }

    pub async fn plan(&self, env: &str) -> anyhow::Result<Plan> {
        let pending = self.pending().await?;
        let (run, skip): (Vec<_>, Vec<_>) = self.seeders.iter().partition(|s| s.should_run(env));
        Ok(Plan {
            env: env.to_owned(),
            pending,
            seeders_to_run: run.iter().map(|s| s.name().to_owned()).collect(),
            seeders_skipped: skip.iter().map(|s| s.name().to_owned()).collect(),
        })
    }
}
