use std::collections::HashSet;

use anyhow::Context;
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, Document},
    options::IndexOptions,
    IndexModel,
};
use serde::Deserialize;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::{
    db::{Backend, Connection, SqlPool},
    on_pool,
};

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct LedgerRecord {
    pub version: String,
    pub description: String,
    pub executed_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
struct LedgerDocument {
    version: String,
    description: String,
    executed_at: bson::DateTime,
}

/// Persistent record of applied migrations, kept in the prefixed
/// `migrations` table or collection of the active backend.
pub struct Ledger<'a> {
    conn: &'a Connection,
}

impl<'a> Ledger<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn name(&self) -> &str {
        &self.conn.tables().migrations
    }

    /// Idempotent; safe to call before every run.
    pub async fn ensure(&self) -> anyhow::Result<()> {
        match self.conn.backend() {
            Backend::Relational(pool) => {
                let executed_at = match pool {
                    SqlPool::Sqlite(_) => "DATETIME",
                    SqlPool::Postgres(_) => "TIMESTAMPTZ",
                };
                let sql = format!(
                    "CREATE TABLE IF NOT EXISTS {} (\
                        version VARCHAR(255) PRIMARY KEY, \
                        description TEXT NOT NULL, \
                        executed_at {executed_at} NOT NULL)",
                    self.name()
                );
                on_pool!(pool, p => sqlx::query(&sql).execute(p).await.map(|_| ()))?;
            }
            Backend::Document(db) => {
                let index = IndexModel::builder()
                    .keys(doc! { "version": 1 })
                    .options(
                        IndexOptions::builder()
                            .unique(true)
                            .name(format!("idx_{}_version", self.name()))
                            .build(),
                    )
                    .build();
                db.collection::<Document>(self.name())
                    .create_index(index)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn applied(&self) -> anyhow::Result<HashSet<String>> {
        let versions = match self.conn.backend() {
            Backend::Relational(pool) => {
                let sql = format!("SELECT version FROM {}", self.name());
                on_pool!(pool, p => sqlx::query_scalar::<_, String>(&sql).fetch_all(p).await)?
            }
            Backend::Document(db) => {
                let docs: Vec<Document> = db
                    .collection::<Document>(self.name())
                    .find(doc! {})
                    .await?
                    .try_collect()
                    .await?;
                docs.iter()
                    .filter_map(|d| d.get_str("version").ok().map(str::to_owned))
                    .collect()
            }
        };
        Ok(versions.into_iter().collect())
    }

    /// Every record, ordered by version.
    pub async fn records(&self) -> anyhow::Result<Vec<LedgerRecord>> {
        match self.conn.backend() {
            Backend::Relational(pool) => {
                let sql = format!(
                    "SELECT version, description, executed_at FROM {} ORDER BY version",
                    self.name()
                );
                let rows = on_pool!(pool, p => {
                    sqlx::query_as::<_, LedgerRecord>(&sql).fetch_all(p).await
                })?;
                Ok(rows)
            }
            Backend::Document(db) => {
                let docs: Vec<LedgerDocument> = db
                    .collection::<LedgerDocument>(self.name())
                    .find(doc! {})
                    .sort(doc! { "version": 1 })
                    .await?
                    .try_collect()
                    .await?;
                docs.into_iter()
                    .map(|d| -> anyhow::Result<LedgerRecord> {
                        let nanos = i128::from(d.executed_at.timestamp_millis()) * 1_000_000;
                        Ok(LedgerRecord {
                            version: d.version,
                            description: d.description,
                            executed_at: OffsetDateTime::from_unix_timestamp_nanos(nanos)
                                .context("ledger timestamp out of range")?,
                        })
                    })
                    .collect()
            }
        }
    }

    pub async fn record(&self, version: &str, description: &str) -> anyhow::Result<()> {
        match self.conn.backend() {
            Backend::Relational(pool) => {
                let sql = format!(
                    "INSERT INTO {} (version, description, executed_at) VALUES ($1, $2, $3)",
                    self.name()
                );
                let now = OffsetDateTime::now_utc();
                on_pool!(pool, p => {
                    sqlx::query(&sql)
                        .bind(version)
                        .bind(description)
                        .bind(now)
                        .execute(p)
                        .await
                        .map(|_| ())
                })?;
            }
            Backend::Document(db) => {
                db.collection::<Document>(self.name())
                    .insert_one(doc! {
                        "version": version,
                        "description": description,
                        "executed_at": bson::DateTime::now(),
                    })
                    .await?;
            }
        }
        Ok(())
    }
}
