use std::{path::Path, time::Duration};

use anyhow::Context;
use mongodb::bson::doc;
use sqlx::{
    postgres::PgPoolOptions,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    PgPool, SqlitePool,
};
use tracing::info;

use crate::config::{DatabaseConfig, Driver};

/// Storage names for every persisted entity, all carrying the same prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub users: String,
    pub migrations: String,
}

impl TableNames {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            users: format!("{prefix}users"),
            migrations: format!("{prefix}migrations"),
        }
    }
}

/// Relational pool for whichever SQL engine is configured.
#[derive(Debug, Clone)]
pub enum SqlPool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

impl SqlPool {
    pub fn driver(&self) -> Driver {
        match self {
            SqlPool::Sqlite(_) => Driver::Sqlite,
            SqlPool::Postgres(_) => Driver::Postgres,
        }
    }
}

/// Runs the same expression against whichever pool variant is active. The
/// body is type-checked once per engine, so queries must be written in the
/// dialect subset both engines accept (`$N` placeholders, `RETURNING`).
#[macro_export]
macro_rules! on_pool {
    ($pool:expr, $p:ident => $body:expr) => {
        match $pool {
            $crate::db::SqlPool::Sqlite($p) => $body,
            $crate::db::SqlPool::Postgres($p) => $body,
        }
    };
}

#[derive(Debug, Clone)]
pub enum Backend {
    Relational(SqlPool),
    Document(mongodb::Database),
}

/// The single active backend handle plus the table naming it was opened with.
#[derive(Debug, Clone)]
pub struct Connection {
    backend: Backend,
    tables: TableNames,
}

impl Connection {
    pub async fn connect(cfg: &DatabaseConfig) -> anyhow::Result<Self> {
        let backend = match cfg.driver {
            Driver::Sqlite => Backend::Relational(SqlPool::Sqlite(connect_sqlite(cfg).await?)),
            Driver::Postgres => {
                Backend::Relational(SqlPool::Postgres(connect_postgres(cfg).await?))
            }
            Driver::Mongo => Backend::Document(connect_mongo(cfg).await?),
        };
        info!(driver = %cfg.driver, prefix = %cfg.table_prefix, "database connected");
        Ok(Self::from_backend(backend, &cfg.table_prefix))
    }

    pub fn from_backend(backend: Backend, table_prefix: &str) -> Self {
        Self {
            backend,
            tables: TableNames::with_prefix(table_prefix),
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn relational(&self) -> Option<&SqlPool> {
        match &self.backend {
            Backend::Relational(pool) => Some(pool),
            Backend::Document(_) => None,
        }
    }

    pub fn document(&self) -> Option<&mongodb::Database> {
        match &self.backend {
            Backend::Document(db) => Some(db),
            Backend::Relational(_) => None,
        }
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    pub fn driver(&self) -> Driver {
        match &self.backend {
            Backend::Relational(pool) => pool.driver(),
            Backend::Document(_) => Driver::Mongo,
        }
    }

    pub async fn health(&self) -> anyhow::Result<()> {
        match &self.backend {
            Backend::Relational(pool) => {
                on_pool!(pool, p => sqlx::query("SELECT 1").execute(p).await.map(|_| ()))
                    .context("relational ping")?;
            }
            Backend::Document(db) => {
                db.run_command(doc! { "ping": 1 })
                    .await
                    .context("mongo ping")?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        match &self.backend {
            Backend::Relational(pool) => on_pool!(pool, p => p.close().await),
            Backend::Document(db) => db.client().clone().shutdown().await,
        }
        info!("database connection closed");
    }
}

async fn connect_sqlite(cfg: &DatabaseConfig) -> anyhow::Result<SqlitePool> {
    if let Some(dir) = Path::new(&cfg.sqlite_path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create directory {}", dir.display()))?;
        }
    }
    let options = SqliteConnectOptions::new()
        .filename(&cfg.sqlite_path)
        .create_if_missing(true);

    // SQLite has a single writer; keep one connection so writes serialize.
    SqlitePoolOptions::new()
        .max_connections(1)
        .max_lifetime(Duration::from_secs(60 * 60))
        .connect_with(options)
        .await
        .context("connect to sqlite")
}

async fn connect_postgres(cfg: &DatabaseConfig) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .max_lifetime(Duration::from_secs(5 * 60))
        .connect(&cfg.postgres.dsn())
        .await
        .context("connect to postgres")
}

async fn connect_mongo(cfg: &DatabaseConfig) -> anyhow::Result<mongodb::Database> {
    let client = mongodb::Client::with_uri_str(&cfg.mongo.uri)
        .await
        .context("connect to mongo")?;
    let db = client.database(&cfg.mongo.database);
    db.run_command(doc! { "ping": 1 })
        .await
        .context("ping mongo")?;
    Ok(db)
}

/// Single-connection in-memory SQLite used by unit tests across the crate.
#[cfg(test)]
pub async fn memory_connection(prefix: &str) -> Connection {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    Connection::from_backend(Backend::Relational(SqlPool::Sqlite(pool)), prefix)
}
