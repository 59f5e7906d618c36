use async_trait::async_trait;
use mongodb::{
    bson::{doc, Document},
    options::IndexOptions,
    IndexModel,
};

use crate::{
    db::{Backend, Connection, SqlPool},
    migration::Migration,
    on_pool,
};

/// Index suffix, key columns, unique.
const INDEXES: &[(&str, &[&str], bool)] = &[
    ("email", &["email"], true),
    ("name", &["name"], false),
    ("role", &["role"], false),
    ("active", &["active"], false),
    ("role_active", &["role", "active"], false),
    ("created_at", &["created_at"], false),
];

/// Index names carry the prefixed table name so tenants sharing a database
/// do not collide.
fn index_name(table: &str, suffix: &str) -> String {
    format!("idx_{table}_{suffix}")
}

fn table_ddl(pool: &SqlPool, table: &str) -> String {
    match pool {
        SqlPool::Sqlite(_) => format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                name TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                active BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )"
        ),
        SqlPool::Postgres(_) => format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                email VARCHAR(255) NOT NULL,
                password_hash VARCHAR(255) NOT NULL,
                name VARCHAR(255) NOT NULL,
                role VARCHAR(32) NOT NULL DEFAULT 'user',
                active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )"
        ),
    }
}

fn index_ddl(table: &str) -> Vec<String> {
    INDEXES
        .iter()
        .map(|(suffix, columns, unique)| {
            format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {table} ({})",
                if *unique { "UNIQUE " } else { "" },
                index_name(table, suffix),
                columns.join(", ")
            )
        })
        .collect()
}

fn index_models(collection: &str) -> Vec<IndexModel> {
    INDEXES
        .iter()
        .map(|(suffix, columns, unique)| {
            let mut keys = Document::new();
            for column in columns.iter() {
                keys.insert(*column, 1);
            }
            IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(index_name(collection, suffix))
                        .unique(*unique)
                        .build(),
                )
                .build()
        })
        .collect()
}

/// Users table (relational) or users collection indexes (document).
pub struct CreateUsersTable;

#[async_trait]
impl Migration for CreateUsersTable {
    fn version(&self) -> &str {
        "20240815120000"
    }

    fn description(&self) -> &str {
        "Create users table/collection"
    }

    async fn up(&self, conn: &Connection) -> anyhow::Result<()> {
        let table = &conn.tables().users;
        match conn.backend() {
            Backend::Relational(pool) => {
                let mut statements = vec![table_ddl(pool, table)];
                statements.extend(index_ddl(table));
                for sql in &statements {
                    on_pool!(pool, p => sqlx::query(sql).execute(p).await.map(|_| ()))?;
                }
            }
            Backend::Document(db) => {
                db.collection::<Document>(table)
                    .create_indexes(index_models(table))
                    .await?;
            }
        }
        Ok(())
    }

    async fn down(&self, conn: &Connection) -> anyhow::Result<()> {
        let table = &conn.tables().users;
        match conn.backend() {
            Backend::Relational(pool) => {
                let sql = format!("DROP TABLE IF EXISTS {table}");
                on_pool!(pool, p => sqlx::query(&sql).execute(p).await.map(|_| ()))?;
            }
            Backend::Document(db) => {
                db.collection::<Document>(table).drop().await?;
            }
        }
        Ok(())
    }
}
