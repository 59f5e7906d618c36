use async_trait::async_trait;
use sqlx::FromRow;
use time::OffsetDateTime;
use tracing::debug;

use crate::{
    db::SqlPool,
    error::{Error, Result},
    on_pool,
    users::{
        model::{Page, Role, User, UserId},
        repo::UserRepository,
    },
};

const COLUMNS: &str = "id, email, password_hash, name, role, active, created_at, updated_at";

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    email: String,
    password_hash: String,
    name: String,
    role: String,
    active: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = Error;

    fn try_from(row: UserRow) -> Result<Self> {
        let role: Role = row
            .role
            .parse()
            .map_err(|_| Error::Internal(format!("user {} has unknown role {:?}", row.id, row.role)))?;
        Ok(User {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            name: row.name,
            role,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Users in a relational table with an auto-increment integer key.
pub struct SqlUserRepository {
    pool: SqlPool,
    table: String,
}

impl SqlUserRepository {
    pub fn new(pool: SqlPool, table: String) -> Self {
        Self { pool, table }
    }

    /// SQLite keeps timestamps as RFC 3339 text whose fractional part has no
    /// fixed width, so it has to be ordered through `julianday`.
    fn newest_first(&self) -> &'static str {
        match self.pool {
            SqlPool::Sqlite(_) => "julianday(created_at) DESC, id DESC",
            SqlPool::Postgres(_) => "created_at DESC, id DESC",
        }
    }

    /// SQLite's `LOWER` only folds ASCII, so the pattern goes through the same
    /// function as the column. Postgres folds Unicode in `ILIKE`.
    fn search_predicate(&self) -> &'static str {
        match self.pool {
            SqlPool::Sqlite(_) => {
                r"(LOWER(name) LIKE LOWER($1) ESCAPE '\' OR LOWER(email) LIKE LOWER($1) ESCAPE '\')"
            }
            SqlPool::Postgres(_) => r"(name ILIKE $1 ESCAPE '\' OR email ILIKE $1 ESCAPE '\')",
        }
    }

    async fn fetch_page(
        &self,
        filter: Option<&str>,
        offset: u64,
        limit: u64,
    ) -> Result<Page<User>> {
        let order = self.newest_first();
        let predicate = self.search_predicate();
        let (count_sql, page_sql) = match filter {
            None => (
                format!("SELECT COUNT(*) FROM {}", self.table),
                format!(
                    "SELECT {COLUMNS} FROM {} ORDER BY {order} LIMIT $1 OFFSET $2",
                    self.table
                ),
            ),
            Some(_) => (
                format!("SELECT COUNT(*) FROM {} WHERE {predicate}", self.table),
                format!(
                    "SELECT {COLUMNS} FROM {} WHERE {predicate} \
                     ORDER BY {order} LIMIT $2 OFFSET $3",
                    self.table
                ),
            ),
        };
        let limit = to_i64(limit);
        let offset = to_i64(offset);

        let total: i64 = on_pool!(&self.pool, p => {
            let mut q = sqlx::query_scalar::<_, i64>(&count_sql);
            if let Some(pattern) = filter {
                q = q.bind(pattern);
            }
            q.fetch_one(p).await
        })
        .map_err(|e| Error::storage("failed to count users", e))?;

        let rows: Vec<UserRow> = on_pool!(&self.pool, p => {
            let mut q = sqlx::query_as::<_, UserRow>(&page_sql);
            if let Some(pattern) = filter {
                q = q.bind(pattern);
            }
            q.bind(limit).bind(offset).fetch_all(p).await
        })
        .map_err(|e| Error::storage("failed to list users", e))?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(User::try_from)
                .collect::<Result<Vec<_>>>()?,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }
}

#[async_trait]
impl UserRepository for SqlUserRepository {
    async fn create(&self, user: &mut User) -> Result<()> {
        let now = now_utc();
        let sql = format!(
            "INSERT INTO {} (email, password_hash, name, role, active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
            self.table
        );
        let id: i64 = on_pool!(&self.pool, p => {
            sqlx::query_scalar::<_, i64>(&sql)
                .bind(&user.email)
                .bind(&user.password_hash)
                .bind(&user.name)
                .bind(user.role.as_str())
                .bind(user.active)
                .bind(now)
                .bind(now)
                .fetch_one(p)
                .await
        })
        .map_err(|e| write_error("failed to create user", e))?;

        user.id = id;
        user.created_at = now;
        user.updated_at = now;
        debug!(user_id = id, "user row inserted");
        Ok(())
    }

    async fn get_by_id(&self, id: UserId) -> Result<User> {
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE id = $1", self.table);
        let row = on_pool!(&self.pool, p => {
            sqlx::query_as::<_, UserRow>(&sql).bind(id).fetch_optional(p).await
        })
        .map_err(|e| Error::storage("failed to get user by id", e))?;
        row.ok_or(Error::NotFound("user"))?.try_into()
    }

    async fn get_by_email(&self, email: &str) -> Result<User> {
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE email = $1", self.table);
        let row = on_pool!(&self.pool, p => {
            sqlx::query_as::<_, UserRow>(&sql).bind(email).fetch_optional(p).await
        })
        .map_err(|e| Error::storage("failed to get user by email", e))?;
        row.ok_or(Error::NotFound("user"))?.try_into()
    }

    async fn update(&self, user: &mut User) -> Result<()> {
        let now = now_utc();
        let sql = format!(
            "UPDATE {} SET email = $1, password_hash = $2, name = $3, role = $4, active = $5, \
             updated_at = $6 WHERE id = $7",
            self.table
        );
        let affected = on_pool!(&self.pool, p => {
            sqlx::query(&sql)
                .bind(&user.email)
                .bind(&user.password_hash)
                .bind(&user.name)
                .bind(user.role.as_str())
                .bind(user.active)
                .bind(now)
                .bind(user.id)
                .execute(p)
                .await
                .map(|r| r.rows_affected())
        })
        .map_err(|e| write_error("failed to update user", e))?;

        // The row may have been deleted between read and write.
        if affected == 0 {
            return Err(Error::NotFound("user"));
        }
        user.updated_at = now;
        Ok(())
    }

    async fn delete(&self, id: UserId) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
        let affected = on_pool!(&self.pool, p => {
            sqlx::query(&sql)
                .bind(id)
                .execute(p)
                .await
                .map(|r| r.rows_affected())
        })
        .map_err(|e| Error::storage("failed to delete user", e))?;
        if affected == 0 {
            return Err(Error::NotFound("user"));
        }
        Ok(())
    }

    async fn list(&self, offset: u64, limit: u64) -> Result<Page<User>> {
        self.fetch_page(None, offset, limit).await
    }

    async fn search(&self, query: &str, offset: u64, limit: u64) -> Result<Page<User>> {
        let pattern = format!("%{}%", escape_like(query));
        self.fetch_page(Some(&pattern), offset, limit).await
    }
}

fn write_error(context: &'static str, err: sqlx::Error) -> Error {
    if is_unique_violation(&err) {
        return Error::AlreadyExists("user");
    }
    Error::storage(context, err)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => is_unique_violation_message(db.message()),
        _ => false,
    }
}

/// Best-effort match on the constraint-violation text of the supported
/// engines. Vendor wording changes will silently break this.
// TODO: switch to `DatabaseError::kind() == ErrorKind::UniqueViolation` once
// both drivers are confirmed to report it for index-backed constraints.
pub(crate) fn is_unique_violation_message(message: &str) -> bool {
    let message = message.to_lowercase();
    [
        // postgres
        "duplicate key",
        "violates unique constraint",
        // sqlite
        "unique constraint failed",
        "constraint failed: unique",
        // mysql-style wording some proxies pass through
        "duplicate entry",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Microsecond precision, which is what postgres keeps.
fn now_utc() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_microsecond(now.microsecond()).unwrap_or(now)
}
