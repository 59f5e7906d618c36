use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    db::{Backend, Connection},
    error::Result,
    users::{
        model::{Page, User, UserId},
        repo_mongo::MongoUserRepository,
        repo_sql::SqlUserRepository,
    },
};

/// Data access for users. Both backends satisfy the same contract; the
/// service layer never sees which one it is talking to.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Persists a new user, assigning its id and timestamps in place.
    async fn create(&self, user: &mut User) -> Result<()>;

    async fn get_by_id(&self, id: UserId) -> Result<User>;

    /// Exact match; callers pass the normalized (trimmed, lowercased) email.
    async fn get_by_email(&self, email: &str) -> Result<User>;

    /// Persists every mutable field and refreshes `updated_at` in place.
    async fn update(&self, user: &mut User) -> Result<()>;

    async fn delete(&self, id: UserId) -> Result<()>;

    /// Newest first.
    async fn list(&self, offset: u64, limit: u64) -> Result<Page<User>>;

    /// Case-insensitive substring match on name or email, newest first.
    async fn search(&self, query: &str, offset: u64, limit: u64) -> Result<Page<User>>;
}

/// Picks the repository variant matching the connection's backend.
pub fn build_repository(conn: &Connection) -> Arc<dyn UserRepository> {
    let table = conn.tables().users.clone();
    match conn.backend() {
        Backend::Relational(pool) => Arc::new(SqlUserRepository::new(pool.clone(), table)),
        Backend::Document(db) => Arc::new(MongoUserRepository::new(db, &table)),
    }
}
