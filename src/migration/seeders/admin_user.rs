use std::sync::Arc;

use async_trait::async_trait;

use super::{ensure_user, SeedUser};
use crate::{
    auth::password::PasswordHasher,
    db::Connection,
    migration::Seeder,
    users::{model::Role, repo::build_repository},
};

const ADMIN: SeedUser = SeedUser {
    email: "admin@example.com",
    password: "admin123456",
    name: "System Administrator",
    role: Role::Admin,
    active: true,
};

/// Default administrator for development and staging.
pub struct AdminUserSeeder {
    hasher: Arc<dyn PasswordHasher>,
}

impl AdminUserSeeder {
    pub fn new(hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { hasher }
    }
}

#[async_trait]
impl Seeder for AdminUserSeeder {
    fn name(&self) -> &str {
        "AdminUserSeeder"
    }

    fn should_run(&self, env: &str) -> bool {
        matches!(env, "development" | "staging")
    }

    async fn run(&self, conn: &Connection) -> anyhow::Result<()> {
        let repo = build_repository(conn);
        ensure_user(repo.as_ref(), self.hasher.as_ref(), &ADMIN).await?;
        Ok(())
    }
}
