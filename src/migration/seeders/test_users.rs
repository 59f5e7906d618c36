use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{ensure_user, SeedUser};
use crate::{
    auth::password::PasswordHasher,
    db::Connection,
    migration::Seeder,
    users::{model::Role, repo::build_repository},
};

const USERS: &[SeedUser] = &[
    SeedUser {
        email: "user1@example.com",
        password: "password123",
        name: "Test User One",
        role: Role::User,
        active: true,
    },
    SeedUser {
        email: "user2@example.com",
        password: "password123",
        name: "Test User Two",
        role: Role::User,
        active: true,
    },
    SeedUser {
        email: "inactive@example.com",
        password: "password123",
        name: "Inactive User",
        role: Role::User,
        active: false,
    },
];

/// Demo accounts for local development.
pub struct TestUsersSeeder {
    hasher: Arc<dyn PasswordHasher>,
}

impl TestUsersSeeder {
    pub fn new(hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { hasher }
    }
}

#[async_trait]
impl Seeder for TestUsersSeeder {
    fn name(&self) -> &str {
        "TestUsersSeeder"
    }

    fn should_run(&self, env: &str) -> bool {
        env == "development"
    }

    async fn run(&self, conn: &Connection) -> anyhow::Result<()> {
        let repo = build_repository(conn);
        let mut created = 0;
        for seed in USERS {
            if ensure_user(repo.as_ref(), self.hasher.as_ref(), seed).await? {
                created += 1;
            }
        }
        info!(created, "test users seeded");
        Ok(())
    }
}
