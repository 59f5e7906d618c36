use anyhow::Context;
use tracing::{debug, info};

use crate::{
    auth::password::PasswordHasher,
    error::Error,
    users::{
        model::{Role, User},
        repo::UserRepository,
    },
};

mod admin_user;
mod test_users;

pub use admin_user::AdminUserSeeder;
pub use test_users::TestUsersSeeder;

struct SeedUser {
    email: &'static str,
    password: &'static str,
    name: &'static str,
    role: Role,
    active: bool,
}

/// Inserts the user unless the email is already taken. Returns whether a
/// row was written.
async fn ensure_user(
    repo: &dyn UserRepository,
    hasher: &dyn PasswordHasher,
    seed: &SeedUser,
) -> anyhow::Result<bool> {
    match repo.get_by_email(seed.email).await {
        Ok(_) => {
            debug!(email = seed.email, "seed user already present");
            return Ok(false);
        }
        Err(Error::NotFound(_)) => {}
        Err(e) => return Err(e).with_context(|| format!("failed to look up {}", seed.email)),
    }

    let hash = hasher.hash(seed.password)?;
    let mut user = User::new(seed.email.into(), hash, seed.name.into(), seed.role);
    user.active = seed.active;
    repo.create(&mut user)
        .await
        .with_context(|| format!("failed to create user {}", seed.email))?;
    info!(user_id = user.id, role = %user.role, "seed user created");
    Ok(true)
}
