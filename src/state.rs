use std::{sync::Arc, time::Duration};

use crate::{
    auth::{jwt::TokenService, password::Argon2Hasher},
    config::AppConfig,
    db::Connection,
    users::{repo::build_repository, services::UserService},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub conn: Connection,
    pub tokens: Arc<TokenService>,
    pub users: Arc<UserService>,
}

impl AppState {
    /// Opens the configured backend and wires the services on top of it.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let conn = Connection::connect(&config.database).await?;
        Ok(Self::from_parts(Arc::new(config), conn))
    }

    pub fn from_parts(config: Arc<AppConfig>, conn: Connection) -> Self {
        let tokens = Arc::new(TokenService::new(&config.jwt));
        let users = Arc::new(UserService::new(
            build_repository(&conn),
            tokens.clone(),
            Arc::new(Argon2Hasher::default()),
            Duration::from_secs(config.request_timeout_secs),
        ));
        Self {
            config,
            conn,
            tokens,
            users,
        }
    }
}
