use std::{fmt, str::FromStr};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("unsupported database driver: {0} (supported: sqlite, postgres, mongo)")]
    UnsupportedDriver(String),
    #[error("{key} must be a number, got {value:?}")]
    NotANumber { key: &'static str, value: String },
}

/// Backend selected by `DB_DRIVER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Sqlite,
    Postgres,
    Mongo,
}

impl FromStr for Driver {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Driver::Sqlite),
            "postgres" => Ok(Driver::Postgres),
            "mongo" => Ok(Driver::Mongo),
            _ => Err(ConfigError::UnsupportedDriver(s.to_string())),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Driver::Sqlite => "sqlite",
            Driver::Postgres => "postgres",
            Driver::Mongo => "mongo",
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub dsn: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
}

impl PostgresConfig {
    /// Explicit DSN wins over the individual fields.
    pub fn dsn(&self) -> String {
        if let Some(dsn) = &self.dsn {
            return dsn.clone();
        }
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub driver: Driver,
    pub table_prefix: String,
    pub sqlite_path: String,
    pub postgres: PostgresConfig,
    pub mongo: MongoConfig,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub expiration_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub auto_migrate: bool,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let driver: Driver = var("DB_DRIVER", "sqlite").parse()?;
        let table_prefix = var("DB_TABLE_PREFIX", "fx_");
        if table_prefix.trim().is_empty() {
            return Err(ConfigError::Missing("DB_TABLE_PREFIX"));
        }

        let postgres = PostgresConfig {
            dsn: lookup("POSTGRES_DSN").filter(|v| !v.trim().is_empty()),
            host: var("POSTGRES_HOST", "localhost"),
            port: parse_number(&lookup, "POSTGRES_PORT", 5432)?,
            user: var("POSTGRES_USER", "postgres"),
            password: var("POSTGRES_PASSWORD", ""),
            database: var("POSTGRES_DATABASE", "fx_gin_scaffold"),
            ssl_mode: var("POSTGRES_SSLMODE", "disable"),
        };
        let mongo = MongoConfig {
            uri: var("MONGO_URI", "mongodb://localhost:27017"),
            database: var("MONGO_DATABASE", "fx_gin_scaffold"),
        };

        match driver {
            Driver::Postgres if postgres.dsn.is_none() => {
                if postgres.host.is_empty() {
                    return Err(ConfigError::Missing("POSTGRES_HOST"));
                }
                if postgres.user.is_empty() {
                    return Err(ConfigError::Missing("POSTGRES_USER"));
                }
                if postgres.database.is_empty() {
                    return Err(ConfigError::Missing("POSTGRES_DATABASE"));
                }
            }
            Driver::Mongo => {
                if mongo.uri.is_empty() {
                    return Err(ConfigError::Missing("MONGO_URI"));
                }
                if mongo.database.is_empty() {
                    return Err(ConfigError::Missing("MONGO_DATABASE"));
                }
            }
            _ => {}
        }

        let database = DatabaseConfig {
            driver,
            table_prefix,
            sqlite_path: var("SQLITE_PATH", "./data/app.db"),
            postgres,
            mongo,
            max_connections: parse_number(&lookup, "DB_MAX_CONNECTIONS", 25)?,
        };

        let secret = lookup("JWT_SECRET")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let jwt = JwtConfig {
            secret,
            issuer: var("JWT_ISSUER", "accountd"),
            audience: var("JWT_AUDIENCE", "accountd-users"),
            expiration_minutes: parse_number(&lookup, "JWT_EXPIRATION_MINUTES", 60 * 24)?,
        };

        Ok(Self {
            env: var("APP_ENV", "development"),
            host: var("APP_HOST", "0.0.0.0"),
            port: parse_number(&lookup, "APP_PORT", 8080)?,
            request_timeout_secs: parse_number(&lookup, "REQUEST_TIMEOUT_SECS", 30)?,
            auto_migrate: var("AUTO_MIGRATE", "false").eq_ignore_ascii_case("true"),
            database,
            jwt,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_number<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::NotANumber { key, value }),
    }
}
