use accountd::{app, config::AppConfig, migration::registry, state::AppState, telemetry};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    telemetry::init();

    let address = config.address();
    let env = config.env.clone();
    let auto_migrate = config.auto_migrate;
    let state = AppState::init(config).await?;

    let migrator = registry::migrator(state.conn.clone());
    if auto_migrate {
        let report = migrator.run(&env).await?;
        info!(applied = report.applied.len(), "migrations applied at startup");
    } else {
        let pending = migrator.pending().await?;
        if !pending.is_empty() {
            let versions: Vec<_> = pending.iter().map(|p| p.version.as_str()).collect();
            warn!(?versions, "pending migrations; run `migrate` or set AUTO_MIGRATE=true");
        }
    }

    let conn = state.conn.clone();
    let result = app::serve(app::build_app(state), &address).await;
    conn.close().await;
    result
}
