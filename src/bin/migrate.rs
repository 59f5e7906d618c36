use std::process::ExitCode;

use accountd::{
    config::AppConfig,
    db::Connection,
    migration::{registry, Migrator},
    telemetry,
};
use anyhow::Context;
use clap::Parser;
use tracing::error;

/// Applies pending schema migrations, then the seeders for the environment.
#[derive(Parser)]
#[command(name = "migrate", about = "Database migrations and seeders for accountd")]
struct Cli {
    /// List pending migrations without applying anything.
    #[arg(long, conflicts_with = "dry_run")]
    check: bool,

    /// Show pending migrations and which seeders would run or be skipped.
    #[arg(long)]
    dry_run: bool,

    /// Environment used to select seeders. Defaults to APP_ENV.
    #[arg(long)]
    env: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "migrate failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load config")?;
    telemetry::init();
    let env = cli.env.unwrap_or(config.env);

    let conn = Connection::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    let migrator = registry::migrator(conn.clone());

    let result = if cli.check {
        check(&migrator).await
    } else if cli.dry_run {
        dry_run(&migrator, &env).await
    } else {
        let report = migrator.run(&env).await;
        report.map(|r| {
            println!(
                "applied {} migration(s), {} already applied",
                r.applied.len(),
                r.skipped.len()
            );
        })
    };

    conn.close().await;
    result
}

async fn check(migrator: &Migrator) -> anyhow::Result<()> {
    let pending = migrator.pending().await?;
    if pending.is_empty() {
        println!("no pending migrations");
        return Ok(());
    }
    for p in &pending {
        println!("pending: {} - {}", p.version, p.description);
    }
    println!("{} pending migration(s)", pending.len());
    Ok(())
}

async fn dry_run(migrator: &Migrator, env: &str) -> anyhow::Result<()> {
    let plan = migrator.plan(env).await?;
    println!("migrations that would run:");
    if plan.pending.is_empty() {
        println!("  none");
    }
    for p in &plan.pending {
        println!("  {} - {}", p.version, p.description);
    }
    println!("seeders for environment {}:", plan.env);
    for name in &plan.seeders_to_run {
        println!("  would run: {name}");
    }
    for name in &plan.seeders_skipped {
        println!("  would skip: {name}");
    }
    Ok(())
}
