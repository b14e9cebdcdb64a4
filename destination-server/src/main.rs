//! destination - travel destination lookup service

use anyhow::{Context, Result};
use clap::Parser;
use destination_db::{Database, PoolSettings, PostgresPool};
use destination_server::config::Cli;
use destination_server::{run_server, tracing_setup, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    tracing_setup::init(&cli.tracing())?;

    let result = run(cli).await;
    tracing_setup::shutdown_otel();
    result
}

async fn run(cli: Cli) -> Result<()> {
    let options = cli
        .database
        .connect_options()
        .context("invalid database configuration")?;
    let settings = PoolSettings {
        statement_timeout: Some(cli.query_timeout()),
        ..cli
            .database
            .pool_settings()
            .context("invalid database configuration")?
    };

    let pool = PostgresPool::connect_with(options, settings)
        .await
        .context("failed to connect to database")?;
    let db = Database::new(pool).with_timeout(cli.query_timeout());

    let config = ServerConfig {
        bind_addr: cli.bind_addr(),
    };
    run_server(db, config).await.context("server error")?;
    Ok(())
}
