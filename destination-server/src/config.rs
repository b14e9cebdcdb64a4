//! Command-line and environment configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::{Args, Parser};
use destination_db::postgres::DEFAULT_MAX_CONNECTIONS;
use destination_db::{PgConnectOptions, PoolSettings, DEFAULT_TIMEOUT};
use thiserror::Error;

use crate::tracing_setup::TracingConfig;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "destination",
    author,
    version,
    about = "Travel destination lookup service"
)]
pub struct Cli {
    /// Address to bind to
    #[arg(long, env = "BIND_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 9001)]
    pub port: u16,

    /// Per-statement timeout ceiling, in seconds
    #[arg(long, env = "DB_QUERY_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub query_timeout_secs: u64,

    /// Service name reported to the trace collector
    #[arg(long, env = "SERVICE_NAME", default_value = "destination-v2")]
    pub service_name: String,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Export traces over OTLP (requires the `telemetry` feature)
    #[arg(long)]
    pub otel: bool,

    #[command(flatten)]
    pub database: DatabaseArgs,
}

impl Cli {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn tracing(&self) -> TracingConfig {
        TracingConfig {
            debug: self.debug,
            otel: self.otel,
            service_name: self.service_name.clone(),
        }
    }
}

/// Connection parameters. `DATABASE_URL` wins over the `PG_*` variables.
#[derive(Args, Debug, Clone, Default)]
pub struct DatabaseArgs {
    /// Full connection URL
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "PG_HOST")]
    pub pg_host: Option<String>,

    #[arg(long, env = "PG_PORT", default_value_t = 5432)]
    pub pg_port: u16,

    #[arg(long, env = "PG_USER")]
    pub pg_user: Option<String>,

    #[arg(long, env = "PG_PASSWORD", hide_env_values = true)]
    pub pg_password: Option<String>,

    #[arg(long, env = "PG_DATABASE", default_value = "beetravels")]
    pub pg_database: String,

    /// Maximum pooled connections
    #[arg(long, env = "PG_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,
}

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set; provide DATABASE_URL or PG_HOST and PG_USER")]
    Missing(&'static str),

    #[error("invalid DATABASE_URL: {0}")]
    InvalidUrl(String),

    #[error("PG_MAX_CONNECTIONS must be at least 1")]
    NoConnections,
}

impl DatabaseArgs {
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        if let Some(url) = &self.database_url {
            return url
                .parse::<PgConnectOptions>()
                .map_err(|e| ConfigError::InvalidUrl(e.to_string()));
        }

        let host = self.pg_host.as_deref().ok_or(ConfigError::Missing("PG_HOST"))?;
        let user = self.pg_user.as_deref().ok_or(ConfigError::Missing("PG_USER"))?;
        let mut options = PgConnectOptions::new()
            .host(host)
            .port(self.pg_port)
            .username(user)
            .database(&self.pg_database);
        if let Some(password) = &self.pg_password {
            options = options.password(password);
        }
        Ok(options)
    }

    pub fn pool_settings(&self) -> Result<PoolSettings, ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::NoConnections);
        }
        Ok(PoolSettings {
            max_connections: self.max_connections,
            ..PoolSettings::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn pg_args() -> DatabaseArgs {
        DatabaseArgs {
            pg_host: Some("db.internal".into()),
            pg_port: 5433,
            pg_user: Some("bee".into()),
            pg_password: Some("secret".into()),
            pg_database: "beetravels".into(),
            max_connections: 4,
            ..DatabaseArgs::default()
        }
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn builds_options_from_pg_variables() {
        let options = pg_args().connect_options().unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_username(), "bee");
        assert_eq!(options.get_database(), Some("beetravels"));
    }

    #[test]
    fn url_takes_precedence() {
        let args = DatabaseArgs {
            database_url: Some("postgres://app@url-host:6543/other".into()),
            ..pg_args()
        };
        let options = args.connect_options().unwrap();
        assert_eq!(options.get_host(), "url-host");
        assert_eq!(options.get_database(), Some("other"));
    }

    #[test]
    fn missing_host_is_reported() {
        let args = DatabaseArgs {
            pg_host: None,
            ..pg_args()
        };
        assert_eq!(
            args.connect_options().unwrap_err(),
            ConfigError::Missing("PG_HOST")
        );
    }

    #[test]
    fn zero_connections_rejected() {
        let args = DatabaseArgs {
            max_connections: 0,
            ..pg_args()
        };
        assert_eq!(args.pool_settings().unwrap_err(), ConfigError::NoConnections);
    }
}
