// ABOUTME: PostgreSQL connection setup from porter configuration
// ABOUTME: Handles TLS, keepalives, and readable connection failures

use crate::config::ConnectionConfig;
use crate::error::PorterError;
use anyhow::{Context, Result};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::Client;

/// Build a driver config from connection parameters
///
/// TCP keepalives are always enabled (first probe after 60s idle, then every
/// 10s) so long table scans survive load balancers that drop idle flows.
pub fn build_config(config: &ConnectionConfig) -> Result<tokio_postgres::Config> {
    let ssl_mode = match config.ssl_mode.to_lowercase().as_str() {
        "disable" => SslMode::Disable,
        "prefer" | "allow" => SslMode::Prefer,
        "require" | "verify-ca" | "verify-full" => SslMode::Require,
        other => {
            return Err(PorterError::Configuration(format!(
                "Unsupported ssl_mode '{}'. Use disable, prefer, or require",
                other
            ))
            .into())
        }
    };

    let mut pg = tokio_postgres::Config::new();
    pg.host(&config.host)
        .port(config.port)
        .dbname(&config.database)
        .user(&config.user)
        .ssl_mode(ssl_mode)
        .application_name("tenant-porter")
        .connect_timeout(Duration::from_secs(30))
        .keepalives(true)
        .keepalives_idle(Duration::from_secs(60))
        .keepalives_interval(Duration::from_secs(10));
    if let Some(password) = &config.password {
        pg.password(password);
    }
    Ok(pg)
}

/// Connect to PostgreSQL with TLS support
///
/// The connection task is spawned onto the runtime; the returned client is
/// usable until dropped. There is no retry: a failed connection fails the
/// command.
///
/// # Errors
///
/// Returns a descriptive error when authentication fails, the database does
/// not exist, the server is unreachable, TLS negotiation fails, or the
/// connection times out.
pub async fn connect(config: &ConnectionConfig) -> Result<Client> {
    let pg = build_config(config)?;

    let tls_connector = TlsConnector::builder()
        .danger_accept_invalid_certs(false)
        .build()
        .context("Failed to build TLS connector")?;
    let tls = MakeTlsConnector::new(tls_connector);

    tracing::debug!("Connecting to {}", config.display_target());

    let (client, connection) = pg
        .connect(tls)
        .await
        .map_err(|e| describe_connect_error(&config.display_target(), &e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error: {}", e);
        }
    });

    Ok(client)
}

fn describe_connect_error(target: &str, error_msg: &str) -> anyhow::Error {
    if error_msg.contains("password authentication failed") {
        anyhow::anyhow!(
            "Authentication failed for {}: Invalid username or password.\n\
             Please verify PGUSER/PGPASSWORD or the [database] section of your config.",
            target
        )
    } else if error_msg.contains("database") && error_msg.contains("does not exist") {
        anyhow::anyhow!(
            "Database does not exist: {}\n\
             Please check the database name for {}.",
            error_msg,
            target
        )
    } else if error_msg.contains("Connection refused") || error_msg.contains("could not connect")
    {
        anyhow::anyhow!(
            "Connection refused: Unable to reach database server {}.\n\
             Please check:\n\
             - The host and port are correct\n\
             - The database server is running\n\
             - Firewall rules allow connections\n\
             Error: {}",
            target,
            error_msg
        )
    } else if error_msg.contains("timeout") || error_msg.contains("timed out") {
        anyhow::anyhow!(
            "Connection timeout: {} did not respond in time.\n\
             Error: {}",
            target,
            error_msg
        )
    } else if error_msg.contains("SSL") || error_msg.contains("TLS") {
        anyhow::anyhow!(
            "TLS/SSL error: Failed to establish secure connection to {}.\n\
             Set ssl_mode = \"disable\" for servers without TLS.\n\
             Error: {}",
            target,
            error_msg
        )
    } else if error_msg.contains("no pg_hba.conf entry") {
        anyhow::anyhow!(
            "Access denied: No pg_hba.conf entry for this host on {}.\n\
             Contact your database administrator to update pg_hba.conf.\n\
             Error: {}",
            target,
            error_msg
        )
    } else {
        anyhow::anyhow!("Failed to connect to {}: {}", target, error_msg)
    }
}
