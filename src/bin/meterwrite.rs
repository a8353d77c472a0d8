//! meterwrite server binary
//!
//! Serves Prometheus remote write and the metering API from one HTTP port.

use meterwrite::api::tls::serve_tls;
use meterwrite::api::{self, ApiServerConfig, TlsConfig};
use meterwrite::config::ComponentFactory;
use meterwrite::telemetry::Telemetry;
use meterwrite::{
    Error, ServiceConfig, StorageConfig, StorageTarget, TenancyConfig, TenantMode,
};

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

/// meterwrite server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HTTP API port
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Full PostgreSQL connection URL; takes precedence over the POSTGRES_* parts
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// PostgreSQL host
    #[arg(long, env = "POSTGRES_HOST", default_value = "localhost")]
    postgres_host: String,

    /// PostgreSQL port
    #[arg(long, env = "POSTGRES_PORT", default_value = "5432")]
    postgres_port: u16,

    /// PostgreSQL user
    #[arg(long, env = "POSTGRES_USER", default_value = "postgres")]
    postgres_user: String,

    /// PostgreSQL password
    #[arg(long, env = "POSTGRES_PASSWORD", default_value = "", hide_env_values = true)]
    postgres_password: String,

    /// PostgreSQL database
    #[arg(long, env = "POSTGRES_DB", default_value = "postgres")]
    postgres_db: String,

    /// Maximum pooled database connections
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value = "10")]
    db_max_connections: u32,

    /// Seconds to wait for a pooled connection
    #[arg(long, env = "DB_ACQUIRE_TIMEOUT_SECS", default_value = "30")]
    db_acquire_timeout_secs: u64,

    /// Tenant resolution mode: identity or label
    #[arg(long, env = "TENANT_MODE", default_value = "identity")]
    tenant_mode: TenantMode,

    /// Organization used in identity mode when no client certificate is present
    #[arg(long, env = "ORG_ID")]
    org_id: Option<String>,

    /// Maximum request body size in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value = "16777216")]
    max_body_bytes: usize,

    /// Allow cross-origin requests
    #[arg(long, env = "ENABLE_CORS")]
    enable_cors: bool,

    /// CA bundle that client certificates must chain to
    #[arg(long, env = "CA_CERT_PATH")]
    ca_cert_path: Option<PathBuf>,

    /// Server certificate chain (PEM)
    #[arg(long, env = "SERVER_CERT_PATH")]
    server_cert_path: Option<PathBuf>,

    /// Server private key (PEM)
    #[arg(long, env = "SERVER_KEY_PATH")]
    server_key_path: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn service_config(&self) -> Result<ServiceConfig, Error> {
        let target = match self.database_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => StorageTarget::Url(url.to_string()),
            _ => StorageTarget::Parts {
                host: self.postgres_host.clone(),
                port: self.postgres_port,
                user: self.postgres_user.clone(),
                password: self.postgres_password.clone(),
                database: self.postgres_db.clone(),
            },
        };

        let tls = TlsConfig::from_paths(
            self.ca_cert_path.clone(),
            self.server_cert_path.clone(),
            self.server_key_path.clone(),
        )?;

        Ok(ServiceConfig {
            storage: StorageConfig {
                target,
                max_connections: self.db_max_connections,
                acquire_timeout: Duration::from_secs(self.db_acquire_timeout_secs),
            },
            tenancy: TenancyConfig {
                mode: self.tenant_mode,
                static_org_id: self.org_id.clone(),
            },
            api: ApiServerConfig {
                http_port: self.port,
                max_body_size: self.max_body_bytes,
                enable_cors: self.enable_cors,
                tls,
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = args.service_config()?;
    let _telemetry = Telemetry::init(&config, &args.log_level)?;

    info!("Starting meterwrite");

    if config.storage.max_connections == 0 {
        return Err(Error::Config("DB_MAX_CONNECTIONS must be at least 1".to_string()).into());
    }
    let tls = config.api.tls.as_ref().map(TlsConfig::load).transpose()?;

    let state = ComponentFactory::build(&config).await?;
    let router = api::build_http_router(state, &config.api);

    let listener = api::bind(&config.api).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    info!(
        http_port = config.api.http_port,
        tenant_mode = config.tenancy.mode.as_str(),
        max_body_size = config.api.max_body_size,
        tls = tls.is_some(),
        "meterwrite ready"
    );

    match tls {
        Some(tls) => serve_tls(listener, router, tls, shutdown_rx).await?,
        None => axum::serve(listener, router)
            .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
            .await
            .map_err(|e| Error::Internal(format!("HTTP server error: {e}")))?,
    }

    info!("meterwrite shutting down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }
    let _ = shutdown.changed().await;
}
