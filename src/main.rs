//! # plaza
//!
//! Plaza room server binary: loads settings, starts logging, serves the room
//! until ctrl-c, then shuts down gracefully.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use plaza_core::logging::{init_subscriber, LogFormat};
use plaza_server::config::ServerConfig;
use plaza_server::server::PlazaServer;
use plaza_settings::PlazaSettings;

/// Plaza shared-room WebSocket server.
#[derive(Parser, Debug)]
#[command(name = "plaza", about = "Plaza shared-room WebSocket server")]
struct Cli {
    /// Settings file (defaults to `~/.plaza/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Allowed request origin; repeat for several. Replaces the configured list.
    #[arg(long = "allowed-origin", value_name = "ORIGIN")]
    allowed_origins: Vec<String>,

    /// Log line format: `compact` or `json` (overrides settings).
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Seconds to wait for sessions to close on shutdown.
    #[arg(long, default_value = "10")]
    shutdown_timeout_secs: u64,
}

impl Cli {
    fn apply(&self, settings: &mut PlazaSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if !self.allowed_origins.is_empty() {
            settings.server.allowed_origins.clone_from(&self.allowed_origins);
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load settings early (needed for log level before logging init)
    let settings_path = cli.config.clone().unwrap_or_else(plaza_settings::settings_path);
    let (mut settings, rejected) = plaza_settings::load_settings_with_report(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    cli.apply(&mut settings);
    plaza_settings::validate(&settings).context("Invalid settings")?;

    init_subscriber(&settings.logging.level, settings.logging.format);
    plaza_settings::warn_rejected(&rejected);
    tracing::info!(
        path = %settings_path.display(),
        host = %settings.server.host,
        port = settings.server.port,
        origins = ?settings.server.allowed_origins,
        "Starting plaza server"
    );

    let server = PlazaServer::new(ServerConfig::from(&settings.server));
    let (addr, handle) = server.listen().await.context("Failed to start server")?;
    tracing::info!(%addr, "Plaza server ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!(sessions = server.room().len(), "Shutting down");
    server
        .shutdown()
        .graceful_shutdown(
            vec![handle],
            Some(Duration::from_secs(cli.shutdown_timeout_secs)),
        )
        .await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "plaza",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--allowed-origin",
            "https://a.example",
            "--allowed-origin",
            "https://b.example",
            "--log-format",
            "json",
        ]);
        let mut settings = PlazaSettings::default();
        cli.apply(&mut settings);

        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(
            settings.server.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn no_flags_keep_settings() {
        let cli = Cli::parse_from(["plaza"]);
        let mut settings = PlazaSettings::default();
        cli.apply(&mut settings);

        assert_eq!(settings.server.port, 8787);
        assert_eq!(settings.server.allowed_origins, vec!["http://localhost:5173"]);
        assert_eq!(cli.shutdown_timeout_secs, 10);
        assert!(cli.config.is_none());
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
