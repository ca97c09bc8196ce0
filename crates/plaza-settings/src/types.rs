//! Settings type definitions.
//!
//! All types use camelCase JSON keys and `#[serde(default)]`, so a settings
//! file only needs the keys it wants to change.

use plaza_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Root settings for the plaza server.
///
/// ```json
/// {
///   "server": { "port": 9000, "allowedOrigins": ["https://plaza.example"] },
///   "logging": { "format": "json" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlazaSettings {
    /// Network and connection settings.
    pub server: ServerSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// Network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Origins allowed to open a channel or call the HTTP surface.
    pub allowed_origins: Vec<String>,
    /// Outbound queue depth per connection before sends start failing.
    pub send_queue_capacity: usize,
    /// Largest accepted inbound WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Seconds between server pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a pong before a connection is dropped.
    pub heartbeat_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            allowed_origins: vec!["http://localhost:5173".to_string()],
            send_queue_capacity: 256,
            max_message_size: 64 * 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
