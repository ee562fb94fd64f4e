// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Real-time chat relay: WebSocket routing over a conversation store.
#[derive(Debug, Clone, Parser)]
#[command(name = "chatrelay", version)]
pub struct RelayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "CHATRELAY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "CHATRELAY_PORT")]
    pub port: u16,

    /// Token required on `/ws?token=` and as HTTP Bearer. If unset, auth is disabled.
    #[arg(long, env = "CHATRELAY_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// SQLite database file. Conversations are kept in memory when unset.
    #[arg(long, env = "CHATRELAY_DATABASE")]
    pub database: Option<PathBuf>,

    /// Per-connection outbound queue depth. A connection whose queue fills is dropped.
    #[arg(long, default_value_t = 256, env = "CHATRELAY_OUTBOUND_BUFFER")]
    pub outbound_buffer: usize,

    /// Maximum concurrent WebSocket connections.
    #[arg(long, default_value_t = 10_000, env = "CHATRELAY_MAX_CONNECTIONS")]
    pub max_connections: usize,

    /// How long a new socket may take to send its `connect` frame.
    #[arg(long, default_value_t = 10_000, env = "CHATRELAY_HANDSHAKE_TIMEOUT_MS")]
    pub handshake_timeout_ms: u64,

    /// Close connections silent for this long. 0 disables.
    #[arg(long, default_value_t = 0, env = "CHATRELAY_IDLE_TIMEOUT_MS")]
    pub idle_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CHATRELAY_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (json or text).
    #[arg(long, default_value = "text", env = "CHATRELAY_LOG_FORMAT")]
    pub log_format: String,
}

impl RelayConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.outbound_buffer == 0 {
            anyhow::bail!("--outbound-buffer must be at least 1");
        }
        if self.max_connections == 0 {
            anyhow::bail!("--max-connections must be at least 1");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// `None` when idle reaping is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Build a config for tests (port 0, in-memory store, short timeouts).
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            auth_token: None,
            database: None,
            outbound_buffer: 64,
            max_connections: 64,
            handshake_timeout_ms: 2_000,
            idle_timeout_ms: 0,
            log_level: "debug".into(),
            log_format: "text".into(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
