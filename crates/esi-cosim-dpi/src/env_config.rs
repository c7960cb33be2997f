// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Environment variable configuration for the cosim DPI bridge.
//!
//! The simulator loads the bridge as a shared library, so the environment
//! is the only configuration channel:
//!
//! - `COSIM_PORT`: TCP port for the RPC server (default: let the OS pick)
//! - `COSIM_HOST`: Bind address (default: 0.0.0.0)
//! - `COSIM_DEBUG_FILE`: Write a hex dump of every message here
//! - `COSIM_CONFIG_FILE`: JSON server configuration; the variables above
//!   override its fields
//! - `COSIM_LOG`: `env_logger` filter for bridge diagnostics (default: "info")
//!
//! # Example
//!
//! ```bash
//! export COSIM_PORT=4242
//! export COSIM_DEBUG_FILE=cosim-debug.log
//! vsim -sv_lib libesi_cosim_dpi top
//! ```

use esi_cosim::ServerConfig;
use std::env;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

pub const ENV_PORT: &str = "COSIM_PORT";
pub const ENV_HOST: &str = "COSIM_HOST";
pub const ENV_DEBUG_FILE: &str = "COSIM_DEBUG_FILE";
pub const ENV_CONFIG_FILE: &str = "COSIM_CONFIG_FILE";
pub const ENV_LOG: &str = "COSIM_LOG";

/// Runtime configuration from environment variables
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    /// Transport server settings (port 0 = auto-select)
    pub server: ServerConfig,

    /// Diagnostic hex log destination
    pub debug_file: Option<PathBuf>,
}

impl EnvConfig {
    /// Read the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut server = match lookup(ENV_CONFIG_FILE) {
            Some(path) => match ServerConfig::from_file(Path::new(&path)) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("[cosim] Ignoring {} ({}): {}", ENV_CONFIG_FILE, path, e);
                    ServerConfig::default()
                }
            },
            None => ServerConfig::default(),
        };

        match lookup(ENV_PORT) {
            Some(port) => match port.trim().parse::<u16>() {
                Ok(port) => {
                    log::info!("[cosim] Opening RPC server on port {}", port);
                    server.port = port;
                }
                Err(_) => {
                    log::warn!("[cosim] Invalid {}={:?}, letting RPC server select a port", ENV_PORT, port);
                    server.port = 0;
                }
            },
            None if server.port == 0 => {
                log::info!("[cosim] RPC server port not found. Letting RPC server select one");
            }
            None => {}
        }

        if let Some(host) = lookup(ENV_HOST) {
            match host.trim().parse::<IpAddr>() {
                Ok(addr) => server.bind_address = addr,
                Err(_) => log::warn!("[cosim] Invalid {}={:?}, keeping {}", ENV_HOST, host, server.bind_address),
            }
        }

        let debug_file = lookup(ENV_DEBUG_FILE)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        Self { server, debug_file }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EnvConfig::from_lookup(lookup(&[]));
        assert_eq!(config.server.port, 0);
        assert!(config.debug_file.is_none());
    }

    #[test]
    fn test_port_and_debug_file() {
        let config = EnvConfig::from_lookup(lookup(&[
            (ENV_PORT, "4242"),
            (ENV_DEBUG_FILE, "/tmp/cosim.log"),
            (ENV_HOST, "127.0.0.1"),
        ]));
        assert_eq!(config.server.port, 4242);
        assert_eq!(config.debug_file, Some(PathBuf::from("/tmp/cosim.log")));
        assert_eq!(config.server.bind_address, IpAddr::from([127, 0, 0, 1]));
    }

    #[test]
    fn test_invalid_port_falls_back_to_auto() {
        let config = EnvConfig::from_lookup(lookup(&[(ENV_PORT, "not-a-port")]));
        assert_eq!(config.server.port, 0);
    }

    #[test]
    fn test_env_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cosim.json");
        std::fs::write(&path, r#"{ "port": 5000, "client_queue_depth": 8 }"#).unwrap();
        let path = path.to_str().unwrap().to_string();

        let config = EnvConfig::from_lookup(lookup(&[(ENV_CONFIG_FILE, path.as_str())]));
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.client_queue_depth, 8);

        let config = EnvConfig::from_lookup(lookup(&[(ENV_CONFIG_FILE, path.as_str()), (ENV_PORT, "6000")]));
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.server.client_queue_depth, 8);
    }

    #[test]
    fn test_bad_config_file_uses_defaults() {
        let config = EnvConfig::from_lookup(lookup(&[(ENV_CONFIG_FILE, "/nonexistent/cosim.json")]));
        assert_eq!(config.server.port, 0);
    }
}
