// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The bridge state behind the DPI entry points.
//!
//! [`Cosim`] owns the transport server, the endpoint registry and the
//! diagnostic log. The C ABI in `lib.rs` keeps one instance behind a global
//! lock; Rust harnesses can drive an instance of their own directly.

use crate::env_config::EnvConfig;
use crate::error::BridgeError;
use crate::message_log::{Direction, MessageLog};
use crate::open_array::{validate, OpenArray};
use crate::registry::{EndpointRegistry, ReadEndpoint, WriteEndpoint};
use esi_cosim::{MessageData, RpcServer};
use std::net::SocketAddr;

/// `try_get` capacity meaning "use the whole buffer".
pub const AUTO_SIZE: u32 = u32::MAX;

/// Bridge state: server, endpoints, log sink and the MMIO guard.
pub struct Cosim {
    config: EnvConfig,
    server: Option<RpcServer>,
    endpoints: EndpointRegistry,
    log: Option<MessageLog>,
    mmio_registered: bool,
}

impl Cosim {
    pub fn new(config: EnvConfig) -> Self {
        Self {
            config,
            server: None,
            endpoints: EndpointRegistry::new(),
            log: None,
            mmio_registered: false,
        }
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Replace the configuration used by the next [`Self::init`].
    pub fn set_config(&mut self, config: EnvConfig) {
        self.config = config;
    }

    /// Start the transport server. No-op when already running.
    ///
    /// Failures are logged and leave the bridge stopped; later entry points
    /// then report [`BridgeError::ServerNotRunning`].
    pub fn init(&mut self) {
        if self.server.is_some() {
            return;
        }

        let mut server = match RpcServer::new(self.config.server.clone()) {
            Ok(server) => server,
            Err(e) => {
                log::error!("[cosim] Invalid server configuration: {}", e);
                return;
            }
        };
        match server.run(self.config.server.port) {
            Ok(addr) => {
                log::info!("[cosim] RPC server listening on {}", addr);
                self.server = Some(server);
                self.open_log();
            }
            Err(e) => log::error!("[cosim] Failed to start RPC server: {}", e),
        }
    }

    /// Truncates an existing debug file, so only called once the server is up.
    fn open_log(&mut self) {
        if let Some(path) = &self.config.debug_file {
            match MessageLog::create(path) {
                Ok(log) => self.log = Some(log),
                Err(e) => log::warn!("[cosim] Cannot open debug file {}: {}", path.display(), e),
            }
        }
    }

    /// Stop the server and forget every endpoint. No-op when stopped.
    pub fn finish(&mut self) {
        if let Some(mut server) = self.server.take() {
            server.stop();
            log::info!("[cosim] RPC server stopped");
        }
        self.endpoints.clear();
        self.log = None;
        self.mmio_registered = false;
    }

    pub fn is_running(&self) -> bool {
        self.server.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().and_then(RpcServer::local_addr)
    }

    pub fn server(&self) -> Option<&RpcServer> {
        self.server.as_ref()
    }

    /// Register an endpoint. Exactly one of the type ids must be non-empty;
    /// it selects the direction.
    pub fn register_endpoint(
        &mut self,
        id: &str,
        from_host_type: &str,
        from_host_size: i32,
        to_host_type: &str,
        to_host_size: i32,
    ) -> Result<(), BridgeError> {
        self.init();
        let server = self.server.as_ref().ok_or(BridgeError::ServerNotRunning)?;

        let from_host = !from_host_type.is_empty();
        if from_host == !to_host_type.is_empty() {
            return Err(BridgeError::ConflictingDirection(id.to_string()));
        }
        if self.endpoints.contains_read(id) {
            return Err(BridgeError::DuplicateEndpoint(id.to_string()));
        }

        if from_host {
            let port = server.register_read_port(id, from_host_type);
            self.endpoints
                .insert_read(id, ReadEndpoint::new(port, from_host_size));
        } else {
            let port = server.register_write_port(id, to_host_type);
            self.endpoints
                .insert_write(id, WriteEndpoint::new(port, to_host_size));
        }
        log::debug!("[cosim] Registered endpoint {}", id);
        Ok(())
    }

    /// Poll a from-host endpoint without waiting.
    ///
    /// Returns the number of message bytes copied into `buffer`, or 0 when no
    /// message is ready. `capacity` bounds the copy; [`AUTO_SIZE`] selects the
    /// full buffer. Bytes between the message end and `capacity` are zeroed.
    /// A message that fails the buffer checks is consumed.
    pub fn try_get(
        &mut self,
        id: &str,
        buffer: &dyn OpenArray,
        capacity: u32,
    ) -> Result<u32, BridgeError> {
        if self.server.is_none() {
            return Err(BridgeError::ServerNotRunning);
        }
        let endpoint = self
            .endpoints
            .read_mut(id)
            .ok_or_else(|| BridgeError::EndpointNotFound(id.to_string()))?;
        let Some(msg) = endpoint.poll() else {
            return Ok(0);
        };
        if let Some(log) = self.log.as_mut() {
            log.record(id, Direction::ToSim, msg.as_bytes());
        }

        // Buffers are only checked when there is something to copy; most
        // polls find nothing.
        let view = validate(buffer, 1)?;
        let capacity = if capacity == AUTO_SIZE {
            view.len()
        } else if capacity as usize > view.len() {
            return Err(BridgeError::InvalidSize {
                requested: i64::from(capacity),
                available: view.len(),
            });
        } else {
            capacity as usize
        };
        if msg.len() > capacity {
            return Err(BridgeError::MessageTooLarge {
                size: msg.len(),
                capacity,
            });
        }

        view.write(msg.as_bytes(), capacity)?;
        Ok(msg.len() as u32)
    }

    /// Send `size` bytes of `buffer` to the host. A negative size sends the
    /// whole buffer.
    pub fn try_put(
        &mut self,
        id: &str,
        buffer: &dyn OpenArray,
        size: i32,
    ) -> Result<(), BridgeError> {
        if self.server.is_none() {
            return Err(BridgeError::ServerNotRunning);
        }
        let view = validate(buffer, 1)?;
        let size = match usize::try_from(size) {
            Err(_) => view.len(),
            Ok(size) if size > view.len() => {
                return Err(BridgeError::InvalidSize {
                    requested: size as i64,
                    available: view.len(),
                })
            }
            Ok(size) => size,
        };
        let msg = MessageData::new(view.read(size)?);

        let endpoint = self
            .endpoints
            .write(id)
            .ok_or_else(|| BridgeError::EndpointNotFound(id.to_string()))?;
        if let Some(log) = self.log.as_mut() {
            log.record(id, Direction::ToHost, msg.as_bytes());
        }
        endpoint.port().write(msg);
        Ok(())
    }

    /// Publish the compressed system manifest.
    ///
    /// Simulators hand the blob over highest element first, so the bytes are
    /// reversed on the way in. An invalid buffer is logged and ignored.
    pub fn set_manifest(&mut self, esi_version: i32, blob: &dyn OpenArray) {
        self.init();
        let Some(server) = self.server.as_ref() else {
            return;
        };
        let bytes = match validate(blob, 1).and_then(|view| view.read(view.len())) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("[cosim] Invalid manifest array: {}", e);
                return;
            }
        };
        let reversed: Vec<u8> = bytes.into_iter().rev().collect();
        log::info!(
            "[cosim] Manifest set (ESI version {}, {} bytes)",
            esi_version,
            reversed.len()
        );
        server.set_manifest(esi_version, reversed);
    }

    /// Claim the low-level MMIO master. Only one claim is allowed per session.
    pub fn mmio_register(&mut self) -> Result<(), BridgeError> {
        if self.mmio_registered {
            return Err(BridgeError::MmioAlreadyRegistered);
        }
        self.init();
        self.mmio_registered = true;
        Ok(())
    }

    pub fn mmio_registered(&self) -> bool {
        self.mmio_registered
    }

    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }
}

impl Default for Cosim {
    fn default() -> Self {
        Self::new(EnvConfig::default())
    }
}

impl Drop for Cosim {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_array::SliceArray;
    use std::net::{IpAddr, Ipv4Addr};

    fn running() -> Cosim {
        let mut config = EnvConfig::default();
        config.server.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let mut cosim = Cosim::new(config);
        cosim.init();
        assert!(cosim.is_running());
        cosim
    }

    #[test]
    fn test_calls_before_init_fail() {
        let mut cosim = Cosim::default();
        let mut buf = [0u8; 4];
        let array = SliceArray::new(&mut buf);
        assert_eq!(cosim.try_get("E1", &array, 4).unwrap_err().code(), -1);
        assert_eq!(cosim.try_put("E1", &array, 4).unwrap_err().code(), -1);
    }

    #[test]
    fn test_init_is_idempotent() {
        let mut cosim = running();
        let addr = cosim.local_addr();
        cosim.init();
        assert_eq!(cosim.local_addr(), addr);
        cosim.finish();
        cosim.finish();
        assert!(!cosim.is_running());
    }

    #[test]
    fn test_failed_init_keeps_debug_file() {
        let taken = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cosim.log");
        std::fs::write(&path, "previous run\n").unwrap();

        let mut config = EnvConfig::default();
        config.server.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.server.port = taken.local_addr().unwrap().port();
        config.debug_file = Some(path.clone());
        let mut cosim = Cosim::new(config);
        cosim.init();

        assert!(!cosim.is_running());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "previous run\n");
    }

    #[test]
    fn test_register_direction_checks() {
        let mut cosim = running();
        let err = cosim.register_endpoint("x", "u8", 1, "u8", 1).unwrap_err();
        assert!(matches!(err, BridgeError::ConflictingDirection(_)));
        let err = cosim.register_endpoint("x", "", 0, "", 0).unwrap_err();
        assert_eq!(err.code(), -2);
        assert!(cosim.endpoints().is_empty());
    }

    #[test]
    fn test_register_auto_initializes() {
        let mut cosim = Cosim::new(EnvConfig::default());
        cosim.register_endpoint("in", "u8", 1, "", 0).unwrap();
        assert!(cosim.is_running());
    }

    #[test]
    fn test_unknown_endpoints() {
        let mut cosim = running();
        let mut buf = [0u8; 4];
        let array = SliceArray::new(&mut buf);
        assert_eq!(cosim.try_get("nope", &array, 4).unwrap_err().code(), -4);
        assert_eq!(cosim.try_put("nope", &array, 4).unwrap_err().code(), -4);
    }

    #[test]
    fn test_try_put_size_checks() {
        let mut cosim = running();
        cosim.register_endpoint("out", "", 0, "u8[4]", 4).unwrap();
        let mut buf = [1u8, 2, 3, 4];
        let array = SliceArray::new(&mut buf);

        assert_eq!(cosim.try_put("out", &array, 5).unwrap_err().code(), -3);
        cosim.try_put("out", &array, -1).unwrap();
        cosim.try_put("out", &array, 2).unwrap();

        let port = cosim.server().unwrap().channels().write_port("out").unwrap();
        assert_eq!(port.backlog_len(), 2);
        let mut rx = port.subscribe();
        assert_eq!(rx.try_recv().unwrap().as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(rx.try_recv().unwrap().as_bytes(), &[1, 2]);
    }

    #[test]
    fn test_mmio_single_registration() {
        let mut cosim = Cosim::new(EnvConfig::default());
        cosim.mmio_register().unwrap();
        assert_eq!(cosim.mmio_register().unwrap_err().code(), -1);
        cosim.finish();
        cosim.mmio_register().unwrap();
    }
}
