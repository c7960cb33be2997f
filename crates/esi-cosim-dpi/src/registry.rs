// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint registry and the per-channel outstanding read.
//!
//! Each read endpoint owns a [`ReadSlot`]. Once armed the slot always holds
//! exactly one request: [`ReadEndpoint::poll`] swaps a completed request for
//! a fresh one in the same call that returns its message, so the channel is
//! never left without a pending read and never has two.

use esi_cosim::{MessageData, PendingRead, ReadChannelPort, WriteChannelPort};
use std::collections::HashMap;
use std::sync::Arc;

/// Read state of one from-host channel.
#[derive(Debug)]
pub enum ReadSlot {
    /// No request issued yet.
    Idle,
    /// One request outstanding; it may already hold its message.
    Requested(PendingRead),
}

/// A registered from-host endpoint.
pub struct ReadEndpoint {
    port: Arc<ReadChannelPort>,
    declared_size: i32,
    slot: ReadSlot,
}

impl ReadEndpoint {
    pub fn new(port: Arc<ReadChannelPort>, declared_size: i32) -> Self {
        Self {
            port,
            declared_size,
            slot: ReadSlot::Idle,
        }
    }

    /// Issue the first read. No-op once armed.
    pub fn arm(&mut self) {
        if matches!(self.slot, ReadSlot::Idle) {
            self.slot = ReadSlot::Requested(self.port.read_async());
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.slot, ReadSlot::Requested(_))
    }

    /// Zero-wait poll. On a hit, the next read is issued before returning.
    pub fn poll(&mut self) -> Option<MessageData> {
        let msg = match &mut self.slot {
            ReadSlot::Requested(pending) => pending.try_take()?,
            ReadSlot::Idle => {
                self.arm();
                return None;
            }
        };
        self.slot = ReadSlot::Requested(self.port.read_async());
        Some(msg)
    }

    pub fn port(&self) -> &Arc<ReadChannelPort> {
        &self.port
    }

    /// Byte size the simulator declared for this endpoint's type.
    pub fn declared_size(&self) -> i32 {
        self.declared_size
    }
}

/// A registered to-host endpoint.
pub struct WriteEndpoint {
    port: Arc<WriteChannelPort>,
    declared_size: i32,
}

impl WriteEndpoint {
    pub fn new(port: Arc<WriteChannelPort>, declared_size: i32) -> Self {
        Self {
            port,
            declared_size,
        }
    }

    pub fn port(&self) -> &Arc<WriteChannelPort> {
        &self.port
    }

    pub fn declared_size(&self) -> i32 {
        self.declared_size
    }
}

/// Endpoints registered by the simulator, keyed by id.
///
/// Accessed only from the simulator thread (under the bridge lock); the
/// ports it holds are the only state shared with the transport.
#[derive(Default)]
pub struct EndpointRegistry {
    reads: HashMap<String, ReadEndpoint>,
    writes: HashMap<String, WriteEndpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_read(&self, id: &str) -> bool {
        self.reads.contains_key(id)
    }

    /// Add a read endpoint and arm its first read. Replaces any previous
    /// endpoint with the same id; callers check [`Self::contains_read`] first.
    pub fn insert_read(&mut self, id: &str, mut endpoint: ReadEndpoint) {
        endpoint.arm();
        self.reads.insert(id.to_string(), endpoint);
    }

    /// Add a write endpoint. An id that is already registered keeps its
    /// first handle.
    pub fn insert_write(&mut self, id: &str, endpoint: WriteEndpoint) {
        self.writes.entry(id.to_string()).or_insert(endpoint);
    }

    pub fn read_mut(&mut self, id: &str) -> Option<&mut ReadEndpoint> {
        self.reads.get_mut(id)
    }

    pub fn read(&self, id: &str) -> Option<&ReadEndpoint> {
        self.reads.get(id)
    }

    pub fn write(&self, id: &str) -> Option<&WriteEndpoint> {
        self.writes.get(id)
    }

    pub fn len(&self) -> usize {
        self.reads.len() + self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }

    /// Forget every endpoint, dropping outstanding reads.
    pub fn clear(&mut self) {
        self.reads.clear();
        self.writes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esi_cosim::ChannelRegistry;

    #[test]
    fn test_insert_arms_read() {
        let channels = ChannelRegistry::new();
        let port = channels.register_read_port("E1", "u8[4]");
        let mut registry = EndpointRegistry::new();
        registry.insert_read("E1", ReadEndpoint::new(port.clone(), 4));

        assert!(registry.read("E1").unwrap().is_armed());
        assert_eq!(port.outstanding_reads(), 1);
    }

    #[test]
    fn test_poll_keeps_exactly_one_read_outstanding() {
        let channels = ChannelRegistry::new();
        let port = channels.register_read_port("E1", "u8");
        let mut endpoint = ReadEndpoint::new(port.clone(), 1);
        endpoint.arm();

        for _ in 0..3 {
            assert!(endpoint.poll().is_none());
            assert_eq!(port.outstanding_reads(), 1);
        }

        port.deliver(MessageData::from_slice(&[1]));
        port.deliver(MessageData::from_slice(&[2]));
        assert_eq!(endpoint.poll().unwrap().as_bytes(), &[1]);
        // The replacement request took the queued message straight away.
        assert_eq!(port.outstanding_reads(), 0);
        assert_eq!(port.queued_len(), 0);
        assert_eq!(endpoint.poll().unwrap().as_bytes(), &[2]);
        assert_eq!(port.outstanding_reads(), 1);
        assert!(endpoint.poll().is_none());
    }

    #[test]
    fn test_idle_poll_arms() {
        let channels = ChannelRegistry::new();
        let port = channels.register_read_port("E1", "u8");
        let mut endpoint = ReadEndpoint::new(port.clone(), 1);
        port.deliver(MessageData::from_slice(&[9]));

        assert!(endpoint.poll().is_none());
        assert!(endpoint.is_armed());
        assert_eq!(endpoint.poll().unwrap().as_bytes(), &[9]);
    }

    #[test]
    fn test_duplicate_write_keeps_first_handle() {
        let channels = ChannelRegistry::new();
        let first = channels.register_write_port("out", "u8");
        let mut registry = EndpointRegistry::new();
        registry.insert_write("out", WriteEndpoint::new(first.clone(), 1));
        registry.insert_write("out", WriteEndpoint::new(first.clone(), 2));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.write("out").unwrap().declared_size(), 1);
    }

    #[test]
    fn test_clear_releases_reads() {
        let channels = ChannelRegistry::new();
        let port = channels.register_read_port("E1", "u8");
        let mut registry = EndpointRegistry::new();
        registry.insert_read("E1", ReadEndpoint::new(port.clone(), 1));
        registry.clear();

        assert!(registry.is_empty());
        assert_eq!(port.outstanding_reads(), 0);
    }
}
