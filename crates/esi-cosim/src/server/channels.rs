// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel ports shared between the simulator side and transport tasks.
//!
//! A [`ReadChannelPort`] carries client messages towards the simulator; a
//! [`WriteChannelPort`] carries simulator messages towards a client. Both are
//! driven from synchronous code on the simulator thread and from async tasks
//! on the transport runtime, so their state sits behind a short
//! `parking_lot::Mutex` and nothing here ever awaits or sleeps.

use super::protocol::{ChannelDescriptor, ChannelDirection};
use crate::MessageData;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// A read request issued by [`ReadChannelPort::read_async`].
///
/// Holds either nothing yet or exactly one message. Polling never waits.
#[derive(Debug)]
pub struct PendingRead {
    rx: oneshot::Receiver<MessageData>,
}

impl PendingRead {
    /// Zero-wait poll. Takes the message if it has arrived.
    ///
    /// Returns `None` both while the request is still outstanding and after
    /// the port has been torn down.
    pub fn try_take(&mut self) -> Option<MessageData> {
        self.rx.try_recv().ok()
    }

    /// Wait for the message. Returns `None` if the port is torn down first.
    pub async fn recv(self) -> Option<MessageData> {
        self.rx.await.ok()
    }
}

#[derive(Default)]
struct ReadState {
    /// Client messages nobody has asked for yet.
    queued: VecDeque<MessageData>,
    /// Outstanding read requests, oldest first.
    waiters: VecDeque<oneshot::Sender<MessageData>>,
    closed: bool,
}

/// From-host channel: client → simulator.
pub struct ReadChannelPort {
    id: String,
    type_id: String,
    state: Mutex<ReadState>,
}

impl ReadChannelPort {
    pub(crate) fn new(id: &str, type_id: &str) -> Self {
        Self {
            id: id.to_string(),
            type_id: type_id.to_string(),
            state: Mutex::new(ReadState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    /// Issue a read. The returned request completes with the next message
    /// in arrival order.
    pub fn read_async(&self) -> PendingRead {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();
        if state.closed {
            // Dropping `tx` leaves the request permanently empty.
            return PendingRead { rx };
        }
        match state.queued.pop_front() {
            Some(msg) => {
                // The receiver is alive in this scope, so this cannot fail.
                let _ = tx.send(msg);
            }
            None => state.waiters.push_back(tx),
        }
        PendingRead { rx }
    }

    /// Hand a client message to the simulator side.
    pub fn deliver(&self, msg: MessageData) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let mut msg = msg;
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(msg) {
                Ok(()) => return,
                // Request abandoned; try the next one.
                Err(returned) => msg = returned,
            }
        }
        state.queued.push_back(msg);
    }

    /// Messages received but not yet handed to a read request.
    pub fn queued_len(&self) -> usize {
        self.state.lock().queued.len()
    }

    /// Number of read requests waiting for a message.
    pub fn outstanding_reads(&self) -> usize {
        let mut state = self.state.lock();
        state.waiters.retain(|w| !w.is_closed());
        state.waiters.len()
    }

    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.queued.clear();
        state.waiters.clear();
    }
}

#[derive(Default)]
struct WriteState {
    /// Messages written while no client was subscribed.
    backlog: VecDeque<MessageData>,
    subscriber: Option<mpsc::UnboundedSender<MessageData>>,
    closed: bool,
}

/// To-host channel: simulator → client.
pub struct WriteChannelPort {
    id: String,
    type_id: String,
    state: Mutex<WriteState>,
}

impl WriteChannelPort {
    pub(crate) fn new(id: &str, type_id: &str) -> Self {
        Self {
            id: id.to_string(),
            type_id: type_id.to_string(),
            state: Mutex::new(WriteState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    /// Send a message to the subscribed client, or keep it until one subscribes.
    pub fn write(&self, msg: MessageData) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let msg = match state.subscriber.as_ref() {
            Some(tx) => match tx.send(msg) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => returned,
            },
            None => msg,
        };
        state.subscriber = None;
        state.backlog.push_back(msg);
    }

    /// Attach a client. Replaces any previous subscriber and flushes the
    /// backlog into the new one first.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MessageData> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        while let Some(msg) = state.backlog.pop_front() {
            // `rx` is alive, so the send succeeds.
            let _ = tx.send(msg);
        }
        if !state.closed {
            state.subscriber = Some(tx);
        }
        rx
    }

    /// Detach a subscriber whose client has gone away.
    ///
    /// `pending` is a message already taken from `rx` but not delivered. It
    /// and everything still queued in `rx` go back to the front of the
    /// backlog, ahead of later writes, so the next subscriber sees them in
    /// write order.
    pub fn unsubscribe(
        &self,
        mut rx: mpsc::UnboundedReceiver<MessageData>,
        pending: Option<MessageData>,
    ) {
        let mut state = self.state.lock();
        // Once closed, our sender reports `is_closed` and writes stop landing in `rx`.
        rx.close();
        let mut undelivered: Vec<MessageData> = pending.into_iter().collect();
        while let Ok(msg) = rx.try_recv() {
            undelivered.push(msg);
        }
        if state
            .subscriber
            .as_ref()
            .is_some_and(mpsc::UnboundedSender::is_closed)
        {
            state.subscriber = None;
        }
        Self::restore(&mut state, undelivered);
    }

    /// Put messages that never reached a client back in front of the backlog.
    pub fn requeue(&self, msgs: Vec<MessageData>) {
        let mut state = self.state.lock();
        Self::restore(&mut state, msgs);
    }

    fn restore(state: &mut WriteState, msgs: Vec<MessageData>) {
        if state.closed || msgs.is_empty() {
            return;
        }
        for msg in msgs.into_iter().rev() {
            state.backlog.push_front(msg);
        }
        // A newer subscriber would otherwise never see them.
        if let Some(tx) = state.subscriber.as_ref() {
            while let Some(msg) = state.backlog.pop_front() {
                if let Err(mpsc::error::SendError(returned)) = tx.send(msg) {
                    state.backlog.push_front(returned);
                    state.subscriber = None;
                    break;
                }
            }
        }
    }

    /// Whether a client is currently attached.
    pub fn has_subscriber(&self) -> bool {
        self.state
            .lock()
            .subscriber
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Messages waiting for a subscriber.
    pub fn backlog_len(&self) -> usize {
        self.state.lock().backlog.len()
    }

    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.backlog.clear();
        state.subscriber = None;
    }
}

/// All channels registered with one server.
#[derive(Default)]
pub struct ChannelRegistry {
    read_ports: RwLock<HashMap<String, Arc<ReadChannelPort>>>,
    write_ports: RwLock<HashMap<String, Arc<WriteChannelPort>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a from-host channel. Re-registering an id returns the
    /// existing port.
    pub fn register_read_port(&self, id: &str, type_id: &str) -> Arc<ReadChannelPort> {
        self.read_ports
            .write()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(ReadChannelPort::new(id, type_id)))
            .clone()
    }

    /// Register a to-host channel. Re-registering an id returns the
    /// existing port.
    pub fn register_write_port(&self, id: &str, type_id: &str) -> Arc<WriteChannelPort> {
        self.write_ports
            .write()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(WriteChannelPort::new(id, type_id)))
            .clone()
    }

    pub fn read_port(&self, id: &str) -> Option<Arc<ReadChannelPort>> {
        self.read_ports.read().get(id).cloned()
    }

    pub fn write_port(&self, id: &str) -> Option<Arc<WriteChannelPort>> {
        self.write_ports.read().get(id).cloned()
    }

    /// Every channel, sorted by id then direction.
    pub fn descriptors(&self) -> Vec<ChannelDescriptor> {
        let mut out: Vec<ChannelDescriptor> = self
            .read_ports
            .read()
            .values()
            .map(|p| ChannelDescriptor {
                id: p.id().to_string(),
                type_id: p.type_id().to_string(),
                direction: ChannelDirection::FromHost,
            })
            .collect();
        out.extend(self.write_ports.read().values().map(|p| ChannelDescriptor {
            id: p.id().to_string(),
            type_id: p.type_id().to_string(),
            direction: ChannelDirection::ToHost,
        }));
        out.sort_by(|a, b| {
            a.id.cmp(&b.id)
                .then_with(|| (a.direction as u8).cmp(&(b.direction as u8)))
        });
        out
    }

    /// Close and forget every port. Outstanding reads stay empty forever.
    pub fn close_all(&self) {
        for (_, port) in self.read_ports.write().drain() {
            port.close();
        }
        for (_, port) in self.write_ports.write().drain() {
            port.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(bytes: &[u8]) -> MessageData {
        MessageData::from_slice(bytes)
    }

    #[test]
    fn test_read_before_delivery() {
        let port = ReadChannelPort::new("E1", "u8[4]");
        let mut pending = port.read_async();
        assert!(pending.try_take().is_none());
        assert_eq!(port.outstanding_reads(), 1);

        port.deliver(msg(&[1, 2, 3, 4]));
        assert_eq!(pending.try_take().unwrap().as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(port.outstanding_reads(), 0);
        assert_eq!(port.queued_len(), 0);
    }

    #[test]
    fn test_delivery_before_read_is_queued_in_order() {
        let port = ReadChannelPort::new("E1", "u8");
        port.deliver(msg(&[1]));
        port.deliver(msg(&[2]));
        assert_eq!(port.queued_len(), 2);

        assert_eq!(port.read_async().try_take().unwrap().as_bytes(), &[1]);
        assert_eq!(port.read_async().try_take().unwrap().as_bytes(), &[2]);
        assert!(port.read_async().try_take().is_none());
    }

    #[test]
    fn test_abandoned_read_does_not_eat_message() {
        let port = ReadChannelPort::new("E1", "u8");
        drop(port.read_async());
        let mut live = port.read_async();
        port.deliver(msg(&[7]));
        assert_eq!(live.try_take().unwrap().as_bytes(), &[7]);
    }

    #[test]
    fn test_closed_read_port_stays_empty() {
        let port = ReadChannelPort::new("E1", "u8");
        let mut pending = port.read_async();
        port.close();
        port.deliver(msg(&[1]));
        assert!(pending.try_take().is_none());
        assert!(port.read_async().try_take().is_none());
    }

    #[test]
    fn test_write_backlog_flushed_on_subscribe() {
        let port = WriteChannelPort::new("out", "u8");
        port.write(msg(&[1]));
        port.write(msg(&[2]));
        assert_eq!(port.backlog_len(), 2);

        let mut rx = port.subscribe();
        port.write(msg(&[3]));
        assert_eq!(rx.try_recv().unwrap().as_bytes(), &[1]);
        assert_eq!(rx.try_recv().unwrap().as_bytes(), &[2]);
        assert_eq!(rx.try_recv().unwrap().as_bytes(), &[3]);
        assert_eq!(port.backlog_len(), 0);
    }

    #[test]
    fn test_write_after_subscriber_gone_goes_to_backlog() {
        let port = WriteChannelPort::new("out", "u8");
        drop(port.subscribe());
        port.write(msg(&[5]));
        assert_eq!(port.backlog_len(), 1);

        let mut rx = port.subscribe();
        assert_eq!(rx.try_recv().unwrap().as_bytes(), &[5]);
    }

    #[test]
    fn test_unsubscribe_requeues_undelivered_in_order() {
        let port = WriteChannelPort::new("out", "u8");
        let mut rx = port.subscribe();
        port.write(msg(&[1]));
        port.write(msg(&[2]));

        // The forwarder took [1] but could not hand it to the client.
        let taken = rx.try_recv().unwrap();
        port.unsubscribe(rx, Some(taken));
        assert!(!port.has_subscriber());
        port.write(msg(&[3]));
        assert_eq!(port.backlog_len(), 3);

        let mut rx = port.subscribe();
        for expected in [1u8, 2, 3] {
            assert_eq!(rx.try_recv().unwrap().as_bytes(), &[expected]);
        }
    }

    #[test]
    fn test_stale_unsubscribe_keeps_newer_subscriber() {
        let port = WriteChannelPort::new("out", "u8");
        let mut old = port.subscribe();
        port.write(msg(&[1]));
        let taken = old.try_recv().unwrap();

        let mut new = port.subscribe();
        port.unsubscribe(old, Some(taken));
        assert!(port.has_subscriber());
        assert_eq!(new.try_recv().unwrap().as_bytes(), &[1]);
        assert_eq!(port.backlog_len(), 0);
    }

    #[test]
    fn test_requeue_goes_before_later_writes() {
        let port = WriteChannelPort::new("out", "u8");
        port.write(msg(&[3]));
        port.requeue(vec![msg(&[1]), msg(&[2])]);

        let mut rx = port.subscribe();
        for expected in [1u8, 2, 3] {
            assert_eq!(rx.try_recv().unwrap().as_bytes(), &[expected]);
        }
    }

    #[test]
    fn test_registry_reuses_ports() {
        let registry = ChannelRegistry::new();
        let a = registry.register_read_port("E1", "u8");
        let b = registry.register_read_port("E1", "u8");
        assert!(Arc::ptr_eq(&a, &b));

        registry.register_write_port("E1", "u16");
        let descriptors = registry.descriptors();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].direction, ChannelDirection::FromHost);
        assert_eq!(descriptors[1].direction, ChannelDirection::ToHost);
        assert_eq!(descriptors[1].type_id, "u16");
    }

    #[test]
    fn test_close_all_empties_registry() {
        let registry = ChannelRegistry::new();
        let port = registry.register_read_port("E1", "u8");
        let mut pending = port.read_async();
        registry.close_all();
        assert!(registry.read_port("E1").is_none());
        assert!(registry.descriptors().is_empty());
        assert!(pending.try_take().is_none());
    }
}
