// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host-side client for the cosim transport.
//!
//! ```no_run
//! # async fn demo() -> Result<(), esi_cosim::ClientError> {
//! let mut client = esi_cosim::CosimClient::connect("127.0.0.1:4242").await?;
//! client.send("loopback.in", vec![1, 2, 3, 4]).await?;
//! client.subscribe("loopback.out").await?;
//! let reply = client.recv("loopback.out").await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

use crate::server::connection::{ConnectionError, FramedConnection};
use crate::server::protocol::{ChannelDescriptor, ClientRequest, ServerMessage};
use crate::server::Manifest;
use crate::MessageData;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

const CLIENT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// A connection to a running cosim server.
///
/// Responses arrive on the same connection as subscribed channel traffic;
/// channel messages that show up while waiting for a response are kept per
/// channel and returned by later [`CosimClient::recv`] calls.
pub struct CosimClient {
    conn: FramedConnection,
    inbox: HashMap<String, VecDeque<MessageData>>,
}

impl CosimClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let peer_addr = stream.peer_addr()?;
        debug!("Connected to cosim server at {}", peer_addr);
        Ok(Self {
            conn: FramedConnection::new(stream, peer_addr, CLIENT_MAX_FRAME),
            inbox: HashMap::new(),
        })
    }

    /// Fetch the manifest the simulator published.
    pub async fn get_manifest(&mut self) -> Result<Manifest, ClientError> {
        match self.request(ClientRequest::GetManifest).await? {
            ServerMessage::Manifest {
                esi_version,
                compressed_manifest,
            } => Ok(Manifest {
                esi_version,
                compressed: compressed_manifest,
            }),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_channels(&mut self) -> Result<Vec<ChannelDescriptor>, ClientError> {
        match self.request(ClientRequest::ListChannels).await? {
            ServerMessage::Channels { channels } => Ok(channels),
            other => Err(unexpected(other)),
        }
    }

    /// Send a message to a from-host channel.
    pub async fn send(&mut self, channel: &str, data: Vec<u8>) -> Result<(), ClientError> {
        let request = ClientRequest::SendToServer {
            channel: channel.to_string(),
            data,
        };
        match self.request(request).await? {
            ServerMessage::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Start receiving messages written on a to-host channel.
    pub async fn subscribe(&mut self, channel: &str) -> Result<(), ClientError> {
        let request = ClientRequest::ConnectToClientChannel {
            channel: channel.to_string(),
        };
        match self.request(request).await? {
            ServerMessage::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Wait for the next message on a subscribed channel.
    pub async fn recv(&mut self, channel: &str) -> Result<MessageData, ClientError> {
        if let Some(msg) = self.inbox.get_mut(channel).and_then(VecDeque::pop_front) {
            return Ok(msg);
        }
        loop {
            match self.next_frame().await? {
                ServerMessage::Message { channel: from, data } if from == channel => {
                    return Ok(MessageData::new(data));
                }
                ServerMessage::Message { channel: from, data } => {
                    self.stash(from, data);
                }
                other => return Err(unexpected(other)),
            }
        }
    }

    async fn request(&mut self, request: ClientRequest) -> Result<ServerMessage, ClientError> {
        self.conn.send_frame(&request).await?;
        loop {
            match self.next_frame().await? {
                ServerMessage::Message { channel, data } => self.stash(channel, data),
                ServerMessage::Error { code, message } => {
                    return Err(ClientError::Server { code, message });
                }
                reply => return Ok(reply),
            }
        }
    }

    async fn next_frame(&mut self) -> Result<ServerMessage, ClientError> {
        self.conn
            .read_frame::<ServerMessage>()
            .await?
            .ok_or(ClientError::Disconnected)
    }

    fn stash(&mut self, channel: String, data: Vec<u8>) {
        self.inbox
            .entry(channel)
            .or_default()
            .push_back(MessageData::new(data));
    }
}

fn unexpected(msg: ServerMessage) -> ClientError {
    match msg {
        ServerMessage::Error { code, message } => ClientError::Server { code, message },
        other => ClientError::UnexpectedReply(format!("{:?}", other)),
    }
}

/// Client error types.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Server closed the connection")]
    Disconnected,
    #[error("Server error {code}: {message}")]
    Server { code: u32, message: String },
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        Self::Connection(ConnectionError::from(e))
    }
}
