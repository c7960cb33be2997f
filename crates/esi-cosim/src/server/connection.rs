// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Framed connection shared by the server and the client.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// One end of a framed cosim connection.
pub struct FramedConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    max_message_size: usize,
    read_buffer: Vec<u8>,
}

impl FramedConnection {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, max_message_size: usize) -> Self {
        Self {
            stream,
            peer_addr,
            max_message_size,
            read_buffer: Vec::with_capacity(4096),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read one frame.
    ///
    /// Returns `Ok(None)` if the peer closed the connection between frames.
    /// Cancel-safe: bytes already received stay buffered for the next call,
    /// so this can sit in a `select!` next to other work.
    pub async fn read_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ConnectionError> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }
            if self.stream.read_buf(&mut self.read_buffer).await? == 0 {
                if self.read_buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ConnectionError::Io("Connection closed mid-frame".into()));
            }
        }
    }

    /// Decode a complete frame from the read buffer, if there is one.
    fn parse_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ConnectionError> {
        // Length prefix: 4 bytes, big-endian
        let Some(len_buf) = self.read_buffer.get(..4) else {
            return Ok(None);
        };
        let len = u32::from_be_bytes([len_buf[0], len_buf[1], len_buf[2], len_buf[3]]) as usize;
        if len == 0 {
            return Err(ConnectionError::Protocol("Empty frame".into()));
        }
        if len > self.max_message_size {
            return Err(ConnectionError::Protocol(format!(
                "Frame too large: {} > {}",
                len, self.max_message_size
            )));
        }
        if self.read_buffer.len() < 4 + len {
            return Ok(None);
        }

        let frame = serde_json::from_slice(&self.read_buffer[4..4 + len]);
        self.read_buffer.drain(..4 + len);
        frame
            .map(Some)
            .map_err(|e| ConnectionError::Malformed(e.to_string()))
    }

    /// Write one frame and flush it.
    pub async fn send_frame<T: Serialize>(&mut self, frame: &T) -> Result<(), ConnectionError> {
        let json = serde_json::to_vec(frame)
            .map_err(|e| ConnectionError::Protocol(format!("Serialize error: {}", e)))?;

        if json.len() > self.max_message_size {
            return Err(ConnectionError::Protocol(format!(
                "Frame too large: {} > {}",
                json.len(),
                self.max_message_size
            )));
        }

        let len = json.len() as u32;
        self.stream.write_all(&len.to_be_bytes()).await?;
        self.stream.write_all(&json).await?;
        self.stream.flush().await?;

        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ConnectionError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Connection error types.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// The frame was well-sized but its JSON body did not decode.
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
