// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cosim transport wire protocol.
//!
//! Length-prefixed JSON frames. This is the private protocol spoken between
//! the cosim server and its clients; it is not interoperable with other
//! cosimulation transports.
//!
//! Wire format:
//! ```text
//! +----------------+-------------------+
//! | Length (4B BE) | JSON payload      |
//! +----------------+-------------------+
//! ```

use serde::{Deserialize, Serialize};

/// Unknown channel id or wrong direction.
pub const ERR_UNKNOWN_CHANNEL: u32 = 1;
/// `get_manifest` before the simulator supplied one.
pub const ERR_NO_MANIFEST: u32 = 2;
/// Request could not be decoded.
pub const ERR_MALFORMED: u32 = 3;

/// Direction of a channel as seen from the host software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelDirection {
    /// Client → simulator. The simulator reads these.
    FromHost,
    /// Simulator → client. The simulator writes these.
    ToHost,
}

/// Channel description returned by `list_channels`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub id: String,
    pub type_id: String,
    pub direction: ChannelDirection,
}

/// Requests sent by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    #[serde(rename = "get_manifest")]
    GetManifest,

    #[serde(rename = "list_channels")]
    ListChannels,

    /// Deliver `data` to a from-host channel.
    #[serde(rename = "send_to_server")]
    SendToServer { channel: String, data: Vec<u8> },

    /// Stream every message written to a to-host channel.
    #[serde(rename = "connect_to_client_channel")]
    ConnectToClientChannel { channel: String },
}

/// Messages sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "manifest")]
    Manifest {
        esi_version: i32,
        compressed_manifest: Vec<u8>,
    },

    #[serde(rename = "channels")]
    Channels { channels: Vec<ChannelDescriptor> },

    #[serde(rename = "ack")]
    Ack,

    /// A message written by the simulator on a subscribed channel.
    #[serde(rename = "message")]
    Message { channel: String, data: Vec<u8> },

    #[serde(rename = "error")]
    Error { code: u32, message: String },
}

impl ServerMessage {
    pub(crate) fn error(code: u32, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tags() {
        let json = serde_json::to_string(&ClientRequest::GetManifest).unwrap();
        assert_eq!(json, r#"{"type":"get_manifest"}"#);

        let json = serde_json::to_string(&ClientRequest::ConnectToClientChannel {
            channel: "loopback.out".into(),
        })
        .unwrap();
        assert!(json.contains("connect_to_client_channel"));
        assert!(json.contains("loopback.out"));
    }

    #[test]
    fn test_send_to_server_parse() {
        let parsed: ClientRequest =
            serde_json::from_str(r#"{"type":"send_to_server","channel":"E1","data":[1,2,3,4]}"#)
                .unwrap();
        match parsed {
            ClientRequest::SendToServer { channel, data } => {
                assert_eq!(channel, "E1");
                assert_eq!(data, vec![1, 2, 3, 4]);
            }
            other => panic!("Wrong request type: {:?}", other),
        }
    }

    #[test]
    fn test_channels_serialize() {
        let msg = ServerMessage::Channels {
            channels: vec![ChannelDescriptor {
                id: "E1".into(),
                type_id: "u8[4]".into(),
                direction: ChannelDirection::FromHost,
            }],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""direction":"from_host""#));
        assert!(json.contains("u8[4]"));
    }

    #[test]
    fn test_error_serialize() {
        let msg = ServerMessage::error(ERR_UNKNOWN_CHANNEL, "no such channel");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""code":1"#));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(serde_json::from_str::<ClientRequest>(r#"{"type":"reboot"}"#).is_err());
    }
}
