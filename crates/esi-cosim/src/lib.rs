// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # ESI cosimulation transport
//!
//! The host-facing half of the cosim bridge:
//!
//! - [`MessageData`]: owned message payloads
//! - [`RpcServer`]: TCP transport serving channels and the manifest to clients
//! - [`ReadChannelPort`] / [`WriteChannelPort`]: per-channel hand-off points
//!   between the simulator thread and the transport tasks
//! - [`CosimClient`]: host-side client
//!
//! The simulator-facing half (DPI entry points) lives in `esi-cosim-dpi`.

pub mod client;
pub mod config;
pub mod message;
pub mod server;

pub use client::{ClientError, CosimClient};
pub use config::{ConfigError, ServerConfig};
pub use message::MessageData;
pub use server::protocol::{ChannelDescriptor, ChannelDirection};
pub use server::{
    ChannelRegistry, Manifest, PendingRead, ReadChannelPort, RpcServer, ServerError,
    WriteChannelPort,
};
