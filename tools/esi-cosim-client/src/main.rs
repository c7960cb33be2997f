// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! esi-cosim-client - talk to a running cosimulation from the command line
//!
//! # Usage
//!
//! ```bash
//! # Server started with COSIM_PORT=4242
//! esi-cosim-client --port 4242 channels
//! esi-cosim-client --port 4242 send loopback.in 01020304
//! esi-cosim-client --port 4242 recv loopback.out -n 4
//!
//! # Port picked by the OS, published through a port file
//! esi-cosim-client --port-file cosim.cfg manifest
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use esi_cosim::{ChannelDirection, CosimClient};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Command-line client for an ESI cosimulation
#[derive(Parser, Debug)]
#[command(name = "esi-cosim-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server TCP port
    #[arg(short, long, required_unless_present = "port_file")]
    port: Option<u16>,

    /// Read host and port from a file written by the server
    #[arg(long, conflicts_with = "port")]
    port_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the manifest version and size; optionally save it
    Manifest {
        /// Write the compressed manifest to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the channels the simulation registered
    Channels,
    /// Send one message (hex bytes) to a from-host channel
    Send { channel: String, hex: String },
    /// Print messages arriving on a to-host channel
    Recv {
        channel: String,

        /// Stop after this many messages (0 = unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        count: u64,

        /// Give up after this many seconds without a message (0 = wait forever)
        #[arg(short, long, default_value = "0")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let addr = match (&args.port_file, args.port) {
        (Some(path), _) => read_port_file(path)?,
        (None, Some(port)) => format!("{}:{}", args.host, port),
        (None, None) => bail!("either --port or --port-file is required"),
    };

    debug!("Connecting to {}", addr);
    let mut client = CosimClient::connect(addr.as_str())
        .await
        .with_context(|| format!("connecting to cosim server at {}", addr))?;

    match args.command {
        Command::Manifest { output } => {
            let manifest = client.get_manifest().await?;
            println!(
                "ESI version {}, {} bytes compressed",
                manifest.esi_version,
                manifest.compressed.len()
            );
            if let Some(path) = output {
                std::fs::write(&path, &manifest.compressed)
                    .with_context(|| format!("writing {}", path.display()))?;
                info!("Manifest written to {}", path.display());
            }
        }
        Command::Channels => {
            for channel in client.list_channels().await? {
                let direction = match channel.direction {
                    ChannelDirection::FromHost => "from-host",
                    ChannelDirection::ToHost => "to-host",
                };
                println!("{:<40} {:<10} {}", channel.id, direction, channel.type_id);
            }
        }
        Command::Send { channel, hex } => {
            let data = parse_hex(&hex)?;
            let len = data.len();
            client.send(&channel, data).await?;
            info!("Sent {} bytes to {}", len, channel);
        }
        Command::Recv {
            channel,
            count,
            timeout,
        } => {
            client.subscribe(&channel).await?;
            let mut received = 0u64;
            while count == 0 || received < count {
                let msg = if timeout == 0 {
                    client.recv(&channel).await?
                } else {
                    tokio::time::timeout(Duration::from_secs(timeout), client.recv(&channel))
                        .await
                        .with_context(|| format!("no message on {} within {}s", channel, timeout))??
                };
                println!("{}", format_hex(msg.as_bytes()));
                received += 1;
            }
        }
    }

    Ok(())
}

/// Parse `"01 02 0a0b"` or `"0x0102"` into bytes.
fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let digits: String = input
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .collect();
    hex::decode(&digits).with_context(|| format!("invalid hex payload {:?}", input))
}

/// Space-separated lowercase hex bytes.
fn format_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| hex::encode([*b])).collect::<Vec<_>>().join(" ")
}

/// Read the `port:` / `host:` lines the server writes after binding.
fn read_port_file(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading port file {}", path.display()))?;
    parse_port_file(&text).with_context(|| format!("parsing port file {}", path.display()))
}

fn parse_port_file(text: &str) -> Result<String> {
    let mut port = None;
    let mut host = None;
    for line in text.lines() {
        match line.split_once(':') {
            Some(("port", value)) => port = Some(value.trim().parse::<u16>()?),
            Some(("host", value)) => host = Some(value.trim().to_string()),
            _ => {}
        }
    }
    let port = port.context("missing port")?;
    let host = match host.as_deref() {
        None | Some("0.0.0.0") => "127.0.0.1".to_string(),
        Some("::") => "::1".to_string(),
        Some(h) => h.to_string(),
    };
    if host.contains(':') {
        Ok(format!("[{}]:{}", host, port))
    } else {
        Ok(format!("{}:{}", host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("01020304").unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(parse_hex("0xde ad_be ef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(parse_hex("").unwrap().is_empty());
        assert!(parse_hex("123").is_err());
        assert!(parse_hex("zz").is_err());
        assert!(parse_hex("aé0").is_err());
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0x01, 0xab]), "01 ab");
        assert_eq!(format_hex(&[]), "");
    }

    #[test]
    fn test_parse_port_file() {
        assert_eq!(
            parse_port_file("port: 4242\nhost: 0.0.0.0\n").unwrap(),
            "127.0.0.1:4242"
        );
        assert_eq!(
            parse_port_file("port: 80\nhost: 10.0.0.2\n").unwrap(),
            "10.0.0.2:80"
        );
        assert_eq!(parse_port_file("port: 80\nhost: ::\n").unwrap(), "[::1]:80");
        assert!(parse_port_file("host: 10.0.0.2\n").is_err());
    }
}
