// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hex dump of every message crossing the bridge.
//!
//! Enabled by pointing `COSIM_DEBUG_FILE` at a path. One line per message:
//!
//! ```text
//! [ep: <50-col endpoint id> to: host] 01 02 03 04  05 06 07 08   09 0a
//! ```
//!
//! Bytes are grouped by 32-bit word, with a wider gap between 64-bit words.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Which way a logged message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Simulator → client.
    ToHost,
    /// Client → simulator.
    ToSim,
}

impl Direction {
    pub fn tag(self) -> &'static str {
        match self {
            Self::ToHost => "host",
            Self::ToSim => "sim",
        }
    }
}

/// Format one log line, including the trailing newline.
pub fn format_line(endpoint_id: &str, direction: Direction, bytes: &[u8]) -> String {
    let mut line = String::with_capacity(64 + bytes.len() * 4);
    let _ = write!(line, "[ep: {:>50} to: {:>4}]", endpoint_id, direction.tag());
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 && i % 4 == 0 {
            line.push(' ');
        }
        if i > 0 && i % 8 == 0 {
            line.push_str("  ");
        }
        let _ = write!(line, " {:02x}", b);
    }
    line.push('\n');
    line
}

/// Diagnostic message log sink.
///
/// Write failures are swallowed: the log is a debugging aid and must never
/// turn into an entry-point failure.
pub struct MessageLog {
    sink: Box<dyn Write + Send>,
}

impl MessageLog {
    /// Create (truncate) the log file at `path`.
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self::new(File::create(path)?))
    }

    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Box::new(sink),
        }
    }

    /// Append one message and flush.
    pub fn record(&mut self, endpoint_id: &str, direction: Direction, bytes: &[u8]) {
        let line = format_line(endpoint_id, direction, bytes);
        if self.sink.write_all(line.as_bytes()).is_err() || self.sink.flush().is_err() {
            log::debug!("Dropped diagnostic log line for {}", endpoint_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_header_is_fixed_width() {
        let line = format_line("E1", Direction::ToSim, &[]);
        assert_eq!(line, format!("[ep: {}E1 to:  sim]\n", " ".repeat(48)));
    }

    #[test]
    fn test_word_grouping() {
        let bytes: Vec<u8> = (1..=10).collect();
        let line = format_line("ep", Direction::ToHost, &bytes);
        let body = line.split_once(']').unwrap().1;
        assert_eq!(body, " 01 02 03 04  05 06 07 08    09 0a\n");
    }

    #[test]
    fn test_record_appends_lines() {
        let buf = SharedBuf::default();
        let mut log = MessageLog::new(buf.clone());
        log.record("a", Direction::ToHost, &[0xff]);
        log.record("b", Direction::ToSim, &[0x00, 0x10]);

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("to: host] ff"));
        assert!(lines[1].ends_with("to:  sim] 00 10"));
    }

    #[test]
    fn test_record_swallows_errors() {
        let mut log = MessageLog::new(BrokenSink);
        log.record("a", Direction::ToHost, &[1, 2, 3]);
    }
}
