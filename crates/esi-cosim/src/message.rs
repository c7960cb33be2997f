// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Owned message payload exchanged over cosim channels.

use std::fmt;

/// An immutable, owned block of message bytes.
///
/// One `MessageData` is created per transfer. Ownership moves to whichever
/// side consumes it (a channel port, the diagnostic log, or the simulator's
/// buffer); it is never shared mutably after creation.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct MessageData {
    bytes: Box<[u8]>,
}

impl MessageData {
    /// Take ownership of `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
        }
    }

    /// Copy `bytes` into a new message.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Message payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Release the payload.
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes.into_vec()
    }
}

impl From<Vec<u8>> for MessageData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for MessageData {
    fn from(bytes: &[u8]) -> Self {
        Self::from_slice(bytes)
    }
}

impl AsRef<[u8]> for MessageData {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for MessageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageData")
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_owns_copy() {
        let mut source = vec![1u8, 2, 3];
        let msg = MessageData::from_slice(&source);
        source[0] = 9;
        assert_eq!(msg.as_bytes(), &[1, 2, 3]);
        assert_eq!(msg.len(), 3);
        assert!(!msg.is_empty());
    }

    #[test]
    fn test_empty_message() {
        let msg = MessageData::default();
        assert!(msg.is_empty());
        assert_eq!(msg.into_vec(), Vec::<u8>::new());
    }

    #[test]
    fn test_debug_hides_payload() {
        let msg = MessageData::new(vec![0xaa; 64]);
        assert_eq!(format!("{:?}", msg), "MessageData { len: 64 }");
    }
}
