// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge errors and their DPI return codes.

use crate::open_array::ArrayError;
use std::os::raw::c_int;
use thiserror::Error;

/// Errors reported by the bridge entry points.
///
/// None of them is fatal: the failing call leaves the registry as it was and
/// the simulator keeps running.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("cosim server is not running")]
    ServerNotRunning,
    #[error("endpoint '{0}': exactly one of fromHostTypeId and toHostTypeId must be set")]
    ConflictingDirection(String),
    #[error("endpoint '{0}' already registered")]
    DuplicateEndpoint(String),
    #[error("endpoint '{0}' not found in registry")]
    EndpointNotFound(String),
    #[error("invalid sv array: {0}")]
    InvalidArray(#[from] ArrayError),
    #[error("invalid size {requested} (array holds {available} bytes)")]
    InvalidSize { requested: i64, available: usize },
    #[error("message of {size} bytes too big to fit in {capacity} byte HW buffer")]
    MessageTooLarge { size: usize, capacity: usize },
    #[error("DPI MMIO master already registered")]
    MmioAlreadyRegistered,
}

impl BridgeError {
    /// Return code handed back to the simulator.
    pub fn code(&self) -> c_int {
        match self {
            Self::ServerNotRunning | Self::MmioAlreadyRegistered => -1,
            Self::ConflictingDirection(_) | Self::InvalidArray(_) => -2,
            Self::DuplicateEndpoint(_) | Self::InvalidSize { .. } => -3,
            Self::EndpointNotFound(_) => -4,
            Self::MessageTooLarge { .. } => -5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_negative() {
        let errors = [
            BridgeError::ServerNotRunning,
            BridgeError::ConflictingDirection("a".into()),
            BridgeError::DuplicateEndpoint("a".into()),
            BridgeError::EndpointNotFound("a".into()),
            BridgeError::InvalidArray(ArrayError::Empty),
            BridgeError::InvalidSize {
                requested: 9,
                available: 4,
            },
            BridgeError::MessageTooLarge {
                size: 9,
                capacity: 4,
            },
            BridgeError::MmioAlreadyRegistered,
        ];
        for err in &errors {
            assert!(err.code() < 0, "{} should map to a failure code", err);
        }
        assert_eq!(errors[4].code(), -2);
        assert_eq!(errors[6].code(), -5);
    }
}
