//! Error tiers for the daemon's hot paths.
//!
//! Everything at the frame-processing level resolves into one of two
//! outcomes: drop-and-continue, or tear down the owning generation. Anything
//! escaping this module (socket setup, config parsing, thread spawn) is a
//! plain `anyhow::Error` instead, since those faults are process-fatal and
//! don't need to be matched on.

use thiserror::Error;

/// A fault encountered while processing a single inbound frame.
///
/// None of these are process-fatal. `FatalGeneration` tears down exactly the
/// owning encoder or decoder instance; the pool lazily rebuilds one for the
/// next block counter. `DropFrame` is logged and the frame is discarded.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed attribute set: {0}")]
    Malformed(&'static str),

    #[error("decoded payload length {len} exceeds maximum 1600 bytes (block {block})")]
    OversizedPayload { block: u8, len: usize },

    #[error("coder storage exhausted")]
    StorageExhausted,
}

impl FrameError {
    /// Whether this fault should tear down the owning generation's worker,
    /// as opposed to merely dropping the offending frame.
    pub fn is_fatal_to_generation(&self) -> bool {
        matches!(
            self,
            FrameError::OversizedPayload { .. } | FrameError::StorageExhausted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_payload_is_fatal_to_generation() {
        let e = FrameError::OversizedPayload {
            block: 3,
            len: 2000,
        };
        assert!(e.is_fatal_to_generation());
    }

    #[test]
    fn malformed_is_not_fatal_to_generation() {
        let e = FrameError::Malformed("missing FRAME attribute");
        assert!(!e.is_fatal_to_generation());
    }
}
