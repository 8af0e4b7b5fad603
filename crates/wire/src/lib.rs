//! Wire codecs for the geosim network simulator
//!
//! Framed protobuf messages for the two client-facing protocols (profile
//! and proximity servers) and for the LOC discovery protocol, plus the
//! Ed25519 signing helpers the exchanges require. This crate is the
//! in-tree stand-in for the production codec library; only the messages
//! the simulator actually exchanges are modelled.

pub mod client;
pub mod frame;
pub mod info;
pub mod loc;

use rand::RngCore;
use thiserror::Error;

/// Length of every conversation challenge in bytes.
pub const CHALLENGE_LEN: usize = 32;

/// Errors produced by the frame codec.
#[derive(Debug, Error)]
pub enum WireError {
    /// Underlying socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Body did not decode as the expected protobuf message.
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The counterpart closed the stream mid-frame or between frames.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Frame header carried an unknown tag byte.
    #[error("invalid frame tag 0x{0:02x}")]
    InvalidTag(u8),

    /// Declared body length exceeds the protocol maximum.
    #[error("frame body of {0} bytes exceeds maximum")]
    FrameTooLarge(u32),
}

/// Result alias for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Draw a fresh 32-byte challenge from the supplied RNG.
pub fn new_challenge<R: RngCore>(rng: &mut R) -> Vec<u8> {
    let mut challenge = vec![0u8; CHALLENGE_LEN];
    rng.fill_bytes(&mut challenge);
    challenge
}
