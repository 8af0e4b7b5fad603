//! Client driver for the profile- and proximity-server protocols
//!
//! Speaks the real client-facing wire protocols over TLS to seed
//! identities and activities into the child servers and to run the live
//! half of every test query. Certificate validation is disabled by
//! design: the simulator only ever connects to its own children, which
//! present self-signed certificates.

mod conversation;
mod profile;
mod proximity;
mod tls;

pub use conversation::{Conversation, SessionData};
pub use profile::{cancel_hosting, profile_search, register_identity, ProfileSearchOutcome};
pub use proximity::{activity_search, ActivitySearchOutcome, ProximitySession};

use geosim_wire::WireError;
use thiserror::Error;

/// Errors from client protocol exchanges.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket or TLS I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or protobuf decoding failed.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// TLS configuration could not be built.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// The server answered with a non-OK status.
    #[error("server returned status {status}")]
    Status {
        /// Raw status code from the response.
        status: i32,
    },

    /// The response payload was not the one the request calls for.
    #[error("unexpected response payload for {0}")]
    UnexpectedResponse(&'static str),

    /// Response id does not echo the request id.
    #[error("response id {got} does not match request id {sent}")]
    IdMismatch { sent: u64, got: u64 },

    /// A signature the flow requires failed to verify.
    #[error("signature verification failed: {0}")]
    Signature(&'static str),

    /// The server mutated the echoed hosting contract.
    #[error("hosting contract was mutated by the server")]
    ContractMismatch,

    /// A paged search never delivered the declared record count.
    #[error("search delivered {got} of {declared} declared records")]
    IncompleteSearch { declared: u32, got: usize },
}

/// Result alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
