//! Simulated LOC discovery servers
//!
//! Every managed server owns one LOC server: a TCP endpoint on the base
//! port of the server's reserved block that its child process connects to
//! for registration and neighborhood discovery. The simulator maintains
//! the neighbor set here and pushes change notifications to a connected
//! child that asked to be kept alive.

mod server;

pub use server::{LocError, LocResult, LocServer};
