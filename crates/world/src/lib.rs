//! Ground-truth world model
//!
//! The tables of servers, identities and activities the orchestrator
//! mutates as it executes a scenario. Everything here is plain data keyed
//! by stable names; runtime handles (LOC servers, child processes) live
//! with the orchestrator and are looked up by the same names. The
//! predictor reads this model to compute expected query results.

mod model;
pub mod snapshot;

pub use model::{
    ActivityRecord, IdentityRecord, ServerPayload, ServerRecord, WorldError, WorldModel,
    WorldResult,
};
