//! Scenario DSL parser
//!
//! Scenarios are line-oriented UTF-8 text: blank lines and `#` comments
//! are skipped, every other line is one command made of ASCII-space
//! separated tokens with a case-sensitive keyword first. The parser
//! validates every argument range up front; any violation aborts the
//! whole parse with the offending line number, so execution never starts
//! on a scenario that could fail on syntax later.

mod command;
mod parser;

pub use command::{
    Command, CreateActivities, CreateIdentities, CreateServers, PositionalRange, ServerRange,
    TestQuery, TestQueryActivity,
};
pub use parser::{parse_scenario, ParseError};
