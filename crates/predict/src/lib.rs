//! Ground-truth predictor
//!
//! Mirrors the federation-aware query semantics of the real servers
//! against the world model: for every test query the simulator computes
//! the expected result set and the expected covered-servers list, then
//! compares what the live server returned. All functions here are pure.

mod compare;
mod filter;
mod predict;

pub use compare::{compare_covered_servers, compare_result_sets, CompareError};
pub use filter::WildcardFilter;
pub use predict::{
    predict_activity_search, predict_profile_search, ActivityQuery, ExpectedActivities,
    ExpectedProfiles, ProfileQuery,
};
