//! staffsim-core: single-path evaluation of many staffing configurations.
//!
//! The engine advances one uniformized CTMC sample path for a whole box of
//! staffing vectors at once. When the next transition would differ
//! depending on an as-yet-undetermined staffing choice, the path forks into
//! replications; replications whose states become identical again are
//! detected and merged back. Statistics accumulate per trajectory (one
//! staffing sub-box each) and flush into per-configuration buckets, so one
//! simulated path stands in for an independent simulation of every staffing
//! vector in the box under the same random draws.
//!
//! RULES:
//!   - All randomness flows through the RngBank; one shared bit block per
//!     transition index, consumed identically by every live replication.
//!   - Replications are logical branches on one control thread. Cloning is
//!     the only mechanism that gives a child independent state.
//!   - Internal invariant violations (hash mismatch, empty split) abort
//!     the sample path; they are defects, never recoverable conditions.

pub mod aggregate;
pub mod counters;
pub mod driver;
pub mod error;
pub mod merge;
pub mod model;
pub mod replication;
pub mod rng;
pub mod staffing;
pub mod trajectory;
pub mod types;
