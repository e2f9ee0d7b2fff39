//! Shared primitive types used across the entire simulator.

/// Index of one uniformized CTMC jump along a sample path. False
/// transitions advance it like any other.
pub type TransitionIndex = u64;

/// Agent pool index.
pub type PoolIndex = usize;

/// Call type index.
pub type CallType = usize;

/// The canonical run identifier.
pub type RunId = String;
