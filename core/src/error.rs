use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("staffing vector has {actual} entries, model has {expected} pools")]
    StaffingLengthMismatch { expected: usize, actual: usize },

    #[error("staffing bounds inverted at pool {pool}: lower {lower} > upper {upper}")]
    BoundsInverted { pool: usize, lower: u32, upper: u32 },

    #[error("upper staffing {upper} exceeds capacity {capacity} of pool {pool}")]
    UpperAboveCapacity { pool: usize, upper: u32, capacity: u32 },

    #[error(
        "state hash diverged at transition {transition}: \
         incremental {incremental:#018x}, recomputed {recomputed:#018x}"
    )]
    HashMismatch {
        transition: u64,
        incremental: u64,
        recomputed: u64,
    },

    #[error("split at transition {transition} produced no children")]
    EmptySplit { transition: u64 },

    #[error("staffing vector {vector:?} was not simulated")]
    NotSimulated { vector: Vec<u32> },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SimResult<T> = Result<T, SimError>;
