use super::constraint::{Clock, Limit};

pub type Result<T> = std::result::Result<T, ZoneError>;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ZoneError {
    #[error("inconsistent dimension: expected {expected} but got {actual}")]
    DimensionMismatch { expected: Clock, actual: usize },

    #[error("clock {clock} is out of range for dimension {dimension}")]
    ClockOutOfRange { clock: Clock, dimension: Clock },

    #[error("malformed minimal graph encoding: {0}")]
    MalformedEncoding(String),

    #[error("limit {limit} cannot be represented by a bound")]
    BoundOverflow { limit: i64 },

    #[error("invalid clock value {value}")]
    InvalidValue { value: Limit },

    #[error("the infimum is unbounded")]
    UnboundedInfimum,

    #[error("the zone is empty")]
    EmptyZone,
}
