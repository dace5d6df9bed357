use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A fixed-capacity pool ran out of slots. The payload names the pool.
    #[error("capacity exceeded in {0}")]
    CapacityExceeded(&'static str),
    /// More than 2^16 - 2 mutually adjacent pairs in one component.
    #[error("ran out of colors while coloring the contact graph")]
    ColoringExhausted,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
