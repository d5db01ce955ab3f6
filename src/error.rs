use thiserror::Error;

use crate::codec::CodecError;
use crate::driver::DriverError;
use crate::store::StoreError;

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over the canonical
/// per-capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl Error {
    /// Whether the error is recoverable by treating the previous
    /// analysis as empty and rebuilding.
    ///
    /// Decode failures are; callback violations and compile failures
    /// are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Codec(_) => true,
            Error::Store(e) => e.is_recoverable(),
            Error::Driver(e) => e.is_recoverable(),
        }
    }
}
