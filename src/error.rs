//! Error taxonomy of the eSPI engine.

use core::fmt;

use axerrno::AxError;

/// Result type alias
pub type EspiResult<T = ()> = core::result::Result<T, EspiError>;

/// eSPI error
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EspiError {
    /// A parameter is out of range, misaligned, or names an unknown virtual wire.
    InvalidArgument,

    /// The capability or channel was disabled at build time.
    NotSupported,

    /// The channel is not enabled or not ready.
    NotReady,

    /// An operation is already in flight on the channel.
    Busy,

    /// The bounded wait expired before the hardware completed.
    Timeout,

    /// The hardware reported a transfer or configuration failure.
    Io,
}

impl fmt::Display for EspiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            EspiError::InvalidArgument => "invalid argument",
            EspiError::NotSupported => "not supported",
            EspiError::NotReady => "channel not ready",
            EspiError::Busy => "channel busy",
            EspiError::Timeout => "timed out",
            EspiError::Io => "i/o error",
        };
        f.write_str(msg)
    }
}

/// Maps the engine taxonomy onto ArceOS error codes.
///
/// `Timeout` becomes `WouldBlock`: the operation may succeed if retried.
impl From<EspiError> for AxError {
    fn from(err: EspiError) -> AxError {
        match err {
            EspiError::InvalidArgument => AxError::InvalidInput,
            EspiError::NotSupported => AxError::Unsupported,
            EspiError::NotReady => AxError::BadState,
            EspiError::Busy => AxError::ResourceBusy,
            EspiError::Timeout => AxError::WouldBlock,
            EspiError::Io => AxError::Io,
        }
    }
}
