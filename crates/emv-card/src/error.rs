use emv_common::TlvDecodeError;
use thiserror::Error;

use crate::apdu::StatusWord;

/// Result type for EMV card operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a [`Transceiver`](crate::transceiver::Transceiver)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The card did not answer this exchange
    #[error("no response from card")]
    Timeout,

    /// The reader or link failed
    #[error("transceiver failure: {0}")]
    Failed(String),
}

/// Error type for EMV card operations
#[derive(Debug, Error)]
pub enum Error {
    /// The transceiver failed an exchange
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The card answered with a status word other than 9000
    #[error("card returned status {0}")]
    Status(StatusWord),

    /// Every attempt of the retry budget went unanswered
    #[error("no response from card after {attempts} attempts")]
    NoResponse { attempts: u8 },

    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),

    #[error("malformed AFL: {0}")]
    MalformedAfl(&'static str),

    #[error(transparent)]
    Tlv(#[from] TlvDecodeError),

    /// A command payload does not fit the one-byte Lc field
    #[error("command payload of {len} bytes exceeds 255 bytes")]
    PayloadTooLarge { len: usize },
}
