//! EMV Card - contactless EMV application reading
//!
//! This crate runs the read side of an EMV contactless session against a
//! card: PPSE and application selection, PDOL resolution, GET PROCESSING
//! OPTIONS and AFL-driven record reading, then extracts the PAN, expiry and
//! issuer from what the card returned.
//!
//! The card is reached through a [`Transceiver`]; [`PcscTransceiver`] talks
//! to a PC/SC reader.

pub mod afl;
pub mod aid;
pub mod apdu;
pub mod error;
pub mod pdol;
pub mod reader;
pub mod session;
pub mod track2;
pub mod transceiver;

pub use aid::{Aid, Issuer};
pub use error::{Error, Result, TransportError};
pub use reader::{CardReader, PcscTransceiver};
pub use session::{ApplicationData, EmvSession, SessionOptions, SessionResult, SessionState};
pub use transceiver::{CardChannel, NegotiationPolicy, Transceiver};

/// Re-export commonly used types
pub use pcsc::Error as PcscError;
