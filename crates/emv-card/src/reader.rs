//! PC/SC card reader management

use std::ffi::CString;

use pcsc::{Card, Context, Protocols, Scope, ShareMode, MAX_BUFFER_SIZE};
use tracing::debug;

use crate::error::TransportError;
use crate::transceiver::Transceiver;

/// Card reader wrapper for managing PC/SC connections
pub struct CardReader {
    context: Context,
}

impl CardReader {
    /// Create a new CardReader by establishing a PC/SC context
    pub fn new() -> Result<Self, pcsc::Error> {
        let context = Context::establish(Scope::User)?;
        Ok(Self { context })
    }

    /// List all available card readers
    pub fn list_readers(&self) -> Result<Vec<String>, pcsc::Error> {
        let mut readers_buf = [0; 2048];
        let readers = self.context.list_readers(&mut readers_buf)?;

        Ok(readers
            .map(|r| r.to_string_lossy().into_owned())
            .collect())
    }

    /// Connect to the card on the first available reader
    pub fn connect_first(&self) -> Result<(PcscTransceiver, String), pcsc::Error> {
        let mut readers_buf = [0; 2048];
        let mut readers = self.context.list_readers(&mut readers_buf)?;

        let reader = readers.next().ok_or(pcsc::Error::NoReadersAvailable)?;
        let reader_name = reader.to_string_lossy().into_owned();
        let card = self.context.connect(reader, ShareMode::Shared, Protocols::ANY)?;
        debug!(reader = %reader_name, "connected");
        Ok((PcscTransceiver::new(card), reader_name))
    }

    /// Connect to the card on a specific reader
    pub fn connect(&self, reader_name: &str) -> Result<PcscTransceiver, pcsc::Error> {
        let reader = CString::new(reader_name).map_err(|_| pcsc::Error::UnknownReader)?;
        let card = self.context.connect(&reader, ShareMode::Shared, Protocols::ANY)?;
        debug!(reader = %reader_name, "connected");
        Ok(PcscTransceiver::new(card))
    }
}

/// [`Transceiver`] over a connected PC/SC card
pub struct PcscTransceiver {
    card: Card,
}

impl PcscTransceiver {
    pub fn new(card: Card) -> Self {
        Self { card }
    }

    pub fn card(&self) -> &Card {
        &self.card
    }
}

impl Transceiver for PcscTransceiver {
    fn exchange(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut rapdu_buf = [0; MAX_BUFFER_SIZE];
        match self.card.transmit(command, &mut rapdu_buf) {
            Ok(rapdu) => Ok(rapdu.to_vec()),
            Err(pcsc::Error::Timeout) => Err(TransportError::Timeout),
            Err(err) => Err(TransportError::Failed(err.to_string())),
        }
    }
}
