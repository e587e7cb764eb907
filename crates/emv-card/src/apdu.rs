//! APDU (Application Protocol Data Unit) command handling

use std::fmt;

use crate::error::{Error, Result};

/// Le asking for a short, non-final read
pub const LE_SHORT_PROBE: u8 = 0xF8;

/// Le leaving the response length up to the card
pub const LE_ANY: u8 = 0x00;

/// Largest payload a short APDU can carry
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Two-byte status trailer of every card response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    pub sw1: u8,
    pub sw2: u8,
}

impl StatusWord {
    pub const SUCCESS: Self = Self::new(0x90, 0x00);
    pub const WRONG_LENGTH: Self = Self::new(0x67, 0x00);

    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Check if the status indicates success (9000)
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Get the full status word as a 16-bit value
    pub const fn to_u16(self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// APDU response containing data and status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Response data (without status word)
    pub data: Vec<u8>,
    pub status: StatusWord,
}

impl ApduResponse {
    /// Split a raw response into data and the trailing status word
    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        if raw.len() < 2 {
            return Err(Error::MalformedResponse("response is shorter than a status word"));
        }

        let (data, sw) = raw.split_at(raw.len() - 2);
        Ok(Self {
            data: data.to_vec(),
            status: StatusWord::new(sw[0], sw[1]),
        })
    }

    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The card asked for the command to be resent with another Le
    pub fn is_wrong_length(&self) -> bool {
        self.data.is_empty() && self.status == StatusWord::WRONG_LENGTH
    }

    /// Response data if the status is 9000, otherwise the status as an error
    pub fn into_data(self) -> Result<Vec<u8>> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(Error::Status(self.status))
        }
    }
}

/// APDU command builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
    le: Option<u8>,
}

impl ApduCommand {
    /// Create a new APDU command
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    /// Set command data
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Set expected response length
    pub fn le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    pub const fn ins(&self) -> u8 {
        self.ins
    }

    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// Build the APDU command bytes.
    ///
    /// The Lc byte is only emitted when there is a payload, so a command
    /// without data is `CLA INS P1 P2 [Le]`.
    pub fn build(&self) -> Result<Vec<u8>> {
        if self.data.len() > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge {
                len: self.data.len(),
            });
        }

        let mut apdu = Vec::with_capacity(6 + self.data.len());
        apdu.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);

        if !self.data.is_empty() {
            apdu.push(self.data.len() as u8);
            apdu.extend_from_slice(&self.data);
        }

        if let Some(le) = self.le {
            apdu.push(le);
        }

        Ok(apdu)
    }
}

/// EMV APDU commands used by the read session
pub mod commands {
    use super::{ApduCommand, LE_SHORT_PROBE};

    pub const INS_SELECT: u8 = 0xA4;
    pub const INS_GET_PROCESSING_OPTIONS: u8 = 0xA8;
    pub const INS_READ_RECORD: u8 = 0xB2;

    /// SELECT command (by name/AID)
    pub fn select(name: &[u8]) -> ApduCommand {
        ApduCommand::new(0x00, INS_SELECT, 0x04, 0x00)
            .data(name.to_vec())
            .le(LE_SHORT_PROBE)
    }

    /// GET PROCESSING OPTIONS command
    pub fn get_processing_options(pdol_data: Vec<u8>) -> ApduCommand {
        ApduCommand::new(0x80, INS_GET_PROCESSING_OPTIONS, 0x00, 0x00)
            .data(pdol_data)
            .le(LE_SHORT_PROBE)
    }

    /// READ RECORD command
    pub fn read_record(record_number: u8, sfi: u8) -> ApduCommand {
        let p2 = (sfi << 3) | 0x04;
        ApduCommand::new(0x00, INS_READ_RECORD, record_number, p2).le(LE_SHORT_PROBE)
    }
}
