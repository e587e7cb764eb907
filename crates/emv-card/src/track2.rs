//! Nibble-packed card fields: Track 2 equivalent data, BCD PAN and expiry dates

use crate::error::{Error, Result};

/// Nibble separating the PAN from the rest of Track 2
const FIELD_SEPARATOR: u8 = 0x0D;

/// Nibble padding a digit string to a whole number of bytes
const PAD: u8 = 0x0F;

/// Longest PAN allowed by ISO/IEC 7812
pub const MAX_PAN_DIGITS: usize = 19;

const EXPIRY_DIGITS: usize = 4;
const SERVICE_CODE_DIGITS: usize = 3;

fn nibbles(bytes: &[u8]) -> impl Iterator<Item = u8> + '_ {
    bytes.iter().flat_map(|b| [b >> 4, b & 0x0F])
}

fn digit(nibble: u8) -> Option<char> {
    char::from_digit(u32::from(nibble), 10)
}

/// Decoded Track 2 equivalent data (tag 57)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track2 {
    pub pan: String,
    /// Expiry as `YYMM`
    pub expiry: String,
    pub service_code: Option<String>,
    /// Remaining nibbles as upper-case hex, trailing pad removed
    pub discretionary_data: String,
}

impl Track2 {
    /// Decode a Track 2 equivalent field.
    ///
    /// The PAN runs up to the first `D` nibble and the four nibbles after it
    /// are the expiry. Nothing beyond `data` is read.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut nibbles = nibbles(data);

        let mut pan = String::new();
        loop {
            match nibbles.next() {
                Some(FIELD_SEPARATOR) => break,
                Some(nibble) => {
                    let d = digit(nibble)
                        .ok_or(Error::MalformedResponse("non-decimal digit in Track 2 PAN"))?;
                    pan.push(d);
                }
                None => return Err(Error::MalformedResponse("Track 2 has no field separator")),
            }
        }

        if pan.is_empty() || pan.len() > MAX_PAN_DIGITS {
            return Err(Error::MalformedResponse("Track 2 PAN length out of range"));
        }

        let expiry = nibbles
            .by_ref()
            .take(EXPIRY_DIGITS)
            .map(digit)
            .collect::<Option<String>>()
            .filter(|expiry| expiry.len() == EXPIRY_DIGITS)
            .ok_or(Error::MalformedResponse("Track 2 expiry is truncated"))?;

        let service_code = nibbles
            .by_ref()
            .take(SERVICE_CODE_DIGITS)
            .map(digit)
            .collect::<Option<String>>()
            .filter(|code| code.len() == SERVICE_CODE_DIGITS);

        let mut discretionary_data: String = nibbles.map(|n| format!("{n:X}")).collect();
        if discretionary_data.ends_with('F') {
            discretionary_data.pop();
        }

        Ok(Self {
            pan,
            expiry,
            service_code,
            discretionary_data,
        })
    }
}

/// Decode a BCD PAN (tag 5A), stopping at the first pad nibble
pub fn decode_pan(data: &[u8]) -> Result<String> {
    let pan = nibbles(data)
        .take_while(|&n| n != PAD)
        .map(digit)
        .collect::<Option<String>>()
        .ok_or(Error::MalformedResponse("non-decimal digit in PAN"))?;

    if pan.is_empty() || pan.len() > MAX_PAN_DIGITS {
        return Err(Error::MalformedResponse("PAN length out of range"));
    }
    Ok(pan)
}

/// Decode an expiration date (tag 5F24, `YYMMDD`) into `YYMM`
pub fn decode_expiry(data: &[u8]) -> Result<String> {
    let yymm = data
        .get(..2)
        .ok_or(Error::MalformedResponse("expiration date is truncated"))?;

    nibbles(yymm)
        .map(digit)
        .collect::<Option<String>>()
        .ok_or(Error::MalformedResponse("non-decimal digit in expiration date"))
}
