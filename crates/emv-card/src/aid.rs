//! Application identifiers and issuer classification

use std::fmt;

use crate::error::Error;

/// Well known names and AIDs
pub mod aids {
    /// PPSE (Proximity Payment System Environment)
    pub const PPSE: &[u8] = b"2PAY.SYS.DDF01";

    /// Visa credit/debit
    pub const VISA: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10];

    /// Mastercard credit/debit
    pub const MASTERCARD: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x04, 0x10, 0x10];

    /// American Express
    pub const AMEX: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x25, 0x01];

    /// girocard
    pub const GIROCARD: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x59, 0x45, 0x43, 0x01, 0x00];
}

/// Length of a Registered Application Provider Identifier
pub const RID_LEN: usize = 5;

/// Longest AID allowed by ISO/IEC 7816-4
pub const MAX_AID_LEN: usize = 16;

/// Application identifier: a RID followed by up to 11 bytes of PIX
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Aid(Vec<u8>);

impl Aid {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn rid(&self) -> &[u8] {
        &self.0[..RID_LEN]
    }

    pub fn issuer(&self) -> Issuer {
        Issuer::from_aid(self)
    }
}

impl TryFrom<&[u8]> for Aid {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if !(RID_LEN..=MAX_AID_LEN).contains(&bytes.len()) {
            return Err(Error::MalformedResponse("AID must be 5 to 16 bytes"));
        }
        Ok(Self(bytes.to_vec()))
    }
}

impl AsRef<[u8]> for Aid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(&self.0))
    }
}

/// Payment scheme owning an application, keyed by RID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Issuer {
    Visa,
    Mastercard,
    AmericanExpress,
    Girocard,
    Unrecognized,
}

const ISSUERS: &[([u8; RID_LEN], Issuer)] = &[
    ([0xA0, 0x00, 0x00, 0x00, 0x03], Issuer::Visa),
    ([0xA0, 0x00, 0x00, 0x00, 0x04], Issuer::Mastercard),
    ([0xA0, 0x00, 0x00, 0x00, 0x25], Issuer::AmericanExpress),
    ([0xA0, 0x00, 0x00, 0x00, 0x59], Issuer::Girocard),
];

impl Issuer {
    pub fn from_rid(rid: &[u8]) -> Self {
        ISSUERS
            .iter()
            .find(|(known, _)| known.as_slice() == rid)
            .map_or(Self::Unrecognized, |&(_, issuer)| issuer)
    }

    pub fn from_aid(aid: &Aid) -> Self {
        Self::from_rid(aid.rid())
    }

    /// Numeric classification shown alongside an AID; 0 when unrecognized
    pub const fn index(self) -> u8 {
        match self {
            Self::Visa => 1,
            Self::Mastercard => 2,
            Self::AmericanExpress => 3,
            Self::Girocard => 4,
            Self::Unrecognized => 0,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Visa => "Visa",
            Self::Mastercard => "MasterCard",
            Self::AmericanExpress => "American Express",
            Self::Girocard => "girocard",
            Self::Unrecognized => "Unknown",
        }
    }
}

impl fmt::Display for Issuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
