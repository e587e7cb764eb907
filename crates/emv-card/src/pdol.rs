//! PDOL parsing and GET PROCESSING OPTIONS payload construction
//!
//! The card lists the terminal data it wants as a Data Object List: a run of
//! tag + length pairs without values. The terminal answers with the matching
//! values concatenated in list order, wrapped in the command template (tag
//! `83`). Values come from a [`TerminalDataSource`]; a tag the source does not
//! know is answered with zeros of the requested length.
//!
//! [`StaticTerminalData`] is a fixed table, not a catalogue of every data
//! object a terminal may be asked for.

use emv_common::{tags, EmvTag};
use tracing::{debug, trace};

use crate::apdu::MAX_PAYLOAD_LEN;
use crate::error::{Error, Result};

/// Longest tag accepted in a DOL
const MAX_TAG_LEN: usize = 3;

/// One requested data object: tag and the number of value bytes wanted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DolEntry {
    pub tag: Vec<u8>,
    pub length: u8,
}

/// Processing Options Data Object List (tag 9F38)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pdol {
    entries: Vec<DolEntry>,
}

impl Pdol {
    /// Parse the value of tag 9F38
    pub fn parse(dol: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut rest = dol;

        while !rest.is_empty() {
            let tag_len = tag_len(rest).ok_or(Error::MalformedResponse("PDOL tag is truncated"))?;
            let (tag, tail) = rest.split_at(tag_len);
            let (&length, tail) = tail
                .split_first()
                .ok_or(Error::MalformedResponse("PDOL entry is missing its length"))?;

            entries.push(DolEntry {
                tag: tag.to_vec(),
                length,
            });
            rest = tail;
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[DolEntry] {
        &self.entries
    }

    /// Sum of all requested value lengths
    pub fn requested_len(&self) -> usize {
        self.entries.iter().map(|e| usize::from(e.length)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Length of the BER tag at the start of `bytes`.
///
/// A first byte whose low five bits are all set announces further tag bytes;
/// each subsequent byte with bit 8 set announces another one.
fn tag_len(bytes: &[u8]) -> Option<usize> {
    let first = *bytes.first()?;
    if first & 0x1F != 0x1F {
        return Some(1);
    }

    let mut len = 1;
    loop {
        let next = *bytes.get(len)?;
        len += 1;
        if next & 0x80 == 0 {
            return Some(len);
        }
        if len == MAX_TAG_LEN {
            return None;
        }
    }
}

/// How a value is fitted when the card asks for a different length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    /// BCD numeric: padded with leading zeros, truncated from the left
    Numeric,
    /// Anything else: padded with trailing zeros, truncated from the right
    Binary,
}

/// A canned terminal value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalDataObject {
    pub tag: EmvTag,
    pub format: DataFormat,
    pub value: &'static [u8],
}

impl TerminalDataObject {
    const fn new(tag: EmvTag, format: DataFormat, value: &'static [u8]) -> Self {
        Self { tag, format, value }
    }
}

/// Supplier of the terminal's answers to PDOL requests
pub trait TerminalDataSource {
    /// Value and format for `tag`, or `None` if the terminal has none
    fn lookup(&self, tag: &[u8]) -> Option<(DataFormat, &[u8])>;
}

impl<D: TerminalDataSource + ?Sized> TerminalDataSource for &D {
    fn lookup(&self, tag: &[u8]) -> Option<(DataFormat, &[u8])> {
        (**self).lookup(tag)
    }
}

/// Terminal values answered by [`StaticTerminalData::default`]
pub static TERMINAL_DATA: &[TerminalDataObject] = &[
    // Contactless EMV mode, online capable
    TerminalDataObject::new(tags::TERMINAL_TRANSACTION_QUALIFIERS, DataFormat::Binary, &[0x27, 0x00, 0x00, 0x00]),
    // 10.00
    TerminalDataObject::new(tags::AMOUNT_AUTHORISED, DataFormat::Numeric, &[0x00, 0x00, 0x00, 0x00, 0x10, 0x00]),
    TerminalDataObject::new(tags::AMOUNT_OTHER, DataFormat::Numeric, &[0x00; 6]),
    // Euro / Germany
    TerminalDataObject::new(tags::TERMINAL_COUNTRY_CODE, DataFormat::Numeric, &[0x09, 0x78]),
    TerminalDataObject::new(tags::TRANSACTION_CURRENCY_CODE, DataFormat::Numeric, &[0x09, 0x78]),
    TerminalDataObject::new(tags::UNPREDICTABLE_NUMBER, DataFormat::Binary, &[0x38, 0x39, 0x30, 0x31]),
    // Attended, online only, merchant operated
    TerminalDataObject::new(tags::TERMINAL_TYPE, DataFormat::Numeric, &[0x22]),
    TerminalDataObject::new(tags::DATA_AUTHENTICATION_CODE, DataFormat::Binary, &[0x00; 2]),
    TerminalDataObject::new(tags::ICC_DYNAMIC_NUMBER, DataFormat::Binary, &[0x00; 8]),
    TerminalDataObject::new(tags::CVM_RESULTS, DataFormat::Binary, &[0x00; 3]),
    TerminalDataObject::new(tags::TRANSACTION_TIME, DataFormat::Numeric, &[0x11, 0x10, 0x09]),
    TerminalDataObject::new(tags::CUSTOMER_EXCLUSIVE_DATA, DataFormat::Binary, &[0x00; 14]),
    TerminalDataObject::new(tags::TERMINAL_VERIFICATION_RESULTS, DataFormat::Binary, &[0x00; 5]),
    TerminalDataObject::new(tags::TRANSACTION_DATE, DataFormat::Numeric, &[0x25, 0x03, 0x01]),
    // Purchase
    TerminalDataObject::new(tags::TRANSACTION_TYPE, DataFormat::Numeric, &[0x00]),
];

/// Terminal data answered from a fixed table
#[derive(Debug, Clone, Copy)]
pub struct StaticTerminalData {
    table: &'static [TerminalDataObject],
}

impl StaticTerminalData {
    pub const fn new(table: &'static [TerminalDataObject]) -> Self {
        Self { table }
    }
}

impl Default for StaticTerminalData {
    fn default() -> Self {
        Self::new(TERMINAL_DATA)
    }
}

impl TerminalDataSource for StaticTerminalData {
    fn lookup(&self, tag: &[u8]) -> Option<(DataFormat, &[u8])> {
        self.table
            .iter()
            .find(|object| object.tag.0 == tag)
            .map(|object| (object.format, object.value))
    }
}

/// Fit `value` into exactly `length` bytes according to its format
pub fn fit_value(format: DataFormat, value: &[u8], length: usize) -> Vec<u8> {
    let mut fitted = vec![0u8; length];
    match format {
        DataFormat::Numeric => {
            if value.len() >= length {
                fitted.copy_from_slice(&value[value.len() - length..]);
            } else {
                fitted[length - value.len()..].copy_from_slice(value);
            }
        }
        DataFormat::Binary => {
            let n = value.len().min(length);
            fitted[..n].copy_from_slice(&value[..n]);
        }
    }
    fitted
}

/// Build the GET PROCESSING OPTIONS payload: `83 <len> <values...>`.
///
/// An absent PDOL yields `83 00`.
pub fn build_gpo_data(pdol: Option<&Pdol>, terminal: &impl TerminalDataSource) -> Result<Vec<u8>> {
    let Some(pdol) = pdol else {
        debug!("no PDOL requested, sending empty command template");
        return Ok(vec![tags::COMMAND_TEMPLATE.0[0], 0x00]);
    };

    let mut values = Vec::with_capacity(pdol.requested_len());
    for entry in pdol.entries() {
        let length = usize::from(entry.length);
        match terminal.lookup(&entry.tag) {
            Some((format, value)) => {
                let fitted = fit_value(format, value, length);
                trace!(tag = %hex::encode_upper(&entry.tag), value = %hex::encode_upper(&fitted), "PDOL entry");
                values.extend_from_slice(&fitted);
            }
            None => {
                debug!(tag = %hex::encode_upper(&entry.tag), length, "unknown PDOL tag, sending zeros");
                values.resize(values.len() + length, 0);
            }
        }
    }

    let mut data = Vec::with_capacity(values.len() + 3);
    data.push(tags::COMMAND_TEMPLATE.0[0]);
    match values.len() {
        len @ 0..=0x7F => data.push(len as u8),
        len @ 0x80..=0xFF => data.extend_from_slice(&[0x81, len as u8]),
        len => return Err(Error::PayloadTooLarge { len: len + 3 }),
    }
    data.extend_from_slice(&values);

    if data.len() > MAX_PAYLOAD_LEN {
        return Err(Error::PayloadTooLarge { len: data.len() });
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_parse_mixed_tag_lengths() {
        let pdol = Pdol::parse(&hex!("9F 66 04 9F 02 06 95 05 9A 03 9C 01 DF 81 01 02")).unwrap();
        let tags: Vec<_> = pdol.entries().iter().map(|e| e.tag.clone()).collect();
        assert_eq!(
            tags,
            vec![
                vec![0x9F, 0x66],
                vec![0x9F, 0x02],
                vec![0x95],
                vec![0x9A],
                vec![0x9C],
                vec![0xDF, 0x81, 0x01],
            ]
        );
        assert_eq!(pdol.requested_len(), 4 + 6 + 5 + 3 + 1 + 2);
    }

    #[test]
    fn test_parse_truncated() {
        assert!(Pdol::parse(&hex!("9F")).is_err());
        assert!(Pdol::parse(&hex!("9F 66")).is_err());
        assert!(Pdol::parse(&hex!("DF 81 81 81 01")).is_err());
    }

    #[test]
    fn test_absent_pdol_sends_empty_template() {
        let data = build_gpo_data(None, &StaticTerminalData::default()).unwrap();
        assert_eq!(data, hex!("83 00"));
    }

    #[test]
    fn test_empty_pdol_sends_empty_template() {
        let pdol = Pdol::parse(&[]).unwrap();
        let data = build_gpo_data(Some(&pdol), &StaticTerminalData::default()).unwrap();
        assert_eq!(data, hex!("83 00"));
    }

    #[test]
    fn test_visa_style_pdol() {
        let pdol = Pdol::parse(&hex!(
            "9F 66 04 9F 02 06 9F 03 06 9F 1A 02 95 05 5F 2A 02 9A 03 9C 01 9F 37 04"
        ))
        .unwrap();
        let data = build_gpo_data(Some(&pdol), &StaticTerminalData::default()).unwrap();
        assert_eq!(
            data,
            hex!(
                "83 21"
                "27 00 00 00"
                "00 00 00 00 10 00"
                "00 00 00 00 00 00"
                "09 78"
                "00 00 00 00 00"
                "09 78"
                "25 03 01"
                "00"
                "38 39 30 31"
            )
        );
    }

    #[test]
    fn test_unknown_tag_is_zero_filled() {
        let pdol = Pdol::parse(&hex!("9F 35 01 DF 01 03 9F 40 05")).unwrap();
        let data = build_gpo_data(Some(&pdol), &StaticTerminalData::default()).unwrap();
        assert_eq!(data, hex!("83 09 22 00 00 00 00 00 00 00 00"));
    }

    #[test]
    fn test_values_are_fitted_to_requested_length() {
        assert_eq!(fit_value(DataFormat::Numeric, &hex!("09 78"), 3), hex!("00 09 78"));
        assert_eq!(fit_value(DataFormat::Numeric, &hex!("00 00 00 00 10 00"), 4), hex!("00 00 10 00"));
        assert_eq!(fit_value(DataFormat::Binary, &hex!("27 00 00 00"), 2), hex!("27 00"));
        assert_eq!(fit_value(DataFormat::Binary, &hex!("38 39"), 4), hex!("38 39 00 00"));

        // amount asked with 4 bytes, country code with 3
        let pdol = Pdol::parse(&hex!("9F 02 04 9F 1A 03")).unwrap();
        let data = build_gpo_data(Some(&pdol), &StaticTerminalData::default()).unwrap();
        assert_eq!(data, hex!("83 07 00 00 10 00 00 09 78"));
    }

    #[test]
    fn test_payload_reparses_in_pdol_order() {
        let pdol = Pdol::parse(&hex!(
            "9F 66 04 9F 02 06 9F 37 04 DF 01 07 5F 2A 02 9A 03 9C 01 95 05 9F 7C 10"
        ))
        .unwrap();
        let data = build_gpo_data(Some(&pdol), &StaticTerminalData::default()).unwrap();

        assert_eq!(data[0], 0x83);
        assert_eq!(usize::from(data[1]), pdol.requested_len());

        // Walk the values with the declared lengths; every byte must be consumed.
        let mut values = &data[2..];
        let mut seen = Vec::new();
        for entry in pdol.entries() {
            let (value, rest) = values.split_at(usize::from(entry.length));
            seen.push((entry.tag.clone(), value.len()));
            values = rest;
        }
        assert!(values.is_empty());
        let expected: Vec<_> = pdol
            .entries()
            .iter()
            .map(|e| (e.tag.clone(), usize::from(e.length)))
            .collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_long_payload_uses_two_byte_length() {
        // 9F7C asked with 200 bytes
        let pdol = Pdol::parse(&hex!("9F 7C C8")).unwrap();
        let data = build_gpo_data(Some(&pdol), &StaticTerminalData::default()).unwrap();
        assert_eq!(&data[..3], &hex!("83 81 C8"));
        assert_eq!(data.len(), 3 + 200);
    }

    #[test]
    fn test_oversized_pdol_is_rejected() {
        let pdol = Pdol::parse(&hex!("DF 01 FF")).unwrap();
        let err = build_gpo_data(Some(&pdol), &StaticTerminalData::default()).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { len: 258 }));
    }

    #[test]
    fn test_custom_terminal_source() {
        struct Fixed;
        impl TerminalDataSource for Fixed {
            fn lookup(&self, tag: &[u8]) -> Option<(DataFormat, &[u8])> {
                (tag == [0x9F, 0x37]).then_some((DataFormat::Binary, &[0xDE, 0xAD, 0xBE, 0xEF][..]))
            }
        }

        let pdol = Pdol::parse(&hex!("9F 37 04 9F 35 01")).unwrap();
        let data = build_gpo_data(Some(&pdol), &Fixed).unwrap();
        assert_eq!(data, hex!("83 05 DE AD BE EF 00"));
    }
}
