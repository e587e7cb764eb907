//! EMV Common - BER-TLV decoding and the EMV tag catalogue
//!
//! Card responses are decoded into a [`TlvTree`], a flattened pre-order view
//! of every data object in the response, nested templates included. Lookups
//! walk that order, so `find_first` followed by repeated `find_next` visits
//! every occurrence of a tag in the order the card sent them.

use iso7816_tlv::ber::Tag;
use iso7816_tlv::TlvError;

/// Error returned when a buffer is not valid BER-TLV
#[derive(Debug, thiserror::Error)]
pub enum TlvDecodeError {
    #[error("BER-TLV decode failed: invalid tag: {0}")]
    Tag(TlvError),
    #[error("BER-TLV decode failed: truncated {0}")]
    Truncated(&'static str),
    #[error("BER-TLV decode failed: unsupported length byte {0:#04X}")]
    Length(u8),
}

/// Position of a node inside a [`TlvTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A single decoded data object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvNode {
    tag: Vec<u8>,
    value: Vec<u8>,
    depth: usize,
    constructed: bool,
}

impl TlvNode {
    /// Raw tag bytes (1 to 3 bytes)
    pub fn tag(&self) -> &[u8] {
        &self.tag
    }

    /// Value bytes. For templates this is the encoding of all children.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Nesting depth, 0 for top-level objects
    pub const fn depth(&self) -> usize {
        self.depth
    }

    pub const fn is_constructed(&self) -> bool {
        self.constructed
    }
}

/// Decoded BER-TLV response in pre-order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlvTree {
    nodes: Vec<TlvNode>,
}

impl TlvTree {
    /// Decode every object in `data`, descending into templates.
    ///
    /// `00` and `FF` filler bytes between objects are skipped at every
    /// nesting level, as EMV allows. Any other malformation fails the whole
    /// decode.
    pub fn decode(data: &[u8]) -> Result<Self, TlvDecodeError> {
        let mut nodes = Vec::new();
        decode_objects(data, 0, &mut nodes)?;
        Ok(Self { nodes })
    }

    /// First node carrying `tag`, in pre-order
    pub fn find_first(&self, tag: impl AsRef<[u8]>) -> Option<NodeId> {
        let tag = tag.as_ref();
        self.nodes
            .iter()
            .position(|node| node.tag == tag)
            .map(NodeId)
    }

    /// Next node after `node` carrying the same tag
    pub fn find_next(&self, node: NodeId) -> Option<NodeId> {
        let tag = &self.nodes.get(node.0)?.tag;
        self.nodes
            .iter()
            .enumerate()
            .skip(node.0 + 1)
            .find(|(_, candidate)| &candidate.tag == tag)
            .map(|(index, _)| NodeId(index))
    }

    /// Value of the first node carrying `tag`
    pub fn find_value(&self, tag: impl AsRef<[u8]>) -> Option<&[u8]> {
        self.find_first(tag).map(|id| self.value(id))
    }

    /// Every node carrying `tag`, in the order the card sent them
    pub fn find_all(&self, tag: impl AsRef<[u8]>) -> impl Iterator<Item = &TlvNode> + '_ {
        let first = self.find_first(tag);
        std::iter::successors(first, move |id| self.find_next(*id)).map(move |id| self.node(id))
    }

    pub fn node(&self, id: NodeId) -> &TlvNode {
        &self.nodes[id.0]
    }

    pub fn value(&self, id: NodeId) -> &[u8] {
        self.node(id).value()
    }

    pub fn nodes(&self) -> &[TlvNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn skip_padding(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|&b| b != 0x00 && b != 0xFF)
        .unwrap_or(data.len());
    &data[start..]
}

fn decode_objects(
    data: &[u8],
    depth: usize,
    nodes: &mut Vec<TlvNode>,
) -> Result<(), TlvDecodeError> {
    let mut rest = skip_padding(data);

    while !rest.is_empty() {
        let (tag, after_tag) = split_tag(rest)?;
        let (len, after_len) = split_length(after_tag)?;
        if after_len.len() < len {
            return Err(TlvDecodeError::Truncated("value"));
        }
        let (value, remaining) = after_len.split_at(len);

        let constructed = tag.is_constructed();
        nodes.push(TlvNode {
            tag: tag.to_bytes().to_vec(),
            value: value.to_vec(),
            depth,
            constructed,
        });
        if constructed {
            decode_objects(value, depth + 1, nodes)?;
        }

        rest = skip_padding(remaining);
    }

    Ok(())
}

/// Longest tag EMV defines
const MAX_TAG_LEN: usize = 3;

fn split_tag(data: &[u8]) -> Result<(Tag, &[u8]), TlvDecodeError> {
    let first = *data.first().ok_or(TlvDecodeError::Truncated("tag"))?;
    // Low five bits all set: subsequent bytes follow while b8 is set
    let tag_len = if first & 0x1F == 0x1F {
        data[1..]
            .iter()
            .position(|b| b & 0x80 == 0)
            .map(|last| last + 2)
            .ok_or(TlvDecodeError::Truncated("tag"))?
    } else {
        1
    };

    if tag_len > MAX_TAG_LEN {
        return Err(TlvDecodeError::Tag(TlvError::TagIsRFU));
    }

    let (tag_bytes, rest) = data.split_at(tag_len);
    let number = tag_bytes
        .iter()
        .fold(0u64, |number, &b| (number << 8) | u64::from(b));
    let tag = Tag::try_from(number).map_err(TlvDecodeError::Tag)?;
    Ok((tag, rest))
}

fn split_length(data: &[u8]) -> Result<(usize, &[u8]), TlvDecodeError> {
    let (&first, rest) = data
        .split_first()
        .ok_or(TlvDecodeError::Truncated("length"))?;
    if first < 0x80 {
        return Ok((usize::from(first), rest));
    }

    let count = usize::from(first & 0x7F);
    if count == 0 || count > 3 {
        return Err(TlvDecodeError::Length(first));
    }
    if rest.len() < count {
        return Err(TlvDecodeError::Truncated("length"));
    }
    let (len_bytes, rest) = rest.split_at(count);
    let len = len_bytes
        .iter()
        .fold(0usize, |len, &b| (len << 8) | usize::from(b));
    Ok((len, rest))
}

/// EMV Tag identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmvTag(pub &'static [u8]);

impl AsRef<[u8]> for EmvTag {
    fn as_ref(&self) -> &[u8] {
        self.0
    }
}

/// EMV tags used while reading a contactless card
pub mod tags {
    use super::EmvTag;

    // Directory and selection
    pub const APPLICATION_IDENTIFIER: EmvTag = EmvTag(&[0x4F]);
    pub const APPLICATION_LABEL: EmvTag = EmvTag(&[0x50]);
    pub const DEDICATED_FILE_NAME: EmvTag = EmvTag(&[0x84]);
    pub const APPLICATION_PRIORITY_INDICATOR: EmvTag = EmvTag(&[0x87]);
    pub const FCI_TEMPLATE: EmvTag = EmvTag(&[0x6F]);
    pub const FCI_PROPRIETARY_TEMPLATE: EmvTag = EmvTag(&[0xA5]);
    pub const FCI_ISSUER_DISCRETIONARY_DATA: EmvTag = EmvTag(&[0xBF, 0x0C]);
    pub const DIRECTORY_ENTRY: EmvTag = EmvTag(&[0x61]);
    pub const PDOL: EmvTag = EmvTag(&[0x9F, 0x38]);

    // Processing options
    pub const COMMAND_TEMPLATE: EmvTag = EmvTag(&[0x83]);
    pub const RESPONSE_MESSAGE_TEMPLATE_FORMAT_1: EmvTag = EmvTag(&[0x80]);
    pub const RESPONSE_MESSAGE_TEMPLATE_FORMAT_2: EmvTag = EmvTag(&[0x77]);
    pub const AIP: EmvTag = EmvTag(&[0x82]);
    pub const AFL: EmvTag = EmvTag(&[0x94]);

    // Records and cardholder data
    pub const RECORD_TEMPLATE: EmvTag = EmvTag(&[0x70]);
    pub const APPLICATION_PAN: EmvTag = EmvTag(&[0x5A]);
    pub const APPLICATION_EXPIRATION_DATE: EmvTag = EmvTag(&[0x5F, 0x24]);
    pub const CARDHOLDER_NAME: EmvTag = EmvTag(&[0x5F, 0x20]);
    pub const TRACK_2_EQUIVALENT_DATA: EmvTag = EmvTag(&[0x57]);

    // Terminal data requested through the PDOL
    pub const TERMINAL_TRANSACTION_QUALIFIERS: EmvTag = EmvTag(&[0x9F, 0x66]);
    pub const AMOUNT_AUTHORISED: EmvTag = EmvTag(&[0x9F, 0x02]);
    pub const AMOUNT_OTHER: EmvTag = EmvTag(&[0x9F, 0x03]);
    pub const TERMINAL_COUNTRY_CODE: EmvTag = EmvTag(&[0x9F, 0x1A]);
    pub const TRANSACTION_CURRENCY_CODE: EmvTag = EmvTag(&[0x5F, 0x2A]);
    pub const UNPREDICTABLE_NUMBER: EmvTag = EmvTag(&[0x9F, 0x37]);
    pub const TERMINAL_TYPE: EmvTag = EmvTag(&[0x9F, 0x35]);
    pub const DATA_AUTHENTICATION_CODE: EmvTag = EmvTag(&[0x9F, 0x45]);
    pub const ICC_DYNAMIC_NUMBER: EmvTag = EmvTag(&[0x9F, 0x4C]);
    pub const CVM_RESULTS: EmvTag = EmvTag(&[0x9F, 0x34]);
    pub const TRANSACTION_TIME: EmvTag = EmvTag(&[0x9F, 0x21]);
    pub const CUSTOMER_EXCLUSIVE_DATA: EmvTag = EmvTag(&[0x9F, 0x7C]);
    pub const TERMINAL_VERIFICATION_RESULTS: EmvTag = EmvTag(&[0x95]);
    pub const TRANSACTION_DATE: EmvTag = EmvTag(&[0x9A]);
    pub const TRANSACTION_TYPE: EmvTag = EmvTag(&[0x9C]);
}

/// Get a human-readable name for an EMV tag
pub fn get_tag_name(tag: &[u8]) -> &'static str {
    match tag {
        [0x4F] => "Application Identifier (AID)",
        [0x50] => "Application Label",
        [0x57] => "Track 2 Equivalent Data",
        [0x5A] => "Application PAN",
        [0x5F, 0x20] => "Cardholder Name",
        [0x5F, 0x24] => "Application Expiration Date",
        [0x5F, 0x25] => "Application Effective Date",
        [0x5F, 0x28] => "Issuer Country Code",
        [0x5F, 0x2A] => "Transaction Currency Code",
        [0x5F, 0x34] => "Application PAN Sequence Number",
        [0x61] => "Directory Entry",
        [0x6F] => "FCI Template",
        [0x70] => "Record Template",
        [0x77] => "Response Message Template Format 2",
        [0x80] => "Response Message Template Format 1",
        [0x82] => "Application Interchange Profile",
        [0x83] => "Command Template",
        [0x84] => "Dedicated File Name",
        [0x87] => "Application Priority Indicator",
        [0x94] => "Application File Locator",
        [0x95] => "Terminal Verification Results",
        [0x9A] => "Transaction Date",
        [0x9C] => "Transaction Type",
        [0x9F, 0x02] => "Amount, Authorised",
        [0x9F, 0x03] => "Amount, Other",
        [0x9F, 0x12] => "Application Preferred Name",
        [0x9F, 0x1A] => "Terminal Country Code",
        [0x9F, 0x21] => "Transaction Time",
        [0x9F, 0x34] => "CVM Results",
        [0x9F, 0x35] => "Terminal Type",
        [0x9F, 0x37] => "Unpredictable Number",
        [0x9F, 0x38] => "Processing Options Data Object List (PDOL)",
        [0x9F, 0x42] => "Application Currency Code",
        [0x9F, 0x45] => "Data Authentication Code",
        [0x9F, 0x4C] => "ICC Dynamic Number",
        [0x9F, 0x66] => "Terminal Transaction Qualifiers",
        [0x9F, 0x6B] => "Track 2 Data",
        [0x9F, 0x7C] => "Customer Exclusive Data",
        [0xA5] => "FCI Proprietary Template",
        [0xBF, 0x0C] => "FCI Issuer Discretionary Data",
        _ => "Unknown Tag",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_find_first_simple() {
        let tree = TlvTree::decode(&hex!("8F 01 05")).unwrap();
        assert_eq!(tree.find_value([0x8F]), Some(&[0x05][..]));
    }

    #[test]
    fn test_find_first_two_byte_tag() {
        let tree = TlvTree::decode(&hex!("9F 46 02 AB CD")).unwrap();
        assert_eq!(tree.find_value([0x9F, 0x46]), Some(&[0xAB, 0xCD][..]));
    }

    #[test]
    fn test_find_first_not_found() {
        let tree = TlvTree::decode(&hex!("8F 01 05")).unwrap();
        assert_eq!(tree.find_first([0x90]), None);
    }

    #[test]
    fn test_nested_nodes_are_searchable() {
        // 70 { 5A 08 ..., 5F24 03 ... }
        let tree = TlvTree::decode(&hex!(
            "70 10 5A 08 47 61 73 90 01 01 01 19 5F 24 03 27 12 31"
        ))
        .unwrap();

        let record = tree.node(tree.find_first(tags::RECORD_TEMPLATE).unwrap());
        assert!(record.is_constructed());
        assert_eq!(record.depth(), 0);
        assert_eq!(record.value().len(), 16);

        let pan = tree.node(tree.find_first(tags::APPLICATION_PAN).unwrap());
        assert_eq!(pan.depth(), 1);
        assert_eq!(pan.value(), &hex!("47 61 73 90 01 01 01 19"));
        assert_eq!(
            tree.find_value(tags::APPLICATION_EXPIRATION_DATE),
            Some(&hex!("27 12 31")[..])
        );
    }

    #[test]
    fn test_find_next_walks_repeated_tags_in_order() {
        // 61 { 4F 02 A0 01 }, 61 { 4F 02 A0 02 }
        let tree = TlvTree::decode(&hex!("61 04 4F 02 A0 01 61 04 4F 02 A0 02")).unwrap();

        let first = tree.find_first(tags::APPLICATION_IDENTIFIER).unwrap();
        assert_eq!(tree.value(first), &[0xA0, 0x01]);
        let second = tree.find_next(first).unwrap();
        assert_eq!(tree.value(second), &[0xA0, 0x02]);
        assert_eq!(tree.find_next(second), None);

        let values: Vec<_> = tree
            .find_all(tags::APPLICATION_IDENTIFIER)
            .map(TlvNode::value)
            .collect();
        assert_eq!(values, vec![&[0xA0, 0x01][..], &[0xA0, 0x02][..]]);
    }

    #[test]
    fn test_padding_between_objects_is_skipped() {
        let tree = TlvTree::decode(&hex!("00 8F 01 05 FF FF 90 01 06 00")).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.find_value([0x90]), Some(&[0x06][..]));
    }

    #[test]
    fn test_padding_inside_template_is_skipped() {
        // 70 { 5A 08 ..., 5F24 03 ..., 00 00 }
        let tree = TlvTree::decode(&hex!(
            "70 12 5A 08 41 11 11 11 11 11 11 11 5F 24 03 27 12 31 00 00"
        ))
        .unwrap();

        assert_eq!(tree.len(), 3);
        assert_eq!(
            tree.find_value(tags::APPLICATION_PAN),
            Some(&hex!("41 11 11 11 11 11 11 11")[..])
        );
        assert_eq!(
            tree.find_value(tags::APPLICATION_EXPIRATION_DATE),
            Some(&hex!("27 12 31")[..])
        );

        let nested = TlvTree::decode(&hex!("77 08 FF 70 04 00 5A 01 41 00")).unwrap();
        let pan = nested.node(nested.find_first(tags::APPLICATION_PAN).unwrap());
        assert_eq!(pan.depth(), 2);
        assert_eq!(pan.value(), &[0x41]);
    }

    #[test]
    fn test_long_form_length() {
        let mut data = hex!("70 81 83 50 81 80").to_vec();
        data.extend([0x41; 0x80]);
        let tree = TlvTree::decode(&data).unwrap();
        assert_eq!(tree.find_value(tags::APPLICATION_LABEL).map(<[u8]>::len), Some(0x80));

        assert!(matches!(
            TlvTree::decode(&hex!("5A 85 00 00 00 00 01 41")),
            Err(TlvDecodeError::Length(0x85))
        ));
    }

    #[test]
    fn test_empty_buffer_decodes_to_empty_tree() {
        let tree = TlvTree::decode(&[]).unwrap();
        assert!(tree.is_empty());
    }

    #[test]
    fn test_truncated_value_is_rejected() {
        assert!(matches!(
            TlvTree::decode(&hex!("5A 08 47 61")),
            Err(TlvDecodeError::Truncated("value"))
        ));
        assert!(TlvTree::decode(&hex!("9F")).is_err());
    }

    #[test]
    fn test_tag_names() {
        assert_eq!(get_tag_name(tags::PDOL.0), "Processing Options Data Object List (PDOL)");
        assert_eq!(get_tag_name(&[0xDF, 0x01]), "Unknown Tag");
    }
}
