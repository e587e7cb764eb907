//! Field formatters for human-readable output

use clap::ValueEnum;
use emv_common::{get_tag_name, TlvTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatMode {
    /// Raw hex output
    Raw,
    /// Human-readable formatted output
    Human,
}

impl FormatMode {
    pub fn description(&self) -> &'static str {
        match self {
            FormatMode::Raw => "Raw",
            FormatMode::Human => "Human-Readable",
        }
    }
}

/// Digits of the PAN left visible when masking
const VISIBLE_PAN_DIGITS: usize = 4;

/// Show the first four digits of a PAN only
pub fn mask_pan(pan: &str) -> String {
    let visible: String = pan.chars().take(VISIBLE_PAN_DIGITS).collect();
    format!("{visible} ****")
}

pub fn format_pan(pan: &str, show_pan: bool) -> String {
    if show_pan {
        pan.to_string()
    } else {
        mask_pan(pan)
    }
}

/// `YYMM` as `MM/20YY`
pub fn format_expiry(yymm: &str) -> String {
    match (yymm.get(..2), yymm.get(2..4)) {
        (Some(year), Some(month)) if yymm.len() == 4 => format!("{month}/20{year}"),
        _ => yymm.to_string(),
    }
}

/// Format a field value based on its tag type
pub fn format_value(tag: &[u8], value: &[u8], mode: FormatMode, show_pan: bool) -> String {
    if mode == FormatMode::Raw {
        return match tag {
            [0x5A] | [0x57] | [0x9F, 0x6B] if !show_pan => mask_pan(&hex::encode_upper(value)),
            _ => hex::encode_upper(value),
        };
    }

    match tag {
        // Application Label, Application Preferred Name
        [0x50] | [0x9F, 0x12] => String::from_utf8(value.to_vec())
            .unwrap_or_else(|_| hex::encode_upper(value)),

        // Cardholder Name
        [0x5F, 0x20] => String::from_utf8_lossy(value).trim().to_string(),

        // Application PAN
        [0x5A] => {
            let digits = hex::encode_upper(value);
            let pan = digits.trim_end_matches('F');
            format_pan(pan, show_pan)
        }

        // Application Expiration / Effective Date (YYMMDD)
        [0x5F, 0x24] | [0x5F, 0x25] => {
            if value.len() == 3 {
                format!(
                    "20{:02X}/{:02X}/{:02X} (YY/MM/DD)",
                    value[0], value[1], value[2]
                )
            } else {
                hex::encode_upper(value)
            }
        }

        // Issuer Country Code (ISO 3166-1 numeric)
        [0x5F, 0x28] | [0x9F, 0x1A] => {
            let code = hex::encode_upper(value);
            match code.parse::<u16>().ok().and_then(get_country_name) {
                Some(country) => format!("{code} ({country})"),
                None => code,
            }
        }

        // Currency Codes
        [0x5F, 0x2A] | [0x9F, 0x42] => {
            let code = hex::encode_upper(value);
            match code.parse::<u16>().ok().and_then(get_currency_name) {
                Some(currency) => currency.to_string(),
                None => format!("Currency Code {code}"),
            }
        }

        // Application PAN Sequence Number
        [0x5F, 0x34] => {
            if value.len() == 1 {
                format!("{:02X}", value[0])
            } else {
                hex::encode_upper(value)
            }
        }

        // Track 2 Data
        [0x57] | [0x9F, 0x6B] => {
            let hex_str = hex::encode_upper(value);
            match hex_str.split_once('D') {
                Some((pan, rest)) if !show_pan => format!("{} | {rest}", mask_pan(pan)),
                _ => hex_str.replace('D', " | "),
            }
        }

        // Default: hex for everything else
        _ => hex::encode_upper(value),
    }
}

/// One line per data object in `data`, nested objects indented.
///
/// Data that does not decode as BER-TLV is printed as hex, or only by size
/// when the PAN is masked.
pub fn format_tlv(data: &[u8], mode: FormatMode, show_pan: bool) -> Vec<String> {
    let tree = match TlvTree::decode(data) {
        Ok(tree) => tree,
        Err(_) if show_pan => return vec![format!("  {}", hex::encode_upper(data))],
        Err(_) => return vec![format!("  <{} undecodable bytes>", data.len())],
    };

    tree.nodes()
        .iter()
        .map(|node| {
            let indent = "  ".repeat(node.depth() + 1);
            let tag = hex::encode_upper(node.tag());
            let name = get_tag_name(node.tag());
            if node.is_constructed() {
                format!("{indent}[{tag}] {name}")
            } else {
                let value = format_value(node.tag(), node.value(), mode, show_pan);
                format!("{indent}[{tag}] {name}: {value}")
            }
        })
        .collect()
}

/// ISO 3166-1 numeric country codes (subset)
fn get_country_name(code: u16) -> Option<&'static str> {
    match code {
        124 => Some("Canada"),
        840 => Some("United States"),
        826 => Some("United Kingdom"),
        276 => Some("Germany"),
        250 => Some("France"),
        380 => Some("Italy"),
        724 => Some("Spain"),
        528 => Some("Netherlands"),
        156 => Some("China"),
        392 => Some("Japan"),
        _ => None,
    }
}

/// ISO 4217 numeric currency codes (subset)
fn get_currency_name(code: u16) -> Option<&'static str> {
    match code {
        124 => Some("CAD (Canadian Dollar)"),
        840 => Some("USD (US Dollar)"),
        978 => Some("EUR (Euro)"),
        826 => Some("GBP (Pound Sterling)"),
        392 => Some("JPY (Japanese Yen)"),
        156 => Some("CNY (Chinese Yuan)"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_pan() {
        assert_eq!(mask_pan("4396003308758620"), "4396 ****");
        assert_eq!(mask_pan("41"), "41 ****");
        assert_eq!(format_pan("4396003308758620", true), "4396003308758620");
    }

    #[test]
    fn test_format_expiry() {
        assert_eq!(format_expiry("2603"), "03/2026");
        assert_eq!(format_expiry("26"), "26");
    }

    #[test]
    fn test_format_value_human() {
        let human = FormatMode::Human;
        assert_eq!(format_value(&[0x50], b"VISA DEBIT", human, false), "VISA DEBIT");
        assert_eq!(
            format_value(&[0x5A], &[0x41, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11], human, false),
            "4111 ****"
        );
        assert_eq!(
            format_value(&[0x5A], &[0x37, 0x42, 0x45, 0x45, 0x54, 0x00, 0x12, 0x6F], human, true),
            "374245455400126"
        );
        assert_eq!(format_value(&[0x5F, 0x2A], &[0x09, 0x78], human, false), "EUR (Euro)");
        assert_eq!(format_value(&[0x5F, 0x28], &[0x02, 0x76], human, false), "0276 (Germany)");
        assert_eq!(
            format_value(&[0x5F, 0x24], &[0x26, 0x03, 0x31], human, false),
            "2026/03/31 (YY/MM/DD)"
        );
    }

    #[test]
    fn test_track2_is_masked() {
        let track2 = [0x43, 0x96, 0x00, 0x33, 0x08, 0x75, 0x86, 0x20, 0xD2, 0x60, 0x32, 0x21];
        assert_eq!(
            format_value(&[0x57], &track2, FormatMode::Human, false),
            "4396 **** | 2603221"
        );
        assert_eq!(
            format_value(&[0x57], &track2, FormatMode::Human, true),
            "4396003308758620 | 2603221"
        );
    }

    #[test]
    fn test_raw_mode_is_hex() {
        assert_eq!(format_value(&[0x50], b"VISA", FormatMode::Raw, false), "56495341");
    }

    #[test]
    fn test_raw_mode_masks_card_numbers() {
        let pan = [0x41, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11];
        assert_eq!(format_value(&[0x5A], &pan, FormatMode::Raw, false), "4111 ****");
        assert_eq!(
            format_value(&[0x5A], &pan, FormatMode::Raw, true),
            "4111111111111111"
        );

        let track2 = [0x41, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0xD2, 0x71, 0x22, 0x01];
        assert_eq!(format_value(&[0x57], &track2, FormatMode::Raw, false), "4111 ****");
        assert_eq!(format_value(&[0x9F, 0x6B], &track2, FormatMode::Raw, false), "4111 ****");

        let record = [0x70, 0x0A, 0x5A, 0x08, 0x41, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11];
        let lines = format_tlv(&record, FormatMode::Raw, false);
        assert!(lines.iter().all(|line| !line.contains("4111111111111111")));
        assert!(lines[1].ends_with("Application PAN: 4111 ****"));
    }

    #[test]
    fn test_format_tlv() {
        let record = [0x70, 0x06, 0x5F, 0x24, 0x03, 0x26, 0x03, 0x31];
        let lines = format_tlv(&record, FormatMode::Human, false);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("  [70]"));
        assert!(lines[1].starts_with("    [5F24]"));
        assert!(lines[1].ends_with("2026/03/31 (YY/MM/DD)"));

        assert_eq!(format_tlv(&[0x5A], FormatMode::Human, true), vec!["  5A".to_string()]);
        assert_eq!(
            format_tlv(&[0x5A], FormatMode::Human, false),
            vec!["  <1 undecodable bytes>".to_string()]
        );
    }
}
