//! Application File Locator decoding and record reading

use std::ops::RangeInclusive;

use tracing::{debug, warn};

use crate::apdu::commands;
use crate::error::{Error, Result};
use crate::transceiver::{CardChannel, Transceiver};

/// Bytes per AFL entry
pub const AFL_ENTRY_LEN: usize = 4;

/// Length of the AIP heading a format 1 GPO response
const AIP_LEN: usize = 2;

/// One AFL entry: a file and the range of records to read from it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AflEntry {
    /// Short File Identifier
    pub sfi: u8,
    pub first_record: u8,
    pub last_record: u8,
    /// Records taking part in offline data authentication
    pub offline_auth_records: u8,
}

impl AflEntry {
    /// Decode one 4-byte entry, rejecting an empty or inverted record range
    fn parse(chunk: &[u8]) -> Result<Self> {
        let &[sfi_byte, first_record, last_record, offline_auth_records] = chunk else {
            return Err(Error::MalformedAfl("entry is not 4 bytes"));
        };

        if first_record == 0 {
            return Err(Error::MalformedAfl("record numbers start at 1"));
        }
        if last_record < first_record {
            return Err(Error::MalformedAfl("last record precedes first record"));
        }

        Ok(Self {
            sfi: sfi_byte >> 3,
            first_record,
            last_record,
            offline_auth_records,
        })
    }

    pub fn records(&self) -> RangeInclusive<u8> {
        self.first_record..=self.last_record
    }

    pub fn record_count(&self) -> usize {
        usize::from(self.last_record - self.first_record) + 1
    }
}

/// Application File Locator (tag 94)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Afl {
    entries: Vec<AflEntry>,
}

impl Afl {
    /// Decode an AFL; its length must be a multiple of 4.
    ///
    /// Entries with an invalid record range are dropped so the rest of the
    /// AFL can still be read.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % AFL_ENTRY_LEN != 0 {
            return Err(Error::MalformedAfl("length is not a multiple of 4"));
        }

        let entries = bytes
            .chunks_exact(AFL_ENTRY_LEN)
            .filter_map(|chunk| match AflEntry::parse(chunk) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(entry = %hex::encode_upper(chunk), error = %err, "dropping AFL entry");
                    None
                }
            })
            .collect();
        Ok(Self { entries })
    }

    /// AFL bytes carried in a format 1 response (tag 80) after the AIP
    pub fn bytes_from_format1(template: &[u8]) -> Result<&[u8]> {
        template
            .get(AIP_LEN..)
            .ok_or(Error::MalformedResponse("format 1 response is shorter than the AIP"))
    }

    pub fn entries(&self) -> &[AflEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of READ RECORD commands this AFL asks for
    pub fn record_count(&self) -> usize {
        self.entries.iter().map(AflEntry::record_count).sum()
    }
}

/// Outcome of one READ RECORD
#[derive(Debug)]
pub struct RecordRead {
    pub sfi: u8,
    pub record: u8,
    pub data: Result<Vec<u8>>,
}

/// Read every record referenced by `afl`.
///
/// A failed record is reported in its [`RecordRead`] and reading carries on
/// with the next one.
pub fn read_records<T: Transceiver>(channel: &mut CardChannel<T>, afl: &Afl) -> Vec<RecordRead> {
    let mut reads = Vec::with_capacity(afl.record_count());

    for entry in afl.entries() {
        debug!(
            sfi = entry.sfi,
            first = entry.first_record,
            last = entry.last_record,
            "reading AFL entry"
        );
        for record in entry.records() {
            let data = channel.transmit(&commands::read_record(record, entry.sfi));
            if let Err(err) = &data {
                warn!(sfi = entry.sfi, record, error = %err, "skipping unreadable record");
            }
            reads.push(RecordRead {
                sfi: entry.sfi,
                record,
                data,
            });
        }
    }

    reads
}

/// Decode `raw_afl` and read every record it references
pub fn read_afl<T: Transceiver>(channel: &mut CardChannel<T>, raw_afl: &[u8]) -> Result<Vec<RecordRead>> {
    let afl = Afl::parse(raw_afl)?;
    Ok(read_records(channel, &afl))
}
