//! EMV read session
//!
//! Drives a card through the contactless read flow:
//!
//! 1. SELECT the PPSE and collect every AID it lists
//! 2. SELECT each AID and pick up its PDOL
//! 3. GET PROCESSING OPTIONS with the PDOL answered from terminal data
//! 4. READ RECORD for every record the AFL points at
//!
//! Failing to select the PPSE ends the session. Anything that goes wrong
//! while reading one application is recorded on that application and the
//! session moves on to the next one.

use std::fmt;

use emv_common::{tags, TlvTree};
use tracing::{debug, info, warn};

use crate::afl::{read_records, Afl};
use crate::aid::{aids, Aid, Issuer};
use crate::apdu::commands;
use crate::error::{Error, Result};
use crate::pdol::{build_gpo_data, Pdol, StaticTerminalData, TerminalDataSource};
use crate::track2::{decode_expiry, decode_pan, Track2};
use crate::transceiver::{CardChannel, NegotiationPolicy, Transceiver};

/// Most AIDs taken from one PPSE directory
pub const DEFAULT_MAX_AIDS: usize = 10;

/// Read flow states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    PpseSelected,
    AidSelected,
    PdolResolved,
    RecordsRead,
    Done,
    Failed,
}

impl SessionState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::PpseSelected => "PPSE selected",
            Self::AidSelected => "AID selected",
            Self::PdolResolved => "PDOL resolved",
            Self::RecordsRead => "records read",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Session configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub max_aids: usize,
    pub policy: NegotiationPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_aids: DEFAULT_MAX_AIDS,
            policy: NegotiationPolicy::default(),
        }
    }
}

/// A record read from the card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordData {
    pub sfi: u8,
    pub record: u8,
    pub data: Vec<u8>,
}

/// A record the card did not hand over
#[derive(Debug)]
pub struct SkippedRecord {
    pub sfi: u8,
    pub record: u8,
    pub error: Error,
}

/// Everything read from one application
#[derive(Debug)]
pub struct ApplicationData {
    /// Position in the PPSE directory
    pub index: usize,
    pub aid: Aid,
    pub issuer: Issuer,
    /// Last state reached, `Failed` if reading stopped early
    pub state: SessionState,
    pub pdol: Option<Pdol>,
    pub track2: Option<Track2>,
    pub pan: Option<String>,
    /// Expiry as `YYMM`
    pub expiry: Option<String>,
    pub cardholder_name: Option<String>,
    /// Raw AFL, recovered from a format 1 response when tag 94 is missing
    pub afl: Option<Vec<u8>>,
    pub records: Vec<RecordData>,
    pub skipped_records: Vec<SkippedRecord>,
    pub error: Option<Error>,
}

impl ApplicationData {
    fn new(index: usize, aid: Aid) -> Self {
        let issuer = aid.issuer();
        Self {
            index,
            aid,
            issuer,
            state: SessionState::Idle,
            pdol: None,
            track2: None,
            pan: None,
            expiry: None,
            cardholder_name: None,
            afl: None,
            records: Vec::new(),
            skipped_records: Vec::new(),
            error: None,
        }
    }

    /// Pick up PAN, expiry and name from a record.
    ///
    /// Tags 5A and 5F24 override what Track 2 gave; a Track 2 in a record
    /// only fills in what is still missing.
    fn apply_record(&mut self, tree: &TlvTree) {
        if let Some(value) = tree.find_value(tags::APPLICATION_PAN) {
            match decode_pan(value) {
                Ok(pan) => self.pan = Some(pan),
                Err(err) => warn!(aid = %self.aid, error = %err, "ignoring malformed PAN"),
            }
        }

        if let Some(value) = tree.find_value(tags::APPLICATION_EXPIRATION_DATE) {
            match decode_expiry(value) {
                Ok(expiry) => self.expiry = Some(expiry),
                Err(err) => warn!(aid = %self.aid, error = %err, "ignoring malformed expiry"),
            }
        }

        if let Some(value) = tree.find_value(tags::CARDHOLDER_NAME) {
            let name = String::from_utf8_lossy(value).trim().to_string();
            if !name.is_empty() {
                self.cardholder_name = Some(name);
            }
        }

        if let Some(value) = tree.find_value(tags::TRACK_2_EQUIVALENT_DATA) {
            self.apply_track2(value);
        }
    }

    fn apply_track2(&mut self, value: &[u8]) {
        let track2 = match Track2::decode(value) {
            Ok(track2) => track2,
            Err(err) => {
                warn!(aid = %self.aid, error = %err, "ignoring malformed Track 2 data");
                return;
            }
        };

        self.pan.get_or_insert_with(|| track2.pan.clone());
        self.expiry.get_or_insert_with(|| track2.expiry.clone());
        self.track2.get_or_insert(track2);
    }
}

/// Outcome of a read session
#[derive(Debug)]
pub struct SessionResult {
    /// `Done`, or `Failed` when the PPSE could not be read
    pub state: SessionState,
    pub applications: Vec<ApplicationData>,
    /// Why the session failed
    pub error: Option<Error>,
}

impl SessionResult {
    pub fn aids(&self) -> impl Iterator<Item = &Aid> + '_ {
        self.applications.iter().map(|app| &app.aid)
    }

    /// PAN of the first application that yielded one
    pub fn pan(&self) -> Option<&str> {
        self.applications.iter().find_map(|app| app.pan.as_deref())
    }

    /// Expiry (`YYMM`) of the first application that yielded one
    pub fn expiry(&self) -> Option<&str> {
        self.applications.iter().find_map(|app| app.expiry.as_deref())
    }

    pub fn is_success(&self) -> bool {
        self.state == SessionState::Done
    }
}

/// A single read session over one card
pub struct EmvSession<T, D = StaticTerminalData> {
    channel: CardChannel<T>,
    terminal: D,
    options: SessionOptions,
    state: SessionState,
}

impl<T: Transceiver> EmvSession<T> {
    pub fn new(transceiver: T) -> Self {
        Self::with_terminal_data(transceiver, StaticTerminalData::default())
    }
}

impl<T: Transceiver, D: TerminalDataSource> EmvSession<T, D> {
    pub fn with_terminal_data(transceiver: T, terminal: D) -> Self {
        let options = SessionOptions::default();
        Self {
            channel: CardChannel::with_policy(transceiver, options.policy),
            terminal,
            options,
            state: SessionState::Idle,
        }
    }

    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self.channel = CardChannel::with_policy(self.channel.into_inner(), options.policy);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the read flow to completion
    pub fn run(mut self) -> SessionResult {
        let aids = match self.select_ppse() {
            Ok(aids) => aids,
            Err(err) => {
                warn!(error = %err, "PPSE selection failed");
                self.transition(SessionState::Failed);
                return SessionResult {
                    state: self.state,
                    applications: Vec::new(),
                    error: Some(err),
                };
            }
        };

        info!(count = aids.len(), "discovered applications");
        self.transition(SessionState::PpseSelected);

        let applications = aids
            .into_iter()
            .enumerate()
            .map(|(index, aid)| self.read_application(index, aid))
            .collect();

        self.transition(SessionState::Done);
        SessionResult {
            state: self.state,
            applications,
            error: None,
        }
    }

    fn transition(&mut self, state: SessionState) {
        debug!(from = %self.state, to = %state, "session state");
        self.state = state;
    }

    fn advance(&mut self, app: &mut ApplicationData, state: SessionState) {
        app.state = state;
        self.transition(state);
    }

    fn select_ppse(&mut self) -> Result<Vec<Aid>> {
        let response = self.channel.transmit(&commands::select(aids::PPSE))?;
        let tree = TlvTree::decode(&response)?;

        let mut found = Vec::new();
        let mut next = tree.find_first(tags::APPLICATION_IDENTIFIER);
        while let Some(id) = next {
            if found.len() == self.options.max_aids {
                warn!(max = self.options.max_aids, "ignoring further AIDs");
                break;
            }
            match Aid::try_from(tree.value(id)) {
                Ok(aid) => {
                    debug!(aid = %aid, issuer = %aid.issuer(), "found AID");
                    found.push(aid);
                }
                Err(err) => {
                    warn!(aid = %hex::encode_upper(tree.value(id)), error = %err, "skipping AID")
                }
            }
            next = tree.find_next(id);
        }

        Ok(found)
    }

    fn read_application(&mut self, index: usize, aid: Aid) -> ApplicationData {
        let mut app = ApplicationData::new(index, aid);

        if let Err(err) = self.process_application(&mut app) {
            warn!(aid = %app.aid, state = %app.state, error = %err, "application read failed");
            app.state = SessionState::Failed;
            app.error = Some(err);
        }

        app
    }

    fn process_application(&mut self, app: &mut ApplicationData) -> Result<()> {
        let fci = self.channel.transmit(&commands::select(app.aid.as_bytes()))?;
        let fci = TlvTree::decode(&fci)?;
        app.pdol = fci.find_value(tags::PDOL).map(Pdol::parse).transpose()?;
        if app.pdol.is_none() {
            debug!(aid = %app.aid, "no PDOL");
        }
        self.advance(app, SessionState::AidSelected);

        let gpo_data = build_gpo_data(app.pdol.as_ref(), &self.terminal)?;
        let gpo = self
            .channel
            .transmit(&commands::get_processing_options(gpo_data))?;
        let gpo = TlvTree::decode(&gpo)?;

        if let Some(value) = gpo.find_value(tags::TRACK_2_EQUIVALENT_DATA) {
            app.apply_track2(value);
        }

        app.afl = match gpo.find_value(tags::AFL) {
            Some(afl) => Some(afl.to_vec()),
            None => gpo
                .find_value(tags::RESPONSE_MESSAGE_TEMPLATE_FORMAT_1)
                .map(Afl::bytes_from_format1)
                .transpose()?
                .map(<[u8]>::to_vec),
        };
        self.advance(app, SessionState::PdolResolved);

        if let Some(afl) = app.afl.as_deref().map(Afl::parse).transpose()? {
            for read in read_records(&mut self.channel, &afl) {
                match read.data {
                    Ok(data) => {
                        match TlvTree::decode(&data) {
                            Ok(tree) => app.apply_record(&tree),
                            Err(err) => {
                                warn!(sfi = read.sfi, record = read.record, error = %err, "undecodable record")
                            }
                        }
                        app.records.push(RecordData {
                            sfi: read.sfi,
                            record: read.record,
                            data,
                        });
                    }
                    Err(error) => app.skipped_records.push(SkippedRecord {
                        sfi: read.sfi,
                        record: read.record,
                        error,
                    }),
                }
            }
        } else {
            debug!(aid = %app.aid, "card returned no AFL");
        }
        self.advance(app, SessionState::RecordsRead);

        Ok(())
    }
}
