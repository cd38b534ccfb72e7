// src/types.rs
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::ScanError;

/// How the type field of an NDEF record is to be interpreted (3-bit TNF).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeNameFormat {
    Empty,
    WellKnown,
    Media,
    AbsoluteUri,
    ExternalType,
    Unknown,
}

impl TypeNameFormat {
    /// Maps the low three header bits. `0x06` (unchanged) and `0x07`
    /// (reserved) have no meaning outside a chunk sequence and land on Unknown.
    pub fn from_code(code: u8) -> Self {
        match code & 0x07 {
            0x00 => TypeNameFormat::Empty,
            0x01 => TypeNameFormat::WellKnown,
            0x02 => TypeNameFormat::Media,
            0x03 => TypeNameFormat::AbsoluteUri,
            0x04 => TypeNameFormat::ExternalType,
            _ => TypeNameFormat::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub tnf: TypeNameFormat,
    pub record_type: Vec<u8>,
    pub payload: Vec<u8>,
    pub id: Option<Vec<u8>>,
}

impl RawRecord {
    pub fn new(tnf: TypeNameFormat, record_type: &[u8], payload: &[u8]) -> Self {
        Self {
            tnf,
            record_type: record_type.to_vec(),
            payload: payload.to_vec(),
            id: None,
        }
    }

    /// An Empty-TNF record with no type and no payload, as found on blank
    /// formatted tags.
    pub fn is_empty(&self) -> bool {
        self.tnf == TypeNameFormat::Empty && self.record_type.is_empty() && self.payload.is_empty()
    }
}

/// One record after payload interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedRecord {
    Uri(String),
    Text { language: String, text: String },
    RawText(String),
    Hex(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Technology {
    #[serde(rename = "ISO7816")]
    Iso7816,
    #[serde(rename = "ISO15693")]
    Iso15693,
    #[serde(rename = "MIFARE")]
    Mifare,
    FeliCa,
    Unknown,
}

impl Technology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Technology::Iso7816 => "ISO7816",
            Technology::Iso15693 => "ISO15693",
            Technology::Mifare => "MIFARE",
            Technology::FeliCa => "FeliCa",
            Technology::Unknown => "Unknown",
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TagIdentity {
    pub technology: Technology,
    #[serde(serialize_with = "serialize_uid")]
    pub uid: Vec<u8>,
}

impl TagIdentity {
    /// Canonical UID rendering: uppercase hex, no separator.
    pub fn uid_hex(&self) -> String {
        format_uid(&self.uid)
    }
}

pub fn format_uid(uid: &[u8]) -> String {
    hex::encode_upper(uid)
}

fn serialize_uid<S: Serializer>(uid: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_uid(uid))
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub identity: TagIdentity,
    pub rendered_content: String,
    pub extras: BTreeMap<String, String>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Polling,
    TagsDetected,
    Connecting,
    Reading,
    Reporting,
    Error,
}

impl SessionState {
    pub fn is_scanning(&self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Error)
    }
}

/// Immutable view of the controller handed to the UI after every transition.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanSnapshot {
    pub state: SessionState,
    pub status: String,
    pub identity: Option<TagIdentity>,
    pub rendered_content: Option<String>,
    pub extras: BTreeMap<String, String>,
    pub is_scanning: bool,
    pub error: Option<ScanError>,
}

// Messages sent TO the WebSocket client (Frontend)
#[derive(Serialize, Clone, Debug)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutgoingMessage {
    ReaderStatus { success: bool },
    ScanStatus(ScanSnapshot),
    ScanResult(ScanResult),
    ScanError { error: String },
}

// Messages received FROM the WebSocket client
#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncomingMessage {
    GetReaderStatus,
    StartScan,
    StopScan,
}

// Internal commands sent from WS Server -> controller thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NfcCommand {
    Start,
    Stop,
    CheckReaderStatus,
}

impl From<IncomingMessage> for NfcCommand {
    fn from(msg: IncomingMessage) -> Self {
        match msg {
            IncomingMessage::GetReaderStatus => NfcCommand::CheckReaderStatus,
            IncomingMessage::StartScan => NfcCommand::Start,
            IncomingMessage::StopScan => NfcCommand::Stop,
        }
    }
}
