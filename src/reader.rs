// src/reader.rs
use crate::tag::TagHandle;
use crate::types::RawRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NdefStatus {
    NotSupported,
    ReadOnly { capacity: usize },
    ReadWrite { capacity: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationReason {
    UserCanceled,
    Timeout,
    SessionTerminated,
    Failure(String),
}

/// Callbacks from the reader, in the order the reader produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    SessionActive,
    TagsDetected(Vec<TagHandle>),
    Connected,
    ConnectFailed(String),
    NdefStatus(NdefStatus),
    NdefRead(Result<Vec<RawRecord>, String>),
    Invalidated(InvalidationReason),
}

/// Requests the controller can make of the reader. None of them block; the
/// outcome comes back later as a `ReaderEvent`.
pub trait TagReader {
    fn is_available(&self) -> bool;
    fn begin_session(&mut self, alert_message: &str);
    fn restart_polling(&mut self);
    fn connect(&mut self, handle_id: u32);
    fn query_ndef_status(&mut self);
    fn read_ndef(&mut self);
    /// Close the session. `message` is shown to the user when present.
    fn invalidate(&mut self, message: Option<&str>);
}
