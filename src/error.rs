// src/error.rs
use serde::Serialize;
use thiserror::Error;

/// Why a scan session ended without a result. The `Display` text is the
/// status line shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "reason")]
pub enum ScanError {
    #[error("This device does not support NFC tag reading")]
    UnsupportedDevice,
    #[error("A scan is already in progress")]
    AlreadyScanning,
    /// Never surfaced: the controller re-polls instead.
    #[error("More than one tag detected, remove all but one")]
    Collision,
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
    #[error("Tag is not NDEF compliant")]
    NdefNotSupported,
    #[error("No NDEF content found on the tag")]
    NoContent,
    #[error("Session timed out")]
    Timeout,
    #[error("Scan failed: {0}")]
    Unknown(String),
}
