pub mod apdu;
pub mod cards;
pub mod config;
pub mod error;
pub mod ndef;
pub mod nfc_service;
pub mod reader;
pub mod session;
pub mod tag;
pub mod types;
pub mod uri_prefix;
pub mod ws;
