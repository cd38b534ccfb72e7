// src/tag.rs
use std::collections::{BTreeMap, HashMap};

use lazy_static::lazy_static;

use crate::types::{TagIdentity, Technology, format_uid};

lazy_static! {
    // ISO/IEC 7816-6 IC manufacturer registry (subset)
    static ref IC_MANUFACTURERS: HashMap<u8, &'static str> = {
        let mut m = HashMap::new();
        m.insert(0x01, "Motorola");
        m.insert(0x02, "STMicroelectronics");
        m.insert(0x03, "Hitachi");
        m.insert(0x04, "NXP Semiconductors");
        m.insert(0x05, "Infineon Technologies");
        m.insert(0x06, "Cylink");
        m.insert(0x07, "Texas Instruments");
        m.insert(0x08, "Fujitsu");
        m.insert(0x09, "Matsushita");
        m.insert(0x0A, "NEC");
        m.insert(0x0B, "Oki Electric");
        m.insert(0x0C, "Toshiba");
        m.insert(0x0D, "Mitsubishi Electric");
        m.insert(0x0E, "Samsung Electronics");
        m.insert(0x0F, "Hynix");
        m.insert(0x10, "LG Semiconductors");
        m.insert(0x16, "EM Microelectronic-Marin");
        m.insert(0x17, "KSW Microtec");
        m.insert(0x1F, "Melexis");
        m.insert(0x2B, "Maxim Integrated");
        m.insert(0x44, "Gentag");
        m
    };
}

pub fn ic_manufacturer_name(code: u8) -> Option<&'static str> {
    IC_MANUFACTURERS.get(&code).copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MifareFamily {
    Classic,
    Ultralight,
    Plus,
    Desfire,
    Unknown,
}

impl MifareFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            MifareFamily::Classic => "Classic",
            MifareFamily::Ultralight => "Ultralight",
            MifareFamily::Plus => "Plus",
            MifareFamily::Desfire => "DESFire",
            MifareFamily::Unknown => "Unknown",
        }
    }
}

/// Technology-specific identifier payload, decided once by the reader at
/// detection time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TechnologyHandle {
    Iso7816 {
        identifier: Vec<u8>,
    },
    Iso15693 {
        identifier: Vec<u8>,
        /// `None` when the UID is not a well-formed `E0`-prefixed UID.
        ic_manufacturer_code: Option<u8>,
    },
    Mifare {
        identifier: Vec<u8>,
        family: MifareFamily,
    },
    Felica {
        current_idm: [u8; 8],
        current_system_code: Option<[u8; 2]>,
    },
    Unrecognized,
}

/// A candidate tag as handed over by the reader. `id` is only meaningful to
/// the reader that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagHandle {
    pub id: u32,
    pub technology: TechnologyHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    pub identity: TagIdentity,
    pub extras: BTreeMap<String, String>,
}

pub fn identify(handle: &TechnologyHandle) -> Identification {
    let mut extras = BTreeMap::new();

    let (technology, uid) = match handle {
        TechnologyHandle::Iso7816 { identifier } => (Technology::Iso7816, identifier.clone()),
        TechnologyHandle::Iso15693 {
            identifier,
            ic_manufacturer_code,
        } => {
            let manufacturer = match ic_manufacturer_code {
                Some(code) => match ic_manufacturer_name(*code) {
                    Some(name) => format!("{} (0x{:02X})", name, code),
                    None => format!("0x{:02X}", code),
                },
                None => "Unknown".to_string(),
            };
            extras.insert("IC Manufacturer".to_string(), manufacturer);
            (Technology::Iso15693, identifier.clone())
        }
        TechnologyHandle::Mifare { identifier, family } => {
            extras.insert("MIFARE Family".to_string(), family.as_str().to_string());
            (Technology::Mifare, identifier.clone())
        }
        TechnologyHandle::Felica {
            current_idm,
            current_system_code,
        } => {
            if let Some(code) = current_system_code {
                extras.insert("System Code".to_string(), format_uid(code));
            }
            (Technology::FeliCa, current_idm.to_vec())
        }
        TechnologyHandle::Unrecognized => (Technology::Unknown, Vec::new()),
    };

    Identification {
        identity: TagIdentity { technology, uid },
        extras,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mifare_records_family() {
        let id = identify(&TechnologyHandle::Mifare {
            identifier: vec![0xAA, 0xBB, 0xCC, 0xDD],
            family: MifareFamily::Desfire,
        });
        assert_eq!(id.identity.technology, Technology::Mifare);
        assert_eq!(id.identity.uid_hex(), "AABBCCDD");
        assert_eq!(id.extras.get("MIFARE Family").map(String::as_str), Some("DESFire"));
    }

    #[test]
    fn iso7816_uses_identifier() {
        let id = identify(&TechnologyHandle::Iso7816 {
            identifier: vec![0x04, 0x52, 0x1A, 0x9A, 0x2B, 0x61, 0x80],
        });
        assert_eq!(id.identity.technology, Technology::Iso7816);
        assert_eq!(id.identity.uid_hex(), "04521A9A2B6180");
        assert!(id.extras.is_empty());
    }

    #[test]
    fn iso15693_names_manufacturer() {
        let id = identify(&TechnologyHandle::Iso15693 {
            identifier: vec![0xE0, 0x04, 0x01, 0x50, 0x12, 0x34, 0x56, 0x78],
            ic_manufacturer_code: Some(0x04),
        });
        assert_eq!(id.identity.technology, Technology::Iso15693);
        assert_eq!(id.identity.uid_hex(), "E004015012345678");
        assert_eq!(
            id.extras.get("IC Manufacturer").map(String::as_str),
            Some("NXP Semiconductors (0x04)")
        );

        let id = identify(&TechnologyHandle::Iso15693 {
            identifier: vec![0xE0, 0xEE, 0, 0, 0, 0, 0, 1],
            ic_manufacturer_code: Some(0xEE),
        });
        assert_eq!(id.extras.get("IC Manufacturer").map(String::as_str), Some("0xEE"));

        let id = identify(&TechnologyHandle::Iso15693 {
            identifier: vec![0x12, 0x34],
            ic_manufacturer_code: None,
        });
        assert_eq!(id.extras.get("IC Manufacturer").map(String::as_str), Some("Unknown"));
    }

    #[test]
    fn felica_uses_idm_and_system_code() {
        let id = identify(&TechnologyHandle::Felica {
            current_idm: [0x01, 0x2E, 0x4C, 0xD3, 0x8A, 0x11, 0x22, 0x33],
            current_system_code: Some([0x88, 0xB4]),
        });
        assert_eq!(id.identity.technology, Technology::FeliCa);
        assert_eq!(id.identity.uid_hex(), "012E4CD38A112233");
        assert_eq!(id.extras.get("System Code").map(String::as_str), Some("88B4"));

        let id = identify(&TechnologyHandle::Felica {
            current_idm: [0; 8],
            current_system_code: None,
        });
        assert!(id.extras.is_empty());
    }

    #[test]
    fn unrecognized_is_unknown_with_empty_uid() {
        let id = identify(&TechnologyHandle::Unrecognized);
        assert_eq!(id.identity.technology, Technology::Unknown);
        assert!(id.identity.uid.is_empty());
    }

    #[test]
    fn identify_is_pure() {
        let handle = TechnologyHandle::Mifare {
            identifier: vec![0x01, 0x02],
            family: MifareFamily::Ultralight,
        };
        assert_eq!(identify(&handle), identify(&handle));
    }
}
