// src/cards.rs
use log::{debug, warn};
use pcsc::Card;

use crate::apdu;
use crate::ndef;
use crate::reader::NdefStatus;
use crate::tag::{MifareFamily, TechnologyHandle};

// Transport and well-known keys; D3F7D3F7D3F7 is the NFC Forum public key
pub const COMMON_KEYS: [[u8; 6]; 8] = [
    [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
    [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5],
    [0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7],
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    [0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5],
    [0x4D, 0x3A, 0x99, 0xC3, 0x51, 0xDD],
    [0x1A, 0x98, 0x2C, 0x7E, 0x45, 0x9A],
    [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
];

// PC/SC part 3 registered application provider id
const PCSC_RID: [u8; 5] = [0xA0, 0x00, 0x00, 0x03, 0x06];

const NDEF_APPLICATION: [u8; 7] = [0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];
const CC_FILE: [u8; 2] = [0xE1, 0x03];
const TYPE2_CC_MAGIC: u8 = 0xE1;
// Sectors 1..=15, three data blocks each
const MIFARE_CLASSIC_NDEF_AREA: usize = 15 * 3 * 16;

/// Card family as far as the reader's ATR tells us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    MifareClassic,
    MifarePlus,
    /// Ultralight, NTAG and other NFC Forum Type 2 tags
    Ultralight,
    /// ISO14443A part 3 tag the reader could not name
    Iso14443A,
    Desfire,
    /// ISO14443-4 (ISO7816 APDU) smart card / Type 4 tag
    Type4,
    Felica,
    Iso15693,
    Unknown,
}

impl CardKind {
    pub fn classify(atr: &[u8]) -> CardKind {
        // Storage card: 3B 8F 80 01 80 4F 0C [RID] SS C0 C1 00 00 00 00 TCK
        if atr.len() >= 15 && atr[4] == 0x80 && atr[5] == 0x4F && atr[7..12] == PCSC_RID {
            let standard = atr[12];
            let name = u16::from_be_bytes([atr[13], atr[14]]);
            return match standard {
                0x03 => match name {
                    0x0001 | 0x0002 | 0x0026 => CardKind::MifareClassic,
                    0x0003 | 0x003A => CardKind::Ultralight,
                    0x0036..=0x0039 => CardKind::MifarePlus,
                    _ => CardKind::Iso14443A,
                },
                0x09..=0x0C => CardKind::Iso15693,
                0x11 => CardKind::Felica,
                _ => CardKind::Unknown,
            };
        }

        // ISO14443-4: 3B 8n 80 01 [historical bytes] TCK
        if atr.len() >= 4 && atr[0] == 0x3B && atr[1] & 0xF0 == 0x80 && atr[2..4] == [0x80, 0x01]
        {
            let historical_len = (atr[1] & 0x0F) as usize;
            let historical = atr.get(4..4 + historical_len).unwrap_or(&[]);
            return if historical == [0x80] {
                CardKind::Desfire
            } else {
                CardKind::Type4
            };
        }

        CardKind::Unknown
    }

    pub fn technology_handle(&self, uid: Vec<u8>) -> TechnologyHandle {
        match self {
            CardKind::MifareClassic => mifare(uid, MifareFamily::Classic),
            CardKind::MifarePlus => mifare(uid, MifareFamily::Plus),
            CardKind::Ultralight => mifare(uid, MifareFamily::Ultralight),
            CardKind::Iso14443A => mifare(uid, MifareFamily::Unknown),
            CardKind::Desfire => mifare(uid, MifareFamily::Desfire),
            CardKind::Type4 => TechnologyHandle::Iso7816 { identifier: uid },
            CardKind::Felica => match <[u8; 8]>::try_from(uid.as_slice()) {
                Ok(current_idm) => TechnologyHandle::Felica {
                    current_idm,
                    current_system_code: None,
                },
                Err(_) => {
                    warn!("FeliCa IDm has unexpected length {}", uid.len());
                    TechnologyHandle::Unrecognized
                }
            },
            CardKind::Iso15693 => {
                let mut identifier = uid;
                // readers usually hand the UID over LSB first
                if identifier.len() == 8 && identifier[7] == 0xE0 {
                    identifier.reverse();
                }
                let ic_manufacturer_code = match identifier.as_slice() {
                    [0xE0, code, ..] if identifier.len() == 8 => Some(*code),
                    _ => None,
                };
                TechnologyHandle::Iso15693 {
                    identifier,
                    ic_manufacturer_code,
                }
            }
            CardKind::Unknown => TechnologyHandle::Unrecognized,
        }
    }
}

fn mifare(identifier: Vec<u8>, family: MifareFamily) -> TechnologyHandle {
    TechnologyHandle::Mifare { identifier, family }
}

pub fn ndef_status(card: &Card, kind: CardKind) -> Result<NdefStatus, String> {
    match kind {
        CardKind::Ultralight | CardKind::Iso14443A => {
            let cc = apdu::read_binary(card, 3, 4)?;
            Ok(parse_type2_cc(&cc))
        }
        CardKind::MifareClassic | CardKind::MifarePlus => mifare_classic_status(card),
        CardKind::Type4 | CardKind::Desfire => match read_type4_cc(card) {
            Ok(cc) => Ok(cc.status()),
            Err(e) => {
                debug!("No NDEF application: {}", e);
                Ok(NdefStatus::NotSupported)
            }
        },
        CardKind::Felica | CardKind::Iso15693 | CardKind::Unknown => Ok(NdefStatus::NotSupported),
    }
}

/// Read the NDEF message bytes (TLV framing already removed). An empty
/// vector means the tag is formatted but holds no message.
pub fn read_ndef(card: &Card, kind: CardKind) -> Result<Vec<u8>, String> {
    match kind {
        CardKind::Ultralight | CardKind::Iso14443A => read_ntag(card),
        CardKind::MifareClassic | CardKind::MifarePlus => read_mifare(card),
        CardKind::Type4 | CardKind::Desfire => read_type4(card),
        CardKind::Felica | CardKind::Iso15693 | CardKind::Unknown => {
            Err("NDEF reading is not supported for this tag".into())
        }
    }
}

// Type 2 capability container (page 3): E1 version size access
pub fn parse_type2_cc(cc: &[u8]) -> NdefStatus {
    match cc {
        [TYPE2_CC_MAGIC, _, size, access, ..] if access & 0xF0 == 0 => {
            let capacity = *size as usize * 8;
            if access & 0x0F == 0 {
                NdefStatus::ReadWrite { capacity }
            } else {
                NdefStatus::ReadOnly { capacity }
            }
        }
        _ => NdefStatus::NotSupported,
    }
}

fn tlv_to_message(memory: &[u8]) -> Result<Vec<u8>, String> {
    Ok(ndef::extract_tlv_message(memory)?
        .map(<[u8]>::to_vec)
        .unwrap_or_default())
}

fn tlv_complete(memory: &[u8]) -> bool {
    matches!(ndef::extract_tlv_message(memory), Ok(Some(_)))
}

pub fn read_ntag(card: &Card) -> Result<Vec<u8>, String> {
    let cc = apdu::read_binary(card, 3, 4)?;
    let capacity = match parse_type2_cc(&cc) {
        NdefStatus::ReadOnly { capacity } | NdefStatus::ReadWrite { capacity } => capacity,
        NdefStatus::NotSupported => return Err("No capability container".into()),
    };

    // Data area starts at page 4; each read returns four 4-byte pages
    let mut full_data = Vec::new();
    let mut page: usize = 4;
    while full_data.len() < capacity && page <= u8::MAX as usize {
        let data = apdu::read_binary(card, page as u8, 16)
            .map_err(|e| format!("Failed to read page {}: {}", page, e))?;
        full_data.extend_from_slice(&data);
        if tlv_complete(&full_data) {
            break;
        }
        page += 4;
    }
    full_data.truncate(capacity);

    tlv_to_message(&full_data)
}

pub fn get_mifare_data_blocks() -> Vec<u8> {
    let mut blocks = Vec::new();
    // Sector 0 is the MAD, so we start at Sector 1
    for sector in 1..16 {
        for block_in_sector in 0..3 {
            // 0, 1, 2 are data. 3 is the Trailer.
            blocks.push((sector * 4) + block_in_sector);
        }
    }
    blocks
}

fn authenticate_sector(card: &Card, block: u8) -> bool {
    COMMON_KEYS.iter().any(|key| {
        apdu::load_key(card, key).is_ok()
            && (apdu::authenticate(card, block, 0x60).is_ok()
                || apdu::authenticate(card, block, 0x61).is_ok())
    })
}

fn mifare_classic_status(card: &Card) -> Result<NdefStatus, String> {
    if !authenticate_sector(card, 4) {
        return Ok(NdefStatus::NotSupported);
    }
    let block = apdu::read_binary(card, 4, 16)?;
    Ok(match block.first().copied() {
        Some(0x00) | Some(0x03) => NdefStatus::ReadWrite {
            capacity: MIFARE_CLASSIC_NDEF_AREA,
        },
        _ => NdefStatus::NotSupported,
    })
}

pub fn read_mifare(card: &Card) -> Result<Vec<u8>, String> {
    let mut full_data = Vec::new();

    for block in get_mifare_data_blocks() {
        // We must authenticate at the start of every sector (blocks 4, 8, 12, etc.)
        if block % 4 == 0 && !authenticate_sector(card, block) {
            // If we can't get into this sector, we can't read the rest of the records
            warn!("Could not authenticate sector at block {}. Stopping.", block);
            break;
        }

        match apdu::read_binary(card, block, 16) {
            Ok(data) => {
                full_data.extend_from_slice(&data);
                if tlv_complete(&full_data) {
                    break;
                }
            }
            Err(_) => break,
        }
    }

    if full_data.is_empty() {
        return Err("No data could be read from the card.".into());
    }

    tlv_to_message(&full_data)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Type4CapabilityContainer {
    pub max_read: u16,
    pub file_id: [u8; 2],
    pub max_size: u16,
    pub read_access: u8,
    pub write_access: u8,
}

impl Type4CapabilityContainer {
    // CCLEN(2) version MLe(2) MLc(2) T=04 L=06 FID(2) size(2) read write
    pub fn parse(cc: &[u8]) -> Result<Self, String> {
        match cc {
            [_, _, _, le_hi, le_lo, _, _, 0x04, 0x06, f0, f1, s_hi, s_lo, read, write, ..] => {
                Ok(Self {
                    max_read: u16::from_be_bytes([*le_hi, *le_lo]),
                    file_id: [*f0, *f1],
                    max_size: u16::from_be_bytes([*s_hi, *s_lo]),
                    read_access: *read,
                    write_access: *write,
                })
            }
            _ => Err(format!("Invalid capability container: {:02X?}", cc)),
        }
    }

    pub fn status(&self) -> NdefStatus {
        let capacity = self.max_size.saturating_sub(2) as usize;
        match (self.read_access, self.write_access) {
            (0x00, 0x00) => NdefStatus::ReadWrite { capacity },
            (0x00, _) => NdefStatus::ReadOnly { capacity },
            _ => NdefStatus::NotSupported,
        }
    }
}

fn read_type4_cc(card: &Card) -> Result<Type4CapabilityContainer, String> {
    apdu::select_application(card, &NDEF_APPLICATION)?;
    apdu::select_file(card, CC_FILE)?;
    let cc = apdu::read_file(card, 0, 15)?;
    Type4CapabilityContainer::parse(&cc)
}

pub fn read_type4(card: &Card) -> Result<Vec<u8>, String> {
    let cc = read_type4_cc(card)?;
    apdu::select_file(card, cc.file_id)?;

    let nlen = apdu::read_file(card, 0, 2)?;
    let &[hi, lo] = nlen.as_slice() else {
        return Err(format!("Invalid NLEN: {:02X?}", nlen));
    };
    let total = u16::from_be_bytes([hi, lo]) as usize;

    let chunk = cc.max_read.clamp(1, 0xF0) as usize;
    let mut message = Vec::with_capacity(total);
    while message.len() < total {
        let offset = 2 + message.len();
        let len = chunk.min(total - message.len());
        let data = apdu::read_file(card, offset as u16, len as u8)?;
        if data.is_empty() {
            return Err("Incomplete read: card ended before NDEF length reached".into());
        }
        message.extend_from_slice(&data);
    }
    message.truncate(total);
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_atr(standard: u8, name: u16) -> Vec<u8> {
        let [c0, c1] = name.to_be_bytes();
        vec![
            0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, standard, c0,
            c1, 0x00, 0x00, 0x00, 0x00, 0x6A,
        ]
    }

    #[test]
    fn classify_storage_cards() {
        assert_eq!(CardKind::classify(&storage_atr(0x03, 0x0001)), CardKind::MifareClassic);
        assert_eq!(CardKind::classify(&storage_atr(0x03, 0x0003)), CardKind::Ultralight);
        assert_eq!(CardKind::classify(&storage_atr(0x03, 0x0038)), CardKind::MifarePlus);
        assert_eq!(CardKind::classify(&storage_atr(0x03, 0x00F0)), CardKind::Iso14443A);
        assert_eq!(CardKind::classify(&storage_atr(0x11, 0x003B)), CardKind::Felica);
        assert_eq!(CardKind::classify(&storage_atr(0x0B, 0x0000)), CardKind::Iso15693);
    }

    #[test]
    fn classify_iso14443_4_cards() {
        assert_eq!(
            CardKind::classify(&[0x3B, 0x81, 0x80, 0x01, 0x80, 0x80]),
            CardKind::Desfire
        );
        let atr = [
            0x3B, 0x8A, 0x80, 0x01, 0x00, 0x31, 0xC1, 0x73, 0xC8, 0x40, 0x00, 0x00, 0x90, 0x00,
            0x90,
        ];
        assert_eq!(CardKind::classify(&atr), CardKind::Type4);
        assert_eq!(CardKind::classify(&[0x3B, 0x00]), CardKind::Unknown);
        assert_eq!(CardKind::classify(&[]), CardKind::Unknown);
    }

    #[test]
    fn handles_from_kind() {
        assert_eq!(
            CardKind::MifareClassic.technology_handle(vec![0xAA, 0xBB, 0xCC, 0xDD]),
            TechnologyHandle::Mifare {
                identifier: vec![0xAA, 0xBB, 0xCC, 0xDD],
                family: MifareFamily::Classic
            }
        );
        assert_eq!(
            CardKind::Felica.technology_handle(vec![1, 2, 3]),
            TechnologyHandle::Unrecognized
        );
        assert_eq!(
            CardKind::Felica.technology_handle(vec![1, 2, 3, 4, 5, 6, 7, 8]),
            TechnologyHandle::Felica {
                current_idm: [1, 2, 3, 4, 5, 6, 7, 8],
                current_system_code: None
            }
        );
    }

    #[test]
    fn iso15693_uid_is_msb_first() {
        let handle = CardKind::Iso15693
            .technology_handle(vec![0x78, 0x56, 0x34, 0x12, 0x50, 0x01, 0x07, 0xE0]);
        assert_eq!(
            handle,
            TechnologyHandle::Iso15693 {
                identifier: vec![0xE0, 0x07, 0x01, 0x50, 0x12, 0x34, 0x56, 0x78],
                ic_manufacturer_code: Some(0x07)
            }
        );
    }

    #[test]
    fn iso15693_manufacturer_needs_full_uid() {
        let handle = CardKind::Iso15693.technology_handle(vec![0x04, 0x07, 0x01]);
        assert_eq!(
            handle,
            TechnologyHandle::Iso15693 {
                identifier: vec![0x04, 0x07, 0x01],
                ic_manufacturer_code: None
            }
        );

        let handle = CardKind::Iso15693
            .technology_handle(vec![0xD0, 0x07, 0x01, 0x50, 0x12, 0x34, 0x56, 0x78]);
        assert!(matches!(
            handle,
            TechnologyHandle::Iso15693 {
                ic_manufacturer_code: None,
                ..
            }
        ));
    }

    #[test]
    fn type2_capability_container() {
        assert_eq!(
            parse_type2_cc(&[0xE1, 0x10, 0x3E, 0x00]),
            NdefStatus::ReadWrite { capacity: 496 }
        );
        assert_eq!(
            parse_type2_cc(&[0xE1, 0x10, 0x12, 0x0F]),
            NdefStatus::ReadOnly { capacity: 144 }
        );
        assert_eq!(parse_type2_cc(&[0xE1, 0x10, 0x12, 0x80]), NdefStatus::NotSupported);
        assert_eq!(parse_type2_cc(&[0x00, 0x00, 0x00, 0x00]), NdefStatus::NotSupported);
        assert_eq!(parse_type2_cc(&[0xE1]), NdefStatus::NotSupported);
    }

    #[test]
    fn type4_capability_container() {
        let cc = [
            0x00, 0x0F, 0x20, 0x00, 0x3B, 0x00, 0x34, 0x04, 0x06, 0xE1, 0x04, 0x00, 0x32, 0x00,
            0xFF,
        ];
        let parsed = Type4CapabilityContainer::parse(&cc).unwrap();
        assert_eq!(parsed.file_id, [0xE1, 0x04]);
        assert_eq!(parsed.max_read, 0x3B);
        assert_eq!(parsed.status(), NdefStatus::ReadOnly { capacity: 48 });

        assert!(Type4CapabilityContainer::parse(&cc[..10]).is_err());
    }

    #[test]
    fn mifare_data_blocks_skip_trailers() {
        let blocks = get_mifare_data_blocks();
        assert_eq!(blocks.len(), 45);
        assert_eq!(&blocks[..4], &[4, 5, 6, 8]);
        assert!(blocks.iter().all(|b| b % 4 != 3));
    }
}
