// src/apdu.rs
use pcsc::Card;

fn transmit(card: &Card, apdu: &[u8]) -> Result<Vec<u8>, String> {
    let mut recv_buffer = [0u8; 258];
    let resp = card
        .transmit(apdu, &mut recv_buffer)
        .map_err(|e| format!("Transmit Error: {}", e))?;
    Ok(resp.to_vec())
}

// 0x90 0x00 is Success; returns the data without the status word
fn check_status(resp: Vec<u8>, what: &str) -> Result<Vec<u8>, String> {
    match resp.as_slice() {
        [data @ .., 0x90, 0x00] => Ok(data.to_vec()),
        _ => Err(format!("{} Failed: {:02X?}", what, resp)),
    }
}

// Get Data (UID): FF CA 00 00 00
pub fn get_uid(card: &Card) -> Result<Vec<u8>, String> {
    check_status(transmit(card, &[0xFF, 0xCA, 0x00, 0x00, 0x00])?, "Get UID")
}

// Load Authentication Keys into Reader Memory (Location 0x00 or 0x20)
// ACR122U standard: FF 82 00 key_num 06 [KEY]
pub fn load_key(card: &Card, key: &[u8; 6]) -> Result<(), String> {
    let mut apdu = vec![0xFF, 0x82, 0x00, 0x00, 0x06];
    apdu.extend_from_slice(key);
    check_status(transmit(card, &apdu)?, "Load Key").map(|_| ())
}

// Authenticate Block
// CMD: FF 86 00 00 05 01 00 Block KeyType KeyNumber
// KeyType: 0x60 (A), 0x61 (B)
pub fn authenticate(card: &Card, block: u8, key_type: u8) -> Result<(), String> {
    let apdu = [
        0xFF, 0x86, 0x00, 0x00, 0x05, 0x01, 0x00, block, key_type, 0x00,
    ];
    check_status(transmit(card, &apdu)?, "Auth").map(|_| ())
}

// Read: FF B0 00 Block Len
pub fn read_binary(card: &Card, block: u8, length: u8) -> Result<Vec<u8>, String> {
    check_status(transmit(card, &[0xFF, 0xB0, 0x00, block, length])?, "Read")
}

// ISO 7816-4 SELECT by AID: 00 A4 04 00 Lc [AID] 00
pub fn select_application(card: &Card, aid: &[u8]) -> Result<(), String> {
    let mut apdu = vec![0x00, 0xA4, 0x04, 0x00, aid.len() as u8];
    apdu.extend_from_slice(aid);
    apdu.push(0x00);
    check_status(transmit(card, &apdu)?, "Select Application").map(|_| ())
}

// ISO 7816-4 SELECT by file id: 00 A4 00 0C 02 [FID]
pub fn select_file(card: &Card, file_id: [u8; 2]) -> Result<(), String> {
    let apdu = [0x00, 0xA4, 0x00, 0x0C, 0x02, file_id[0], file_id[1]];
    check_status(transmit(card, &apdu)?, "Select File").map(|_| ())
}

// ISO 7816-4 READ BINARY: 00 B0 offset(2) Le
pub fn read_file(card: &Card, offset: u16, length: u8) -> Result<Vec<u8>, String> {
    let [hi, lo] = offset.to_be_bytes();
    check_status(transmit(card, &[0x00, 0xB0, hi, lo, length])?, "Read File")
}
