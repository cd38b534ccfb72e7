// src/ndef.rs
use std::fmt;
use std::str;

use crate::types::{DecodedRecord, RawRecord, TypeNameFormat};
use crate::uri_prefix;

pub const NO_READABLE_CONTENT: &str = "No readable content";
const RECORD_SEPARATOR: &str = "----------";

const TLV_NULL: u8 = 0x00;
const TLV_NDEF: u8 = 0x03;
const TLV_TERMINATOR: u8 = 0xFE;

/// Interpret one record. Specific well-known types are tried first; anything
/// that does not parse degrades to raw text, then to hex. Never fails.
pub fn decode_record(record: &RawRecord) -> DecodedRecord {
    if record.tnf == TypeNameFormat::WellKnown {
        let decoded = match record.record_type.as_slice() {
            b"U" => decode_uri(&record.payload),
            b"T" => decode_text(&record.payload),
            _ => None,
        };
        if let Some(decoded) = decoded {
            return decoded;
        }
    }

    match str::from_utf8(&record.payload) {
        Ok(text) if !text.is_empty() => DecodedRecord::RawText(text.to_string()),
        _ => DecodedRecord::Hex(hex::encode_upper(&record.payload)),
    }
}

// URI Record: [Prefix Code] + [URI body]
fn decode_uri(payload: &[u8]) -> Option<DecodedRecord> {
    let (&code, body) = payload.split_first()?;
    let body = str::from_utf8(body).ok()?;
    Some(DecodedRecord::Uri(format!(
        "{}{}",
        uri_prefix::prefix_for(code),
        body
    )))
}

// Text Record: [Status Byte] + [Lang Code] + [Text]
// Status byte: bit 7 = UTF-16 flag, bits 5-0 = lang length
fn decode_text(payload: &[u8]) -> Option<DecodedRecord> {
    let (&status_byte, rest) = payload.split_first()?;
    let lang_len = (status_byte & 0x3F) as usize;
    if rest.len() < lang_len {
        return None;
    }
    let (lang, body) = rest.split_at(lang_len);

    let language = str::from_utf8(lang).ok()?.to_string();
    let text = if status_byte & 0x80 != 0 {
        decode_utf16(body)?
    } else {
        str::from_utf8(body).ok()?.to_string()
    };
    Some(DecodedRecord::Text { language, text })
}

fn decode_utf16(body: &[u8]) -> Option<String> {
    if body.len() % 2 != 0 {
        return None;
    }
    let (little_endian, body) = match body {
        [0xFF, 0xFE, rest @ ..] => (true, rest),
        [0xFE, 0xFF, rest @ ..] => (false, rest),
        _ => (false, body),
    };
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16(&units).ok()
}

impl fmt::Display for DecodedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedRecord::Uri(uri) => write!(f, "URI: {}", uri),
            DecodedRecord::Text { language, text } => write!(f, "Text ({}): {}", language, text),
            DecodedRecord::RawText(text) => write!(f, "Content: {}", text),
            DecodedRecord::Hex(hex) => write!(f, "Data (HEX): {}", hex),
        }
    }
}

/// Render a whole NDEF message, record by record, in message order.
pub fn render_message(records: &[RawRecord]) -> String {
    let mut out = String::new();
    for record in records {
        let type_name = match str::from_utf8(&record.record_type) {
            Ok(name) if !name.is_empty() => name,
            _ => "Unknown",
        };
        out.push_str(&format!("Type: {}\n", type_name));
        out.push_str(&format!("{}\n", decode_record(record)));
        out.push_str(RECORD_SEPARATOR);
        out.push('\n');
    }

    if out.is_empty() {
        NO_READABLE_CONTENT.to_string()
    } else {
        out
    }
}

/// Locate the first NDEF Message TLV (0x03) in raw tag memory and return its
/// value. NULL TLVs are skipped, other TLVs are stepped over by their length.
/// `None` means the memory holds no NDEF TLV before the terminator.
pub fn extract_tlv_message(memory: &[u8]) -> Result<Option<&[u8]>, String> {
    let mut cursor = 0;

    while cursor < memory.len() {
        let tag = memory[cursor];
        cursor += 1;

        match tag {
            TLV_NULL => continue,
            TLV_TERMINATOR => break,
            _ => {}
        }

        let len = match memory.get(cursor) {
            Some(0xFF) => {
                let bytes = memory
                    .get(cursor + 1..cursor + 3)
                    .ok_or("Invalid TLV length")?;
                cursor += 3;
                ((bytes[0] as usize) << 8) | (bytes[1] as usize)
            }
            Some(&len) => {
                cursor += 1;
                len as usize
            }
            None => return Err("Invalid buffer length".to_string()),
        };

        if tag == TLV_NDEF {
            return memory
                .get(cursor..cursor + len)
                .map(Some)
                .ok_or_else(|| "Incomplete data".to_string());
        }
        cursor += len;
    }

    Ok(None)
}

fn take<'a>(data: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8], String> {
    let slice = data
        .get(*cursor..*cursor + len)
        .ok_or_else(|| format!("Truncated record at offset {}", *cursor))?;
    *cursor += len;
    Ok(slice)
}

/// Split an NDEF message into its records. Stops after the record carrying
/// the Message End flag.
pub fn parse_ndef_records(data: &[u8]) -> Result<Vec<RawRecord>, String> {
    let mut records = Vec::new();
    let mut cursor = 0;

    while cursor < data.len() {
        let header = take(data, &mut cursor, 1)?[0];
        let tnf = TypeNameFormat::from_code(header); // Last 3 bits
        let is_short_record = (header & 0x10) != 0; // SR flag
        let has_id = (header & 0x08) != 0; // IL flag
        let is_me = (header & 0x40) != 0; // Message End flag

        // 1. Get Type Length
        let type_len = take(data, &mut cursor, 1)?[0] as usize;

        // 2. Get Payload Length (1 byte for Short Record, 4 bytes otherwise)
        let payload_len = if is_short_record {
            take(data, &mut cursor, 1)?[0] as usize
        } else {
            let len = take(data, &mut cursor, 4)?;
            u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize
        };

        // 3. Get ID Length (if present)
        let id_len = if has_id {
            take(data, &mut cursor, 1)?[0] as usize
        } else {
            0
        };

        let record_type = take(data, &mut cursor, type_len)?.to_vec();
        let id = if has_id {
            Some(take(data, &mut cursor, id_len)?.to_vec())
        } else {
            None
        };
        let payload = take(data, &mut cursor, payload_len)?.to_vec();

        records.push(RawRecord {
            tnf,
            record_type,
            payload,
            id,
        });

        if is_me {
            break;
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn well_known(record_type: &[u8], payload: &[u8]) -> RawRecord {
        RawRecord::new(TypeNameFormat::WellKnown, record_type, payload)
    }

    // Short record: MB/ME as requested, SR=1, IL=0
    fn short_record(tnf: u8, record_type: &[u8], payload: &[u8], mb: bool, me: bool) -> Vec<u8> {
        let mut header = tnf | 0x10;
        if mb {
            header |= 0x80;
        }
        if me {
            header |= 0x40;
        }
        let mut record = vec![header, record_type.len() as u8, payload.len() as u8];
        record.extend_from_slice(record_type);
        record.extend_from_slice(payload);
        record
    }

    #[test]
    fn uri_record_with_prefix() {
        let mut payload = vec![0x04];
        payload.extend_from_slice(b"example.com");
        assert_eq!(
            decode_record(&well_known(b"U", &payload)),
            DecodedRecord::Uri("https://example.com".into())
        );
    }

    #[test]
    fn uri_record_with_reserved_prefix_keeps_body() {
        let mut payload = vec![0x30];
        payload.extend_from_slice(b"example.com");
        assert_eq!(
            decode_record(&well_known(b"U", &payload)),
            DecodedRecord::Uri("example.com".into())
        );
    }

    #[test]
    fn uri_record_with_bad_utf8_degrades_to_hex() {
        let record = well_known(b"U", &[0x04, 0xC3, 0x28]);
        assert_eq!(decode_record(&record), DecodedRecord::Hex("04C328".into()));
    }

    #[test]
    fn empty_uri_payload_degrades_to_empty_hex() {
        assert_eq!(
            decode_record(&well_known(b"U", &[])),
            DecodedRecord::Hex(String::new())
        );
    }

    #[test]
    fn text_record() {
        let mut payload = vec![0x02];
        payload.extend_from_slice(b"enHello");
        assert_eq!(
            decode_record(&well_known(b"T", &payload)),
            DecodedRecord::Text {
                language: "en".into(),
                text: "Hello".into()
            }
        );
    }

    #[test]
    fn text_record_ignores_reserved_status_bit() {
        let mut payload = vec![0x40 | 0x05];
        payload.extend_from_slice("en-USGrüße".as_bytes());
        assert_eq!(
            decode_record(&well_known(b"T", &payload)),
            DecodedRecord::Text {
                language: "en-US".into(),
                text: "Grüße".into()
            }
        );
    }

    #[test]
    fn utf16_text_record() {
        let mut payload = vec![0x80 | 0x02];
        payload.extend_from_slice(b"de");
        payload.extend_from_slice(&[0xFE, 0xFF, 0x00, 0x48, 0x00, 0x69]);
        assert_eq!(
            decode_record(&well_known(b"T", &payload)),
            DecodedRecord::Text {
                language: "de".into(),
                text: "Hi".into()
            }
        );
    }

    #[test]
    fn utf16_text_record_with_odd_body_degrades() {
        // status byte 0x82 is not valid UTF-8, so the whole payload ends up as hex
        let record = well_known(b"T", &[0x82, b'e', b'n', 0x00, 0x48, 0x00]);
        assert_eq!(decode_record(&record), DecodedRecord::Hex("82656E004800".into()));

        // bit 7 plus the reserved bit 6 happens to form a valid UTF-8 lead byte
        let record = well_known(b"T", &[0xC2, 0xA9, b'e', b'n', b'x']);
        assert_eq!(decode_record(&record), DecodedRecord::RawText("\u{A9}enx".into()));
    }

    #[test]
    fn short_text_record_falls_back_to_raw_text() {
        // claims a 10-byte language code but only carries two bytes
        let record = well_known(b"T", &[0x0A, b'e', b'n']);
        assert_eq!(
            decode_record(&record),
            DecodedRecord::RawText("\nen".into())
        );
    }

    #[test]
    fn text_record_with_bad_body_falls_back_to_hex() {
        let record = well_known(b"T", &[0x02, b'e', b'n', 0xFF]);
        assert_eq!(decode_record(&record), DecodedRecord::Hex("02656EFF".into()));
    }

    #[test]
    fn media_record_is_raw_text() {
        let record = RawRecord::new(TypeNameFormat::Media, b"text/plain", b"plain body");
        assert_eq!(decode_record(&record), DecodedRecord::RawText("plain body".into()));
    }

    #[test]
    fn binary_payload_is_hex() {
        let record =
            RawRecord::new(TypeNameFormat::ExternalType, b"a.b:c", &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(decode_record(&record), DecodedRecord::Hex("DEADBEEF".into()));
    }

    #[test]
    fn short_utf8_sequence_is_raw_text() {
        // DE AD is a complete two-byte sequence (U+07AD)
        let record = RawRecord::new(TypeNameFormat::ExternalType, b"a.b:c", &[0xDE, 0xAD]);
        assert_eq!(decode_record(&record), DecodedRecord::RawText("\u{7AD}".into()));
    }

    #[test]
    fn decoding_is_repeatable() {
        let record = well_known(b"U", b"\x03shop.example");
        assert_eq!(decode_record(&record), decode_record(&record));
    }

    #[test]
    fn render_lists_records_in_order() {
        let records = vec![
            well_known(b"U", b"\x03shop.example"),
            well_known(b"T", b"\x02enHello"),
            RawRecord::new(TypeNameFormat::Unknown, &[], &[0x00, 0xFF]),
        ];
        let rendered = render_message(&records);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Type: U",
                "URI: http://shop.example",
                RECORD_SEPARATOR,
                "Type: T",
                "Text (en): Hello",
                RECORD_SEPARATOR,
                "Type: Unknown",
                "Data (HEX): 00FF",
                RECORD_SEPARATOR,
            ]
        );
    }

    #[test]
    fn render_empty_message_is_sentinel() {
        assert_eq!(render_message(&[]), NO_READABLE_CONTENT);
    }

    #[test]
    fn tlv_skips_null_and_foreign_blocks() {
        // NULL, Lock Control TLV (len 3), NDEF TLV (len 2), Terminator
        let memory = [0x00, 0x00, 0x01, 0x03, 0xA0, 0x10, 0x44, 0x03, 0x02, 0xD0, 0x00, 0xFE];
        assert_eq!(extract_tlv_message(&memory).unwrap(), Some(&[0xD0, 0x00][..]));
    }

    #[test]
    fn tlv_three_byte_length() {
        let mut memory = vec![0x03, 0xFF, 0x01, 0x00];
        memory.extend(std::iter::repeat(0xAB).take(256));
        memory.push(0xFE);
        assert_eq!(extract_tlv_message(&memory).unwrap().map(<[u8]>::len), Some(256));
    }

    #[test]
    fn tlv_without_ndef_block() {
        assert_eq!(extract_tlv_message(&[]).unwrap(), None);
        assert_eq!(extract_tlv_message(&[0x00, 0xFE, 0x03, 0x01, 0xD0]).unwrap(), None);
        assert_eq!(extract_tlv_message(&[0x03, 0x00, 0xFE]).unwrap(), Some(&[][..]));
    }

    #[test]
    fn tlv_errors() {
        assert_eq!(
            extract_tlv_message(&[0x03, 0x05, 0xD1]).unwrap_err(),
            "Incomplete data"
        );
        assert!(extract_tlv_message(&[0x03]).is_err());
    }

    #[test]
    fn parse_two_short_records() {
        let mut message = short_record(0x01, b"U", b"\x04example.com", true, false);
        message.extend(short_record(0x01, b"T", b"\x02enHi", false, true));
        // trailing bytes after ME are ignored
        message.extend([0x00, 0x00]);

        let records = parse_ndef_records(&message).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tnf, TypeNameFormat::WellKnown);
        assert_eq!(records[0].record_type, b"U");
        assert_eq!(records[0].payload, b"\x04example.com");
        assert_eq!(records[1].payload, b"\x02enHi");
        assert_eq!(records[1].id, None);
    }

    #[test]
    fn parse_long_record_with_id() {
        // MB|ME|IL, TNF=2, type len 4, payload len 3 (4 bytes), id len 1
        let mut message = vec![0xC0 | 0x08 | 0x02, 0x04, 0x00, 0x00, 0x00, 0x03, 0x01];
        message.extend_from_slice(b"a/bc");
        message.push(b'7');
        message.extend_from_slice(b"xyz");

        let records = parse_ndef_records(&message).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tnf, TypeNameFormat::Media);
        assert_eq!(records[0].record_type, b"a/bc");
        assert_eq!(records[0].id.as_deref(), Some(&b"7"[..]));
        assert_eq!(records[0].payload, b"xyz");
    }

    #[test]
    fn parse_truncated_record_is_error() {
        let mut message = short_record(0x01, b"U", b"\x04example.com", true, true);
        message.truncate(message.len() - 3);
        assert!(parse_ndef_records(&message).is_err());
        assert!(parse_ndef_records(&[0xD1]).is_err());
    }
}
