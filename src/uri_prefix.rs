// src/uri_prefix.rs

// NFC Forum URI RTD, identifier codes 0x00..=0x23
const URI_PREFIXES: [&str; 36] = [
    "",
    "http://www.",
    "https://www.",
    "http://",
    "https://",
    "tel:",
    "mailto:",
    "ftp://anonymous:anonymous@",
    "ftp://ftp.",
    "ftps://",
    "sftp://",
    "smb://",
    "nfs://",
    "ftp://",
    "dav://",
    "news:",
    "telnet://",
    "imap:",
    "rtsp://",
    "urn:",
    "pop:",
    "sip:",
    "sips:",
    "tftp:",
    "btspp://",
    "btl2cap://",
    "btgoep://",
    "tcpobex://",
    "irdaobex://",
    "file://",
    "urn:epc:id:",
    "urn:epc:tag:",
    "urn:epc:pat:",
    "urn:epc:raw:",
    "urn:epc:",
    "urn:nfc:",
];

/// Prefix for a URI record identifier code. Reserved codes (>= 0x24) map to
/// an empty prefix so the URI body is still shown on its own.
pub fn prefix_for(code: u8) -> &'static str {
    URI_PREFIXES.get(code as usize).copied().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes() {
        assert_eq!(prefix_for(0x00), "");
        assert_eq!(prefix_for(0x01), "http://www.");
        assert_eq!(prefix_for(0x03), "http://");
        assert_eq!(prefix_for(0x04), "https://");
        assert_eq!(prefix_for(0x06), "mailto:");
        assert_eq!(prefix_for(0x1D), "file://");
        assert_eq!(prefix_for(0x23), "urn:nfc:");
    }

    #[test]
    fn reserved_codes_have_no_prefix() {
        assert_eq!(prefix_for(0x24), "");
        assert_eq!(prefix_for(0x7F), "");
        assert_eq!(prefix_for(0xFF), "");
    }

    #[test]
    fn table_covers_every_defined_code() {
        assert_eq!(URI_PREFIXES.len(), 0x24);
        assert!((0x01..=0x23u8).all(|code| !prefix_for(code).is_empty()));
    }
}
