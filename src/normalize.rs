// src/normalize.rs
// Turns raw container log bytes into a clean result string

/// Control bytes left behind by the runtime's stream multiplexing headers
const STRIPPED_BYTES: [char; 3] = ['\u{1}', '\u{0}', '\u{5}'];

/// Decode, drop multiplexing control bytes, then trim surrounding whitespace.
///
/// Invalid UTF-8 is replaced rather than rejected.
pub fn normalize(raw: &[u8]) -> String {
    let decoded = String::from_utf8_lossy(raw);
    let cleaned: String = decoded.chars().filter(|c| !STRIPPED_BYTES.contains(c)).collect();
    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trims_trailing_newline() {
        assert_eq!(normalize(b"hello\n"), "hello");
    }

    #[test]
    fn test_strips_multiplex_header_bytes() {
        // stdout frame header: stream=1, three zero bytes, then a length whose low byte is 5
        let raw = b"\x01\x00\x00\x00\x00\x00\x00\x05hello\n";
        assert_eq!(normalize(raw), "hello");
    }

    #[test]
    fn test_whitespace_behind_control_bytes_is_trimmed() {
        assert_eq!(normalize(b"\x01  hi  \x00\n"), "hi");
    }

    #[test]
    fn test_keeps_inner_whitespace_and_other_controls() {
        assert_eq!(normalize(b" a\tb\x02c "), "a\tb\x02c");
    }

    #[test]
    fn test_deterministic_and_clean() {
        let samples: [&[u8]; 4] = [b"", b"\x00\x01\x05", b"  \r\n ok \x05\r\n", &[0xff, b'x', 0x00]];
        for raw in samples {
            let first = normalize(raw);
            assert_eq!(first, normalize(raw));
            assert!(!first.contains(&STRIPPED_BYTES[..]));
            assert_eq!(first, first.trim());
        }
    }
}
