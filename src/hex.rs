//! Conversion between hexadecimal strings and byte arrays, as used for EPCs
//! and tag memory contents.

use failure::Fail;

#[derive(Debug, Clone, PartialEq, Eq, Fail)]
pub enum HexError {
    #[fail(display = "hex string has an odd number of digits")]
    OddLength,
    #[fail(display = "invalid hex digit {:?} at position {}", digit, index)]
    InvalidDigit { index: usize, digit: char },
    #[fail(display = "{} bytes do not fit into a buffer of {}", needed, capacity)]
    BufferTooSmall { needed: usize, capacity: usize },
}

fn strip_prefix(hex: &str) -> &str {
    if hex.starts_with("0x") || hex.starts_with("0X") {
        &hex[2..]
    } else {
        hex
    }
}

fn digit_error(e: ::hex::FromHexError, offset: usize) -> HexError {
    match e {
        ::hex::FromHexError::InvalidHexCharacter { c, index } => HexError::InvalidDigit {
            index: offset + index,
            digit: c,
        },
        ::hex::FromHexError::OddLength | ::hex::FromHexError::InvalidStringLength => HexError::OddLength,
    }
}

/// Convert a hexadecimal string into `bytes`, returning the number of bytes
/// written. A leading `0x` is ignored.
///
/// The input is decoded in full before anything is written, so on error (and
/// for an empty string) `bytes` is left untouched.
pub fn hex_to_bytes(hex: &str, bytes: &mut [u8]) -> Result<usize, HexError> {
    let digits = strip_prefix(hex);
    if digits.len() % 2 != 0 {
        return Err(HexError::OddLength);
    }
    let needed = digits.len() / 2;
    if needed > bytes.len() {
        return Err(HexError::BufferTooSmall { needed, capacity: bytes.len() });
    }
    let decoded = ::hex::decode(digits).map_err(|e| digit_error(e, hex.len() - digits.len()))?;
    bytes[..needed].copy_from_slice(&decoded);
    Ok(needed)
}

/// Allocating form of [`hex_to_bytes`].
pub fn hex_to_vec(hex: &str) -> Result<Vec<u8>, HexError> {
    let digits = strip_prefix(hex);
    if digits.len() % 2 != 0 {
        return Err(HexError::OddLength);
    }
    ::hex::decode(digits).map_err(|e| digit_error(e, hex.len() - digits.len()))
}

/// Upper-case hexadecimal rendering of `bytes`, with no prefix.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    ::hex::encode_upper(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff\
                        00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff\
                        00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff\
                        00112233445566778899aabbccddeeff00112233445566778899aabb";

    #[test]
    fn test_empty_leaves_buffer() {
        let mut buf = [0xA5u8; 4];
        assert_eq!(hex_to_bytes("", &mut buf), Ok(0));
        assert_eq!(buf, [0xA5; 4]);
        assert_eq!(hex_to_bytes("0x", &mut buf), Ok(0));
        assert_eq!(buf, [0xA5; 4]);
    }

    #[test]
    fn test_empty_bytes_to_hex() {
        assert_eq!(bytes_to_hex(&[]), "");
    }

    #[test]
    fn test_specific_values() {
        let mut buf = [0u8; 8];
        assert_eq!(hex_to_bytes("00", &mut buf), Ok(1));
        assert_eq!(buf[0], 0x00);
        assert_eq!(hex_to_bytes("0000", &mut buf), Ok(2));
        assert_eq!(&buf[..2], &[0x00, 0x00]);
        assert_eq!(hex_to_bytes("ffff", &mut buf), Ok(2));
        assert_eq!(&buf[..2], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_prefix_is_ignored() {
        assert_eq!(hex_to_vec("0xffff"), hex_to_vec("ffff"));
        assert_eq!(hex_to_vec("0XE2003412"), hex_to_vec("E2003412"));
    }

    #[test]
    fn test_long_string() {
        let mut buf = [0u8; 124];
        assert_eq!(hex_to_bytes(LONG, &mut buf), Ok(124));
        assert_eq!(&buf[..4], &[0x00, 0x11, 0x22, 0x33]);
        assert_eq!(buf[123], 0xBB);
        assert_eq!(bytes_to_hex(&buf), LONG.to_uppercase());
    }

    #[test]
    fn test_round_trip_is_case_normalized() {
        let s = "e2801160600002054cc2096f";
        let bytes = hex_to_vec(s).unwrap();
        assert_eq!(bytes_to_hex(&bytes), s.to_uppercase());
    }

    #[test]
    fn test_ignored_length() {
        // callers that don't want the count still get the bytes
        let mut buf = [0u8; 2];
        let _ = hex_to_bytes("beef", &mut buf);
        assert_eq!(buf, [0xBE, 0xEF]);
    }

    #[test]
    fn test_errors() {
        let mut buf = [0x11u8; 2];
        assert_eq!(hex_to_bytes("abc", &mut buf), Err(HexError::OddLength));
        assert_eq!(
            hex_to_bytes("0x12zz", &mut buf),
            Err(HexError::InvalidDigit { index: 4, digit: 'z' })
        );
        assert_eq!(
            hex_to_bytes("001122", &mut buf),
            Err(HexError::BufferTooSmall { needed: 3, capacity: 2 })
        );
        assert_eq!(buf, [0x11, 0x11]);
        assert_eq!(
            hex_to_vec("E2g0"),
            Err(HexError::InvalidDigit { index: 2, digit: 'g' })
        );
    }
}
