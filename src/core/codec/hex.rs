//! Hexadecimal payload codec

use super::HexError;
use regex::Regex;
use std::sync::LazyLock;

/// Whole bytes of hex digits, nothing else
static HEX_BYTES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[0-9A-Fa-f]{2})+$").expect("static hex pattern compiles")
});

/// Strip a human-typed hex string down to bare digits.
///
/// Trims the ends, removes every `0x`/`0X` prefix and drops any character
/// outside `[0-9a-fA-F]`, so `"0x54, 0x45"`, `"54 45"` and `"54:45"` all
/// normalize to `"5445"`.
pub fn normalize_hex(raw: &str) -> String {
    raw.trim()
        .replace("0x", "")
        .replace("0X", "")
        .chars()
        .filter(char::is_ascii_hexdigit)
        .collect()
}

/// Decode a human-typed hex string into raw bytes
pub fn decode_hex(raw: &str) -> Result<Vec<u8>, HexError> {
    let digits = normalize_hex(raw);

    if digits.is_empty() {
        return Err(HexError::EmptyPayload);
    }
    if digits.len() % 2 != 0 {
        return Err(HexError::OddLength(digits.len()));
    }
    if !HEX_BYTES.is_match(&digits) {
        return Err(HexError::InvalidCharacters);
    }

    ::hex::decode(&digits).map_err(|_| HexError::InvalidCharacters)
}

/// Encode bytes as contiguous uppercase hex (e.g. `"54455354"`)
pub fn encode_hex(data: &[u8]) -> String {
    ::hex::encode_upper(data)
}
