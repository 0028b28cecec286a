//! Payload codecs
//!
//! Converts between what a user types and the bytes that go on the wire:
//! - Hexadecimal (validated decode, uppercase encode)
//! - Text (UTF-8 with optional CR-LF terminator)

mod hex;
mod text;

pub use self::hex::{decode_hex, encode_hex, normalize_hex};
pub use text::{decode_text, encode_text, CRLF};

/// Hex payload validation errors
///
/// Checked in declaration order; the first failing check wins.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    /// Nothing left after stripping whitespace, separators and `0x` prefixes
    #[error("hex payload is empty")]
    EmptyPayload,

    /// Digits do not pair up into whole bytes
    #[error("hex payload has an odd number of digits ({0})")]
    OddLength(usize),

    /// Residual non-hex characters after normalization
    #[error("hex payload contains invalid characters")]
    InvalidCharacters,
}
