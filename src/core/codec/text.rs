//! Text payload codec

/// Line terminator appended to text payloads on request
pub const CRLF: &str = "\r\n";

/// Encode a text message, optionally terminated with CR-LF
pub fn encode_text(message: &str, append_crlf: bool) -> String {
    if append_crlf {
        let mut text = String::with_capacity(message.len() + CRLF.len());
        text.push_str(message);
        text.push_str(CRLF);
        text
    } else {
        message.to_string()
    }
}

/// Decode received bytes as UTF-8, replacing invalid sequences
pub fn decode_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}
