//! Cheap checks on captured bodies before they are kept as text.

use mime_guess::mime::{self, Mime};

const PREFIX_BYTES: usize = 64;
const PREFIX_CODE_POINTS: usize = 16;

/// Guesses whether `buffer` holds human-readable text.
///
/// Only the first 64 bytes are inspected and at most 16 code points decoded.
/// A control character that is not whitespace, an invalid UTF-8 sequence, or
/// a sequence cut off by the end of the prefix all mean binary.
pub fn is_plaintext(buffer: &[u8]) -> bool {
    let mut prefix = &buffer[..buffer.len().min(PREFIX_BYTES)];
    for _ in 0..PREFIX_CODE_POINTS {
        if prefix.is_empty() {
            break;
        }
        let Some((c, width)) = next_code_point(prefix) else {
            return false;
        };
        if c.is_control() && !c.is_whitespace() {
            return false;
        }
        prefix = &prefix[width..];
    }
    true
}

fn next_code_point(bytes: &[u8]) -> Option<(char, usize)> {
    let width = match bytes[0] {
        0x00..=0x7F => 1,
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return None,
    };
    let encoded = bytes.get(..width)?;
    let c = std::str::from_utf8(encoded).ok()?.chars().next()?;
    Some((c, width))
}

/// Decodes `body` as text when it looks like plaintext in a supported charset.
///
/// The charset comes from the `Content-Type` value and defaults to UTF-8.
pub fn decode_text(body: &[u8], content_type: Option<&str>) -> Option<String> {
    let charset = charset_of(content_type)?;
    if !is_plaintext(body) {
        return None;
    }
    let text = match charset {
        Charset::Utf8 => String::from_utf8_lossy(body).into_owned(),
        Charset::Latin1 => body.iter().map(|&b| b as char).collect(),
    };
    Some(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Charset {
    Utf8,
    Latin1,
}

fn charset_of(content_type: Option<&str>) -> Option<Charset> {
    let Some(content_type) = content_type else {
        return Some(Charset::Utf8);
    };
    let Ok(parsed) = content_type.parse::<Mime>() else {
        debug!("Unparseable content type {:?}, assuming UTF-8", content_type);
        return Some(Charset::Utf8);
    };
    match parsed.get_param(mime::CHARSET) {
        None => Some(Charset::Utf8),
        Some(name) => match name.as_str().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" | "us-ascii" | "ascii" => Some(Charset::Utf8),
            "iso-8859-1" | "latin1" | "latin-1" => Some(Charset::Latin1),
            other => {
                debug!("Unsupported charset {}, skipping body capture", other);
                None
            }
        },
    }
}

/// Decodes `application/x-www-form-urlencoded` text: `+` becomes a space and
/// `%XX` escapes are expanded. Returns `None` on malformed escapes.
pub fn form_url_decode(text: &str) -> Option<String> {
    if !text.contains(['%', '+']) {
        return Some(text.to_string());
    }
    if !has_valid_escapes(text) {
        return None;
    }
    let spaced = text.replace('+', " ");
    let decoded = urlencoding::decode_binary(spaced.as_bytes());
    Some(String::from_utf8_lossy(&decoded).into_owned())
}

/// Every `%` must be followed by two hex digits.
fn has_valid_escapes(text: &str) -> bool {
    text.split('%').skip(1).all(|escape| {
        escape
            .as_bytes()
            .get(..2)
            .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
    })
}
