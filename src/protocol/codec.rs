//! NMDC line framing and text escaping
//!
//! The hub stream is a sequence of `|`-terminated lines. A line starting with
//! `$` is a command (`$Name param`), anything else is public chat. Inside
//! parameters the two reserved bytes are written as HTML-style entities.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

// =============================================================================
// Constants
// =============================================================================

/// Line terminator on the wire
pub const SEPARATOR: u8 = b'|';

/// Leading byte of every command line
pub const COMMAND_PREFIX: char = '$';

/// Upper bound for a single line. `$NickList` on a large hub is the
/// biggest legitimate line we expect.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

const DOLLAR_ENTITY: &str = "&#36;";
const PIPE_ENTITY: &str = "&#124;";
const AMP_ENTITY: &str = "&amp;";

// =============================================================================
// Escaping
// =============================================================================

/// Escape `$` and `|` for use inside a parameter.
///
/// A literal `&` that would otherwise read back as one of the entities is
/// itself written as `&amp;`, so [`unescape`] restores the input exactly.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for (idx, ch) in text.char_indices() {
        match ch {
            '$' => out.push_str(DOLLAR_ENTITY),
            '|' => out.push_str(PIPE_ENTITY),
            '&' if starts_entity(&text[idx..]) => out.push_str(AMP_ENTITY),
            _ => out.push(ch),
        }
    }
    out
}

/// Reverse of [`escape`].
pub fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        if let Some(tail) = rest.strip_prefix(DOLLAR_ENTITY) {
            out.push('$');
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix(PIPE_ENTITY) {
            out.push('|');
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix(AMP_ENTITY) {
            out.push('&');
            rest = tail;
        } else {
            out.push('&');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

fn starts_entity(s: &str) -> bool {
    s.starts_with(DOLLAR_ENTITY) || s.starts_with(PIPE_ENTITY) || s.starts_with(AMP_ENTITY)
}

// =============================================================================
// Line splitting
// =============================================================================

/// One inbound line split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine<'a> {
    /// Public chat or a hub status line
    Chat(&'a str),
    /// `$name param`; `param` is empty when the command has none
    Command { name: &'a str, param: &'a str },
}

/// Split a raw line (without the trailing `|`) into command and parameter.
pub fn parse_line(raw: &str) -> ParsedLine<'_> {
    let Some(body) = raw.strip_prefix(COMMAND_PREFIX) else {
        return ParsedLine::Chat(raw);
    };
    match body.find(' ') {
        Some(pos) => ParsedLine::Command {
            name: &body[..pos],
            param: &body[pos + 1..],
        },
        None => ParsedLine::Command {
            name: body,
            param: "",
        },
    }
}

// =============================================================================
// Stream codec
// =============================================================================

/// Codec error: framing violation or I/O failure.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    LineTooLong,
    #[error("outgoing line contains a raw separator")]
    EmbeddedSeparator,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Frames the hub byte stream on `|`.
///
/// Decoded items are raw line bytes: the `$Lock` challenge and `$Key`
/// response are not text and must survive unchanged.
#[derive(Debug, Default)]
pub struct NmdcCodec;

impl Decoder for NmdcCodec {
    type Item = Vec<u8>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match src.iter().position(|b| *b == SEPARATOR) {
                Some(0) => {
                    // empty keep-alive line
                    src.advance(1);
                }
                Some(pos) => {
                    let line = src.split_to(pos);
                    src.advance(1);
                    return Ok(Some(line.to_vec()));
                }
                None => {
                    if src.len() > MAX_LINE_LENGTH {
                        return Err(CodecError::LineTooLong);
                    }
                    return Ok(None);
                }
            }
        }
    }
}

impl Encoder<Vec<u8>> for NmdcCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.contains(&SEPARATOR) {
            return Err(CodecError::EmbeddedSeparator);
        }
        dst.reserve(item.len() + 1);
        dst.put_slice(&item);
        dst.put_u8(SEPARATOR);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_reserved() {
        assert_eq!(escape("a$b|c"), "a&#36;b&#124;c");
        assert_eq!(escape("plain & simple"), "plain & simple");
        assert_eq!(escape("&#36;"), "&amp;#36;");
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("a&#36;b&#124;c&amp;d"), "a$b|c&d");
        assert_eq!(unescape("no entities"), "no entities");
        assert_eq!(unescape("&&#3"), "&&#3");
    }

    #[test]
    fn test_escape_roundtrip() {
        let samples = [
            "$", "|", "&", "$|&", "&$", "&|", "|&$|", "&amp;", "&#36;", "&#124;",
            "a&b$c|d", "$$||&&", "Текст $ и | символы &",
        ];
        for s in samples {
            let escaped = escape(s);
            assert!(!escaped.contains('$') && !escaped.contains('|'), "{}", escaped);
            assert_eq!(unescape(&escaped), s);
        }
    }

    #[test]
    fn test_parse_command_line() {
        assert_eq!(
            parse_line("$Hello bob"),
            ParsedLine::Command { name: "Hello", param: "bob" }
        );
        assert_eq!(
            parse_line("$GetPass"),
            ParsedLine::Command { name: "GetPass", param: "" }
        );
        assert_eq!(
            parse_line("$To: me From: you $<you> hi"),
            ParsedLine::Command { name: "To:", param: "me From: you $<you> hi" }
        );
    }

    #[test]
    fn test_parse_chat_line() {
        assert_eq!(parse_line("<bob> hello"), ParsedLine::Chat("<bob> hello"));
    }

    #[test]
    fn test_decode_lines() {
        let mut codec = NmdcCodec;
        let mut buf = BytesMut::from(&b"$Lock ABC Pk=x|$Hello bob||<bob> hi"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), b"$Lock ABC Pk=x".to_vec());
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), b"$Hello bob".to_vec());
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"|");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), b"<bob> hi".to_vec());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_rejects_oversized_line() {
        let mut codec = NmdcCodec;
        let mut buf = BytesMut::from(vec![b'A'; MAX_LINE_LENGTH + 1].as_slice());
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::LineTooLong)));
    }

    #[test]
    fn test_encode_appends_separator() {
        let mut codec = NmdcCodec;
        let mut buf = BytesMut::new();
        codec.encode(b"$GetNickList".to_vec(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"$GetNickList|");
    }

    #[test]
    fn test_encode_rejects_raw_separator() {
        let mut codec = NmdcCodec;
        let mut buf = BytesMut::new();
        let err = codec.encode(b"<me> a|b".to_vec(), &mut buf).unwrap_err();
        assert!(matches!(err, CodecError::EmbeddedSeparator));
        assert!(buf.is_empty());
    }
}
