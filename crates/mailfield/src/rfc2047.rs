//! RFC 2047 encoded words and RFC 2231 parameter values.
//!
//! Decoding never fails: anything that does not form a well formed,
//! decodable encoded word is passed through as literal text.
use crate::grammar::is_mime_token;
use charset::Charset;
use encoding_rs::Encoding;
use memchr::memmem;
use percent_encoding::{percent_encode, AsciiSet, CONTROLS};
use std::borrow::Cow;

/// RFC 2047 section 2: an encoded word may not be more than 75
/// characters long, including its delimiters
pub const MAX_ENCODED_WORD_LEN: usize = 75;

/// data_encoding::BASE64_MIME does not ignore embedded spaces,
/// which senders sometimes leave in folded B payloads
const BASE64_RFC2045: data_encoding::Encoding = data_encoding_macro::new_encoding! {
    symbols: "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/",
    padding: '=',
    ignore: " \r\n\t",
};

/// For payloads that were emitted without their trailing padding
const BASE64_RFC2045_NOPAD: data_encoding::Encoding = data_encoding_macro::new_encoding! {
    symbols: "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/",
    ignore: " \r\n\t",
    check_trailing_bits: false,
};

/// attribute-char from RFC 2231; everything else is %-escaped
const RFC2231_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'*')
    .add(b'\'')
    .add(b'%')
    .add(b'(')
    .add(b')')
    .add(b'<')
    .add(b'>')
    .add(b'@')
    .add(b',')
    .add(b';')
    .add(b':')
    .add(b'\\')
    .add(b'"')
    .add(b'/')
    .add(b'[')
    .add(b']')
    .add(b'?')
    .add(b'=');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordEncoding {
    /// Base64
    B,
    /// The quoted-printable variant from RFC 2047 section 4.2
    Q,
}

/// A single `=?charset?encoding?payload?=` token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedWord<'a> {
    /// The complete token text
    pub raw: &'a str,
    /// The charset label, without any RFC 2231 `*language` suffix
    pub charset: &'a str,
    pub encoding: WordEncoding,
    pub payload: &'a str,
}

impl<'a> EncodedWord<'a> {
    /// Recognize an encoded word at the start of `text`
    pub fn parse(text: &'a str) -> Option<Self> {
        let rest = text.strip_prefix("=?")?;

        let charset_end = rest.find('?')?;
        let charset_and_lang = &rest[..charset_end];
        if charset_and_lang.is_empty() || !charset_and_lang.bytes().all(|b| b.is_ascii_graphic())
        {
            return None;
        }
        let charset = charset_and_lang.split('*').next()?;
        if charset.is_empty() {
            return None;
        }

        let rest = &rest[charset_end + 1..];
        let encoding = match rest.as_bytes() {
            [b'B' | b'b', b'?', ..] => WordEncoding::B,
            [b'Q' | b'q', b'?', ..] => WordEncoding::Q,
            _ => return None,
        };

        let body = &rest[2..];
        let payload_end = body.find("?=")?;
        let payload = &body[..payload_end];
        if payload
            .bytes()
            .any(|b| b == b'?' || b.is_ascii_whitespace() || !b.is_ascii())
        {
            return None;
        }

        let len = 2 + charset_end + 1 + 2 + payload_end + 2;
        Some(Self {
            raw: &text[..len],
            charset,
            encoding,
            payload,
        })
    }

    /// Decode the payload into bytes in the word's charset.
    /// Returns None if the payload is malformed.
    pub fn decode_payload(&self) -> Option<Vec<u8>> {
        decode_payload(self.encoding, self.payload)
    }

    fn resolve_charset(&self) -> Option<Charset> {
        Charset::for_label_no_replacement(self.charset.as_bytes())
    }
}

fn decode_payload(encoding: WordEncoding, payload: &str) -> Option<Vec<u8>> {
    match encoding {
        WordEncoding::B => BASE64_RFC2045
            .decode(payload.as_bytes())
            .or_else(|_| {
                BASE64_RFC2045_NOPAD.decode(payload.trim_end_matches('=').as_bytes())
            })
            .ok(),
        // `_` is an encoded space; writing it as `=20` keeps a trailing
        // one from being stripped as transport padding
        WordEncoding::Q => quoted_printable::decode(
            payload.replace('_', "=20"),
            quoted_printable::ParseMode::Robust,
        )
        .ok(),
    }
}

/// Part of a header value, as produced by [collapse]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Text that is passed through unchanged
    Literal(&'a str),
    /// One or more adjacent encoded words that share a charset and
    /// encoding, with their payloads decoded and concatenated
    Encoded {
        charset: &'a str,
        encoding: WordEncoding,
        bytes: Vec<u8>,
    },
}

impl<'a> Segment<'a> {
    pub fn to_text(&self) -> Cow<'a, str> {
        match self {
            Self::Literal(s) => Cow::Borrowed(*s),
            Self::Encoded { charset, bytes, .. } => {
                match Charset::for_label_no_replacement(charset.as_bytes()) {
                    Some(cs) => Cow::Owned(cs.decode_without_bom_handling(bytes).0.into_owned()),
                    None => Cow::Owned(String::from_utf8_lossy(bytes).into_owned()),
                }
            }
        }
    }
}

fn is_folding_whitespace(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
}

/// Whitespace following an encoded word is dropped when another
/// encoded word comes next
fn push_gap<'a>(segments: &mut Vec<Segment<'a>>, gap: &'a str) {
    let follows_encoded = matches!(segments.last(), Some(Segment::Encoded { .. }));
    if !gap.is_empty() && !(follows_encoded && is_folding_whitespace(gap)) {
        segments.push(Segment::Literal(gap));
    }
}

/// Emit a run of adjacent words that share a charset and encoding.
/// Each entry pairs a word with the whitespace that preceded it.
/// The payloads are joined and decoded as one; when that fails, each
/// word is decoded on its own and the ones that cannot be decoded are
/// passed through as literal text.
fn flush_run<'a>(run: &mut Vec<(&'a str, EncodedWord<'a>)>, segments: &mut Vec<Segment<'a>>) {
    let Some((_, first)) = run.first() else {
        return;
    };
    let (charset, encoding) = (first.charset, first.encoding);

    let payload: String = run.iter().map(|(_, word)| word.payload).collect();
    if let Some(bytes) = decode_payload(encoding, &payload) {
        segments.push(Segment::Encoded {
            charset,
            encoding,
            bytes,
        });
        run.clear();
        return;
    }

    for (idx, (gap, word)) in run.drain(..).enumerate() {
        match word.decode_payload() {
            Some(bytes) => match segments.last_mut() {
                Some(Segment::Encoded { bytes: prior, .. }) if idx > 0 => {
                    prior.extend_from_slice(&bytes);
                }
                _ => {
                    push_gap(segments, gap);
                    segments.push(Segment::Encoded {
                        charset,
                        encoding,
                        bytes,
                    });
                }
            },
            None => {
                tracing::trace!("passing through undecodable encoded word {:?}", word.raw);
                if !gap.is_empty() {
                    segments.push(Segment::Literal(gap));
                }
                segments.push(Segment::Literal(word.raw));
            }
        }
    }
}

/// Scan `text` into literal and encoded segments.
///
/// Whitespace that separates two encoded words is not part of the
/// text (RFC 2047 section 6.2). Adjacent words with the same charset
/// and encoding have their payloads concatenated before decoding, so
/// that a character or a base64 quantum split across two words by
/// the sender decodes correctly.
pub fn collapse(text: &str) -> Vec<Segment> {
    let mut segments: Vec<Segment> = vec![];
    let mut run: Vec<(&str, EncodedWord)> = vec![];
    let mut literal_start = 0;
    let mut pos = 0;

    while let Some(offset) = memmem::find(&text.as_bytes()[pos..], b"=?") {
        let start = pos + offset;

        let word = match EncodedWord::parse(&text[start..]) {
            Some(word) if word.resolve_charset().is_some() => word,
            Some(word) => {
                tracing::trace!(
                    "passing through encoded word with unknown charset {:?}",
                    word.raw
                );
                pos = start + word.raw.len();
                continue;
            }
            None => {
                pos = start + 2;
                continue;
            }
        };

        let gap = &text[literal_start..start];
        let joins_run = run.last().is_some_and(|(_, prior)| {
            is_folding_whitespace(gap)
                && prior.encoding == word.encoding
                && prior.charset.eq_ignore_ascii_case(word.charset)
        });
        if !joins_run {
            flush_run(&mut run, &mut segments);
            push_gap(&mut segments, gap);
        }

        pos = start + word.raw.len();
        literal_start = pos;
        run.push((if joins_run { gap } else { "" }, word));
    }
    flush_run(&mut run, &mut segments);

    if literal_start < text.len() {
        segments.push(Segment::Literal(&text[literal_start..]));
    }

    segments
}

/// Decode all of the encoded words in `text`
pub fn decode(text: &str) -> Cow<str> {
    if memmem::find(text.as_bytes(), b"=?").is_none() {
        return Cow::Borrowed(text);
    }

    let mut result = String::with_capacity(text.len());
    for segment in collapse(text) {
        result.push_str(&segment.to_text());
    }
    Cow::Owned(result)
}

/// Pick the encoding used to produce bytes for `charset`, and the
/// label to advertise for it. Unknown charsets, and text that cannot
/// be represented in the requested charset, use UTF-8 instead.
fn output_encoding(text: &str, charset: &str) -> (&'static Encoding, String) {
    let utf8 = (encoding_rs::UTF_8, "UTF-8".to_string());
    let Some(requested) = Encoding::for_label(charset.as_bytes()) else {
        return utf8;
    };
    let encoding = requested.output_encoding();
    if encoding == encoding_rs::UTF_8 {
        return if requested == encoding_rs::UTF_8 {
            (encoding, charset.to_string())
        } else {
            utf8
        };
    }

    let (_, _, unmappable) = encoding.encode(text);
    if unmappable {
        return utf8;
    }

    let label = if encoding == requested {
        charset.to_string()
    } else {
        encoding.name().to_string()
    };
    (encoding, label)
}

fn encoded_char<'b>(encoding: &'static Encoding, c: char, buf: &'b mut [u8; 4]) -> Cow<'b, [u8]> {
    let (bytes, _, _) = encoding.encode(c.encode_utf8(buf));
    bytes
}

/// Encode `text` for use in a header. ASCII text is returned as-is;
/// anything else is B-encoded.
pub fn encode<'a>(text: &'a str, charset: &str) -> Cow<'a, str> {
    if text.is_ascii() {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(b_encode(text, charset))
    }
}

/// Produce a sequence of B encoded words, separated by spaces.
/// Each word holds a whole number of characters.
pub fn b_encode(text: &str, charset: &str) -> String {
    let (encoding, label) = output_encoding(text, charset);
    let overhead = "=?".len() + label.len() + "?B?".len() + "?=".len();
    let max_bytes = (MAX_ENCODED_WORD_LEN.saturating_sub(overhead) / 4 * 3).max(4);

    let mut words = vec![];
    let mut chunk: Vec<u8> = vec![];
    let mut buf = [0u8; 4];
    for c in text.chars() {
        let bytes = encoded_char(encoding, c, &mut buf);
        if !chunk.is_empty() && chunk.len() + bytes.len() > max_bytes {
            words.push(format!(
                "=?{label}?B?{}?=",
                data_encoding::BASE64.encode(&chunk)
            ));
            chunk.clear();
        }
        chunk.extend_from_slice(&bytes);
    }
    if !chunk.is_empty() {
        words.push(format!(
            "=?{label}?B?{}?=",
            data_encoding::BASE64.encode(&chunk)
        ));
    }

    words.join(" ")
}

/// Q-encode a single character. Characters outside of the safe set
/// for a phrase (RFC 2047 section 5(3)) are escaped as `=XX`.
fn q_encode_char(encoding: &'static Encoding, c: char) -> String {
    if c == ' ' {
        return "_".to_string();
    }
    let mut buf = [0u8; 4];
    let bytes = encoded_char(encoding, c, &mut buf);
    let qp = quoted_printable::encode_to_str(&*bytes).replace("=\r\n", "");

    let mut result = String::with_capacity(qp.len());
    for b in qp.bytes() {
        if b.is_ascii_alphanumeric() || b"!*+-/=".contains(&b) {
            result.push(b as char);
        } else {
            result.push_str(&format!("={b:02X}"));
        }
    }
    result
}

/// Produce a sequence of Q encoded words, separated by spaces
pub fn q_encode(text: &str, charset: &str) -> String {
    let (encoding, label) = output_encoding(text, charset);
    let overhead = "=?".len() + label.len() + "?Q?".len() + "?=".len();
    let max_payload = MAX_ENCODED_WORD_LEN.saturating_sub(overhead).max(12);

    let mut words = vec![];
    let mut payload = String::new();
    for c in text.chars() {
        let piece = q_encode_char(encoding, c);
        if !payload.is_empty() && payload.len() + piece.len() > max_payload {
            words.push(format!("=?{label}?Q?{payload}?="));
            payload.clear();
        }
        payload.push_str(&piece);
    }
    if !payload.is_empty() {
        words.push(format!("=?{label}?Q?{payload}?="));
    }

    words.join(" ")
}

/// How a MIME parameter value must be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Safe to emit as a bare token
    Token(String),
    /// ASCII that needs a quoted-string; already escaped
    Quoted(String),
    /// RFC 2231 `charset'language'%XX` form
    Extended(String),
}

impl ParamValue {
    pub fn to_parameter(&self, name: &str) -> String {
        match self {
            Self::Token(v) => format!("{name}={v}"),
            Self::Quoted(v) => format!("{name}=\"{v}\""),
            Self::Extended(v) => format!("{name}*={v}"),
        }
    }
}

/// Encode a parameter value per RFC 2231
pub fn param_encode(value: &str, charset: &str, language: &str) -> ParamValue {
    if !value.is_ascii() {
        return ParamValue::Extended(extended_value(value, charset, language));
    }

    if !value.is_empty() && value.chars().all(is_mime_token) {
        ParamValue::Token(value.to_string())
    } else {
        let mut quoted = String::with_capacity(value.len() + 2);
        for c in value.chars() {
            if c == '"' || c == '\\' {
                quoted.push('\\');
            }
            quoted.push(c);
        }
        ParamValue::Quoted(quoted)
    }
}

/// The `charset'language'%XX` portion of an RFC 2231 parameter
pub fn extended_value(value: &str, charset: &str, language: &str) -> String {
    let (encoding, label) = output_encoding(value, charset);
    let (bytes, _, _) = encoding.encode(value);
    format!(
        "{label}'{language}'{}",
        percent_encode(&bytes, RFC2231_ESCAPE)
    )
}
