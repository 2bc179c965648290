//! Encoding of address-like values that did not parse.
//!
//! Only the display name portions are encoded; angle addresses,
//! comments and bare addr-specs are left in place so that the
//! result is still recognizable as a list of addresses.
use crate::rfc2047;
use std::borrow::Cow;

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Quoted(&'a str),
    Angle(&'a str),
    Comment(&'a str),
}

impl<'a> Token<'a> {
    /// The text to encode, if this token is part of a display
    /// name that needs encoding
    fn encodable_text(&self) -> Option<Cow<'a, str>> {
        match self {
            Self::Word(w) if !w.is_ascii() && !w.contains('@') => Some(Cow::Borrowed(*w)),
            Self::Quoted(q) if !q.is_ascii() => Some(Cow::Owned(unquote(q))),
            _ => None,
        }
    }

    fn text(&self) -> &'a str {
        match self {
            Self::Word(s) | Self::Quoted(s) | Self::Angle(s) | Self::Comment(s) => *s,
        }
    }
}

/// Remove the surrounding quotes and backslash escapes
fn unquote(quoted: &str) -> String {
    let inner = quoted
        .strip_prefix('"')
        .map(|s| s.strip_suffix('"').unwrap_or(s))
        .unwrap_or(quoted);
    let mut result = String::with_capacity(inner.len());
    let mut escaped = false;
    for c in inner.chars() {
        if c == '\\' && !escaped {
            escaped = true;
            continue;
        }
        escaped = false;
        result.push(c);
    }
    result
}

/// Split at commas that are not inside a quoted string, comment
/// or angle address
fn split_addresses(value: &str) -> Vec<&str> {
    let mut result = vec![];
    let mut start = 0;
    let mut in_quote = false;
    let mut escaped = false;
    let mut comment_depth = 0usize;
    let mut in_angle = false;

    for (idx, c) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quote || comment_depth > 0 => escaped = true,
            '"' if comment_depth == 0 => in_quote = !in_quote,
            '(' if !in_quote => comment_depth += 1,
            ')' if !in_quote => comment_depth = comment_depth.saturating_sub(1),
            '<' if !in_quote && comment_depth == 0 => in_angle = true,
            '>' if !in_quote && comment_depth == 0 => in_angle = false,
            ',' if !in_quote && comment_depth == 0 && !in_angle => {
                result.push(&value[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    result.push(&value[start..]);

    result
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Find the end of a token that starts with an opening delimiter
fn delimited_end(text: &str, close: char, nests: bool, escapes: bool) -> usize {
    let open = text.chars().next();
    let mut depth = 0usize;
    let mut escaped = false;
    for (idx, c) in text.char_indices() {
        if idx == 0 {
            depth = 1;
            continue;
        }
        if escaped {
            escaped = false;
            continue;
        }
        if escapes && c == '\\' {
            escaped = true;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return idx + c.len_utf8();
            }
        } else if nests && Some(c) == open {
            depth += 1;
        }
    }
    text.len()
}

fn tokenize(address: &str) -> Vec<Token> {
    let mut tokens = vec![];
    let mut rest = address.trim_start();

    while !rest.is_empty() {
        let end = match rest.chars().next() {
            Some('"') => delimited_end(rest, '"', false, true),
            Some('(') => delimited_end(rest, ')', true, true),
            Some('<') => delimited_end(rest, '>', false, false),
            _ => rest
                .find(|c: char| c.is_whitespace() || matches!(c, '"' | '(' | '<'))
                .unwrap_or(rest.len()),
        };
        let (text, remainder) = rest.split_at(end);
        tokens.push(match text.chars().next() {
            Some('"') => Token::Quoted(text),
            Some('(') => Token::Comment(text),
            Some('<') => Token::Angle(text),
            _ => Token::Word(text),
        });
        rest = remainder.trim_start();
    }

    tokens
}

fn encode_one(address: &str, charset: &str) -> String {
    let mut pieces: Vec<String> = vec![];
    let mut run: Vec<Cow<str>> = vec![];

    fn flush(run: &mut Vec<Cow<str>>, pieces: &mut Vec<String>, charset: &str) {
        if !run.is_empty() {
            pieces.push(rfc2047::b_encode(&run.join(" "), charset));
            run.clear();
        }
    }

    for token in tokenize(address) {
        match token.encodable_text() {
            Some(text) => run.push(text),
            None => {
                flush(&mut run, &mut pieces, charset);
                pieces.push(token.text().to_string());
            }
        }
    }
    flush(&mut run, &mut pieces, charset);

    pieces.join(" ")
}

/// Encode the non-ASCII display name tokens of an address-like
/// value. Runs of adjacent non-ASCII words become a single sequence
/// of encoded words; ASCII tokens and addresses are kept as-is.
pub fn encode_address_value<'a>(value: &'a str, charset: &str) -> Cow<'a, str> {
    if value.is_ascii() {
        return Cow::Borrowed(value);
    }

    let encoded: Vec<String> = split_addresses(value)
        .into_iter()
        .map(|address| encode_one(address, charset))
        .collect();
    Cow::Owned(encoded.join(", "))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::grammar::Parser;

    #[test]
    fn ascii_passthrough() {
        let value = "Someone <someone@example.com>, other@example.com";
        assert!(matches!(
            encode_address_value(value, "UTF-8"),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn tokenizing() {
        k9::assert_equal!(
            tokenize("\"Müller, Hans\" (work) <hm@example.com>"),
            vec![
                Token::Quoted("\"Müller, Hans\""),
                Token::Comment("(work)"),
                Token::Angle("<hm@example.com>"),
            ]
        );
        k9::assert_equal!(
            split_addresses("\"a, b\" <a@x>, (c, d) c@y,, <e,f@z>"),
            vec!["\"a, b\" <a@x>", "(c, d) c@y", "<e,f@z>"]
        );
    }

    #[test]
    fn encodes_display_names_only() {
        k9::assert_equal!(
            encode_address_value("José Smith <js@example.com>", "UTF-8"),
            "=?UTF-8?B?Sm9zw6k=?= Smith <js@example.com>"
        );
        k9::assert_equal!(
            encode_address_value("josé@example.com", "UTF-8"),
            "josé@example.com"
        );

        let encoded = encode_address_value(
            "\"Müller, Hans\" <hm@example.com>,  Zoë Ängström <za@example.com>, plain@example.com",
            "UTF-8",
        );
        assert!(encoded.is_ascii(), "{encoded}");

        let list = Parser::parse_address_list_header(&encoded).unwrap();
        let names: Vec<Option<String>> = list
            .0
            .iter()
            .map(|a| match a {
                crate::grammar::Address::Mailbox(m) => m.name.clone(),
                crate::grammar::Address::Group { name, .. } => Some(name.clone()),
            })
            .collect();
        k9::assert_equal!(
            names,
            vec![
                Some("Müller, Hans".to_string()),
                Some("Zoë Ängström".to_string()),
                None
            ]
        );
    }
}
