use crate::{MailFieldError, Result};
use bstr::ByteSlice;
use std::borrow::Cow;

fn is_fold_byte(b: u8) -> bool {
    matches!(b, b'\r' | b'\n' | b' ' | b'\t')
}

/// Replace every run of CR, LF, SPACE and TAB with a single space.
/// Returns the input unchanged (borrowed) when it is already unfolded.
pub fn unfold_bytes(input: &[u8]) -> Cow<[u8]> {
    let needs_work = input.windows(2).any(|w| is_fold_byte(w[0]) && is_fold_byte(w[1]))
        || input
            .iter()
            .any(|&b| matches!(b, b'\r' | b'\n' | b'\t'));
    if !needs_work {
        return Cow::Borrowed(input);
    }

    let mut result = Vec::with_capacity(input.len());
    let mut in_run = false;
    for &b in input {
        if is_fold_byte(b) {
            if !in_run {
                result.push(b' ');
                in_run = true;
            }
        } else {
            result.push(b);
            in_run = false;
        }
    }
    Cow::Owned(result)
}

pub fn unfold(input: &str) -> Cow<str> {
    match unfold_bytes(input.as_bytes()) {
        Cow::Borrowed(_) => Cow::Borrowed(input),
        // Only ASCII whitespace was touched, so this is still UTF-8
        Cow::Owned(bytes) => Cow::Owned(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

fn is_valid_name(name: &[u8]) -> bool {
    !name.is_empty() && name.iter().all(|&b| (33..=126).contains(&b) && b != b':')
}

/// Split one logical header line into its name and raw value bytes.
/// The line is unfolded first, then split at the first colon and
/// both halves are trimmed.
pub fn split_field_bytes(line: &[u8]) -> Result<(String, Vec<u8>)> {
    let line = unfold_bytes(line);
    let colon = line.find_byte(b':').ok_or_else(|| {
        MailFieldError::HeaderParse(format!(
            "header line is not colon delimited: {:?}",
            line.to_str_lossy()
        ))
    })?;

    let name = line[..colon].trim();
    if !is_valid_name(name) {
        return Err(MailFieldError::HeaderParse(format!(
            "header name must be non-empty printable US-ASCII, found {:?}",
            name.to_str_lossy()
        )));
    }
    let value = line[colon + 1..].trim();

    // Validated as printable ASCII just above
    let name = name.to_str_lossy().into_owned();
    Ok((name, value.to_vec()))
}

pub fn split_field(line: &str) -> Result<(String, String)> {
    let (name, value) = split_field_bytes(line.as_bytes())?;
    // Splitting at an ASCII colon keeps both halves valid UTF-8
    Ok((name, String::from_utf8_lossy(&value).into_owned()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unfolding() {
        k9::assert_equal!(unfold("hello there"), "hello there");
        k9::assert_equal!(unfold("hello\r\n there"), "hello there");
        k9::assert_equal!(unfold("hello\r\n\t\tthere\r\n  again"), "hello there again");
        k9::assert_equal!(unfold("a  b\tc"), "a b c");
        assert!(matches!(unfold("already unfolded"), Cow::Borrowed(_)));
    }

    #[test]
    fn unfold_is_idempotent() {
        for s in [
            "",
            " ",
            "Subject: foo\r\n\tbar",
            "=?UTF-8?Q?a?=\r\n =?UTF-8?Q?b?=",
            "trailing \r\n",
        ] {
            let once = unfold(s).into_owned();
            k9::assert_equal!(unfold(&once), once.as_str());
        }
    }

    #[test]
    fn splitting() {
        k9::assert_equal!(
            split_field("Subject: hello there").unwrap(),
            ("Subject".to_string(), "hello there".to_string())
        );
        k9::assert_equal!(
            split_field("To :\r\n  someone@example.com\r\n").unwrap(),
            ("To".to_string(), "someone@example.com".to_string())
        );
        k9::assert_equal!(
            split_field("X-Time: 10:30:00").unwrap(),
            ("X-Time".to_string(), "10:30:00".to_string())
        );
        k9::assert_equal!(
            split_field("X-Empty:").unwrap(),
            ("X-Empty".to_string(), String::new())
        );
    }

    #[test]
    fn splitting_failures() {
        k9::snapshot!(
            split_field("no colon here"),
            r#"
Err(
    HeaderParse(
        "header line is not colon delimited: "no colon here"",
    ),
)
"#
        );
        assert!(split_field(": no name").is_err());
        assert!(split_field("bad name: value").is_err());
    }

    #[test]
    fn split_keeps_raw_bytes() {
        let (name, value) = split_field_bytes(b"Subject: caf\xe9").unwrap();
        k9::assert_equal!(name, "Subject");
        k9::assert_equal!(value, b"caf\xe9".to_vec());
    }
}
