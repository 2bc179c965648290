use std::str::FromStr;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct HeaderConformance: u8 {
        const MISSING_COLON_VALUE = 0b0000_0001;
        const NON_CANONICAL_LINE_ENDINGS = 0b0000_0010;
        const NAME_ENDS_WITH_SPACE = 0b0000_0100;
        const LINE_TOO_LONG = 0b0000_1000;
        const EIGHT_BIT_CONTENT = 0b0001_0000;
        const LEADING_WHITESPACE = 0b0010_0000;
    }
}

impl FromStr for HeaderConformance {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        let mut result = Self::default();
        for ele in s.split('|') {
            if ele.is_empty() {
                continue;
            }
            match Self::from_name(ele) {
                Some(v) => {
                    result = result.union(v);
                }
                None => {
                    let mut possible: Vec<String> = Self::all()
                        .iter_names()
                        .map(|(name, _)| format!("'{name}'"))
                        .collect();
                    possible.sort();
                    let possible = possible.join(", ");
                    return Err(format!(
                        "invalid HeaderConformance flag '{ele}', possible values are {possible}"
                    ));
                }
            }
        }
        Ok(result)
    }
}

impl std::fmt::Display for HeaderConformance {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        names.sort();
        fmt.write_str(&names.join("|"))
    }
}

/// One logical header line: the header and its continuation lines,
/// without the final line ending.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHeaderLine<'a> {
    pub bytes: &'a [u8],
    pub conformance: HeaderConformance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderBlock<'a> {
    pub lines: Vec<RawHeaderLine<'a>>,
    /// Offset of the first byte following the blank line that
    /// terminates the header block
    pub body_offset: usize,
    pub overall_conformance: HeaderConformance,
}

const MAX_LINE_LEN: usize = 78;

/// Group a block of headers into logical lines. Continuation lines
/// (starting with space or tab) belong to the preceding header.
/// This never fails; problems are recorded as conformance flags and
/// left for the field splitter to judge.
pub fn split_header_block(block: &[u8]) -> HeaderBlock {
    let mut lines = vec![];
    let mut overall_conformance = HeaderConformance::default();
    let mut idx = 0;

    while idx < block.len() {
        // A blank line terminates the headers
        if block[idx] == b'\n' {
            overall_conformance.set(HeaderConformance::NON_CANONICAL_LINE_ENDINGS, true);
            idx += 1;
            break;
        }
        if block[idx] == b'\r' && block.get(idx + 1) == Some(&b'\n') {
            idx += 2;
            break;
        }

        let (line, next) = take_logical_line(&block[idx..], lines.is_empty());
        overall_conformance |= line.conformance;
        lines.push(line);
        debug_assert!(next > 0);
        idx += next;
    }

    HeaderBlock {
        lines,
        body_offset: idx,
        overall_conformance,
    }
}

fn take_logical_line(data: &[u8], is_first: bool) -> (RawHeaderLine, usize) {
    let mut conformance = HeaderConformance::default();
    if is_first && (data[0] == b' ' || data[0] == b'\t') {
        conformance.set(HeaderConformance::LEADING_WHITESPACE, true);
    }

    let mut saw_colon = false;
    let mut in_name = true;
    let mut line_start = 0;
    let mut end = data.len();
    let mut consumed = data.len();
    let mut idx = 0;

    while idx < data.len() {
        let c = data[idx];
        if in_name {
            if c == b':' {
                saw_colon = true;
                in_name = false;
            } else if c == b' ' || c == b'\t' {
                if idx > 0 {
                    conformance.set(HeaderConformance::NAME_ENDS_WITH_SPACE, true);
                }
            }
        }
        if !c.is_ascii() {
            conformance.set(HeaderConformance::EIGHT_BIT_CONTENT, true);
        }
        if c == b'\n' {
            let line_end = if idx > 0 && data[idx - 1] == b'\r' {
                idx - 1
            } else {
                conformance.set(HeaderConformance::NON_CANONICAL_LINE_ENDINGS, true);
                idx
            };
            if line_end - line_start > MAX_LINE_LEN {
                conformance.set(HeaderConformance::LINE_TOO_LONG, true);
            }
            in_name = false;
            match data.get(idx + 1) {
                Some(b' ') | Some(b'\t') => {
                    line_start = idx + 1;
                }
                _ => {
                    end = line_end;
                    consumed = idx + 1;
                    break;
                }
            }
        }
        idx += 1;
    }

    if idx >= data.len() {
        let tail = data.len() - line_start;
        if tail > MAX_LINE_LEN {
            conformance.set(HeaderConformance::LINE_TOO_LONG, true);
        }
    }

    if !saw_colon {
        conformance.set(HeaderConformance::MISSING_COLON_VALUE, true);
    }

    (
        RawHeaderLine {
            bytes: &data[..end],
            conformance,
        },
        consumed,
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn block_splitting() {
        let message = concat!(
            "Subject: hello\r\n",
            "\tthere\r\n",
            "From:  Someone <someone@example.com>\r\n",
            "\r\n",
            "I am the body"
        );
        let block = split_header_block(message.as_bytes());
        assert_eq!(&message[block.body_offset..], "I am the body");
        k9::assert_equal!(block.lines.len(), 2);
        k9::assert_equal!(block.lines[0].bytes, b"Subject: hello\r\n\tthere".as_slice());
        k9::assert_equal!(
            block.lines[1].bytes,
            b"From:  Someone <someone@example.com>".as_slice()
        );
        k9::assert_equal!(block.overall_conformance, HeaderConformance::default());
    }

    #[test]
    fn non_canonical_and_broken_lines() {
        let message = "Subject: hi\nbogus line\nX-Raw: café\n\nbody";
        let block = split_header_block(message.as_bytes());
        assert_eq!(&message[block.body_offset..], "body");
        k9::assert_equal!(block.lines.len(), 3);
        k9::assert_equal!(
            block.lines[1].conformance,
            HeaderConformance::MISSING_COLON_VALUE
                | HeaderConformance::NON_CANONICAL_LINE_ENDINGS
                | HeaderConformance::NAME_ENDS_WITH_SPACE
        );
        k9::assert_equal!(
            block.overall_conformance.to_string(),
            "EIGHT_BIT_CONTENT|MISSING_COLON_VALUE|NAME_ENDS_WITH_SPACE|NON_CANONICAL_LINE_ENDINGS"
        );
    }

    #[test]
    fn no_body() {
        let block = split_header_block(b"To: a@example.com");
        k9::assert_equal!(block.lines.len(), 1);
        k9::assert_equal!(block.body_offset, 17);
    }

    #[test]
    fn long_lines() {
        let long = format!("X-Long: {}\r\n\r\n", "a".repeat(100));
        let block = split_header_block(long.as_bytes());
        assert!(block
            .overall_conformance
            .contains(HeaderConformance::LINE_TOO_LONG));
    }

    #[test]
    fn conformance_string() {
        k9::assert_equal!(
            HeaderConformance::LINE_TOO_LONG.to_string(),
            "LINE_TOO_LONG"
        );
        k9::assert_equal!(
            HeaderConformance::from_str("").unwrap(),
            HeaderConformance::default()
        );
        k9::assert_equal!(
            HeaderConformance::from_str("LINE_TOO_LONG|MISSING_COLON_VALUE").unwrap(),
            HeaderConformance::LINE_TOO_LONG | HeaderConformance::MISSING_COLON_VALUE
        );
        k9::assert_equal!(
            HeaderConformance::from_str("LINE_TOO_LONG|spoon").unwrap_err(),
            "invalid HeaderConformance flag 'spoon', possible values are \
            'EIGHT_BIT_CONTENT', 'LEADING_WHITESPACE', 'LINE_TOO_LONG', \
            'MISSING_COLON_VALUE', 'NAME_ENDS_WITH_SPACE', 'NON_CANONICAL_LINE_ENDINGS'"
        );
    }
}
