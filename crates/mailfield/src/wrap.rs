/// Lines longer than this are broken mid-word
const HARD_WIDTH: usize = 900;

/// Fold a header value so that, together with a prefix of `used`
/// columns (the `Name: ` portion), lines stay within `width` where
/// the words allow it. Folding only happens at whitespace, so
/// encoded words are never split.
pub fn fold(value: &str, used: usize, width: usize) -> String {
    fold_impl(value, used, width.saturating_sub(2), HARD_WIDTH)
}

/// Fill up to the soft width, allowing a word that is too long to
/// overflow the line, but breaking it once it reaches the hard width.
fn fold_impl(value: &str, used: usize, soft_width: usize, hard_width: usize) -> String {
    fn flush(line: &mut String, result: &mut String, first_line: &mut bool) {
        if !*first_line {
            result.push_str("\r\n\t");
        }
        result.push_str(line);
        line.clear();
        *first_line = false;
    }

    let mut result = String::new();
    let mut line = String::new();
    let mut first_line = true;

    for word in value.split_ascii_whitespace() {
        let budget = if first_line {
            soft_width.saturating_sub(used)
        } else {
            soft_width
        };
        if line.len() + word.len() < budget {
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
            continue;
        }

        if !line.is_empty() {
            flush(&mut line, &mut result, &mut first_line);
        }

        if word.len() <= hard_width {
            line.push_str(word);
        } else {
            for c in word.chars() {
                line.push(c);
                if line.len() >= hard_width {
                    flush(&mut line, &mut result, &mut first_line);
                }
            }
        }
    }

    if !line.is_empty() {
        flush(&mut line, &mut result, &mut first_line);
    }

    result
}
