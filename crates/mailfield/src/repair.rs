//! Repair of header values that contain raw 8-bit text.
//!
//! The source charset is guessed, the bytes are transcoded to UTF-8
//! and filename parameters are rewritten into an encoded form that
//! is valid on the wire.
use crate::rfc2047;
use bstr::ByteSlice;
use charset::Charset;
use percent_encoding::percent_decode;
use std::borrow::Cow;
use std::sync::LazyLock;

/// Guesses the charset of a sequence of bytes
pub trait CharsetDetector: Send + Sync {
    /// Return the label of the most likely charset. Implementations
    /// return `"UTF-8"` when they cannot decide.
    fn detect(&self, bytes: &[u8]) -> String;
}

/// Statistical detection using charset-normalizer
#[derive(Debug, Default, Clone, Copy)]
pub struct NormalizerDetector;

impl CharsetDetector for NormalizerDetector {
    fn detect(&self, bytes: &[u8]) -> String {
        let bytes = bytes.to_vec();
        let label = charset_normalizer_rs::from_bytes(&bytes, None)
            .get_best()
            .map(|best| best.encoding().to_string())
            .filter(|label| Charset::for_label_no_replacement(label.as_bytes()).is_some())
            .unwrap_or_else(|| "UTF-8".to_string());
        tracing::trace!("detected charset {label} for {:?}", bytes.as_bstr());
        label
    }
}

static DETECTOR: LazyLock<Box<dyn CharsetDetector>> =
    LazyLock::new(|| Box::new(NormalizerDetector));

/// The process-wide detector used when parsing
pub fn default_detector() -> &'static dyn CharsetDetector {
    DETECTOR.as_ref()
}

/// A value is clean when it is already valid UTF-8
pub fn is_clean(bytes: &[u8]) -> bool {
    std::str::from_utf8(bytes).is_ok()
}

/// Transcode `bytes` from their detected charset into UTF-8.
/// Anything that cannot be decoded becomes `_`.
pub fn transcode_lossy(bytes: &[u8], detector: &dyn CharsetDetector) -> String {
    let label = detector.detect(bytes);
    let charset = Charset::for_label_no_replacement(label.as_bytes())
        .unwrap_or_else(|| Charset::for_encoding(encoding_rs::UTF_8));
    let (text, _malformed) = charset.decode_without_bom_handling(bytes);
    text.replace('\u{fffd}', "_")
}

fn force_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '_' })
        .collect()
}

/// Split a parameterized value at semicolons that are not inside
/// a quoted string
fn split_parameters(value: &[u8]) -> Vec<&[u8]> {
    let mut result = vec![];
    let mut start = 0;
    let mut in_quote = false;
    let mut escaped = false;

    for (idx, &b) in value.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_quote => escaped = true,
            b'"' => in_quote = !in_quote,
            b';' if !in_quote => {
                result.push(value[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    result.push(value[start..].trim());

    result.into_iter().filter(|p| !p.is_empty()).collect()
}

/// Split `key=value`, removing any quotes from the value
fn key_value(param: &[u8]) -> Option<(String, Vec<u8>)> {
    let eq = param.find_byte(b'=')?;
    let key = param[..eq].trim().to_str_lossy().into_owned();
    let value = param[eq + 1..].trim();

    let value = match value.strip_prefix(b"\"") {
        Some(inner) => {
            let inner = inner.strip_suffix(b"\"").unwrap_or(inner);
            let mut unescaped = Vec::with_capacity(inner.len());
            let mut escaped = false;
            for &b in inner {
                if b == b'\\' && !escaped {
                    escaped = true;
                    continue;
                }
                escaped = false;
                unescaped.push(b);
            }
            unescaped
        }
        None => value.to_vec(),
    };

    Some((key, value))
}

/// The parameter name without the RFC 2231 extended marker
fn base_name(key: &str) -> &str {
    key.trim_end_matches('*')
}

fn has_parameter(value: &[u8], names: &[&str]) -> bool {
    split_parameters(value).into_iter().skip(1).any(|param| {
        key_value(param)
            .map(|(key, _)| names.iter().any(|n| base_name(&key).eq_ignore_ascii_case(n)))
            .unwrap_or(false)
    })
}

/// The parameters of the named header that hold a file name
fn filename_parameters(name: &str) -> &'static [&'static str] {
    if name.eq_ignore_ascii_case("Content-Disposition") {
        &["filename"]
    } else if name.eq_ignore_ascii_case("Content-Type") {
        &["name", "filename"]
    } else {
        &[]
    }
}

/// Whether the value of the named header holds raw 8-bit text and a
/// file name parameter, so that its parameters are rewritten rather
/// than just transcoded. Only Content-Disposition and Content-Type
/// have file name parameters.
pub fn needs_repair(name: &str, value: &[u8]) -> bool {
    let names = filename_parameters(name);
    !names.is_empty() && !is_clean(value) && has_parameter(value, names)
}

/// Split an RFC 2231 `charset'language'value`
fn split_extended(value: &[u8]) -> Option<(&[u8], &[u8], &[u8])> {
    let mut parts = value.splitn(3, |&b| b == b'\'');
    Some((parts.next()?, parts.next()?, parts.next()?))
}

/// Recover the text of a file name parameter, returning it together
/// with the language to advertise. A value that is already in the
/// extended form is decoded with the charset it declares, falling
/// back to detection when that charset does not fit the bytes.
fn repair_parameter(
    key: &str,
    value: &[u8],
    detector: &dyn CharsetDetector,
    language: &str,
) -> (String, String) {
    let extended = if key.ends_with('*') {
        split_extended(value)
    } else {
        None
    };
    let Some((charset, lang, encoded)) = extended else {
        return (transcode_lossy(value, detector), language.to_string());
    };

    let bytes: Vec<u8> = percent_decode(encoded).collect();
    let declared = Charset::for_label_no_replacement(charset)
        .map(|charset| charset.decode_without_bom_handling(&bytes))
        .filter(|(_, malformed)| !malformed);
    let text = match declared {
        Some((text, _)) => text.into_owned(),
        None => transcode_lossy(&bytes, detector),
    };

    let lang = if lang.is_empty() {
        language.to_string()
    } else {
        force_ascii(lang)
    };
    (text, lang)
}

fn repair_content_disposition(
    value: &[u8],
    detector: &dyn CharsetDetector,
    language: &str,
) -> String {
    let mut params = split_parameters(value).into_iter();
    let mut result = vec![params.next().map(force_ascii).unwrap_or_default()];

    for param in params {
        match key_value(param) {
            Some((key, filename)) if base_name(&key).eq_ignore_ascii_case("filename") => {
                let (filename, language) = repair_parameter(&key, &filename, detector, language);
                result.push(format!(
                    "filename*={}",
                    rfc2047::extended_value(&filename, "UTF-8", &language)
                ));
            }
            _ => result.push(force_ascii(param)),
        }
    }

    result.join("; ")
}

fn repair_content_type(value: &[u8], detector: &dyn CharsetDetector) -> String {
    let mut params = split_parameters(value).into_iter();
    let mut result = vec![params.next().map(force_ascii).unwrap_or_default()];

    for param in params {
        if is_clean(param) {
            result.push(param.to_str_lossy().into_owned());
            continue;
        }
        match key_value(param) {
            Some((key, name))
                if base_name(&key).eq_ignore_ascii_case("name")
                    || base_name(&key).eq_ignore_ascii_case("filename") =>
            {
                let (name, _) = repair_parameter(&key, &name, detector, "");
                result.push(format!(
                    "{}=\"{}\"",
                    base_name(&key),
                    rfc2047::b_encode(&name, "UTF-8")
                ));
            }
            _ => result.push(force_ascii(param)),
        }
    }

    result.join("; ")
}

/// Produce a UTF-8 value for a header from raw bytes. Clean values
/// are returned unchanged. Content-Disposition and Content-Type
/// values with filename parameters have those parameters rewritten
/// into an encoded form; any other value is transcoded.
pub fn repair_field_value<'a>(
    name: &str,
    value: &'a [u8],
    detector: &dyn CharsetDetector,
    language: &str,
) -> Cow<'a, str> {
    if let Ok(text) = std::str::from_utf8(value) {
        return Cow::Borrowed(text);
    }

    let repaired = if !needs_repair(name, value) {
        transcode_lossy(value, detector)
    } else if name.eq_ignore_ascii_case("Content-Disposition") {
        repair_content_disposition(value, detector, language)
    } else {
        repair_content_type(value, detector)
    };

    tracing::debug!(
        "repaired {name} value {:?} as {repaired:?}",
        value.as_bstr()
    );
    Cow::Owned(repaired)
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Always reports the same charset
    pub struct FixedDetector(pub &'static str);

    impl CharsetDetector for FixedDetector {
        fn detect(&self, _bytes: &[u8]) -> String {
            self.0.to_string()
        }
    }

    #[test]
    fn clean_values_are_borrowed() {
        let latin1 = FixedDetector("ISO-8859-1");
        assert!(matches!(
            repair_field_value("Subject", "café".as_bytes(), &latin1, "en"),
            Cow::Borrowed("café")
        ));
    }

    #[test]
    fn content_disposition() {
        let latin1 = FixedDetector("ISO-8859-1");
        k9::assert_equal!(
            repair_field_value(
                "Content-Disposition",
                b"attachment; filename=\"r\xe9sum\xe9.pdf\"",
                &latin1,
                "en"
            ),
            "attachment; filename*=UTF-8'en'r%C3%A9sum%C3%A9.pdf"
        );
        k9::assert_equal!(
            repair_field_value(
                "content-disposition",
                b"inline; filename=caf\xe9.txt; size=10",
                &latin1,
                "fr"
            ),
            "inline; filename*=UTF-8'fr'caf%C3%A9.txt; size=10"
        );
    }

    #[test]
    fn content_type() {
        let latin1 = FixedDetector("ISO-8859-1");
        k9::assert_equal!(
            repair_field_value(
                "Content-Type",
                b"application/pdf; name=\"r\xe9sum\xe9.pdf\"; x-mac-type=\"50444620\"",
                &latin1,
                "en"
            ),
            "application/pdf; name=\"=?UTF-8?B?csOpc3Vtw6kucGRm?=\"; x-mac-type=\"50444620\""
        );
    }

    #[test]
    fn extended_parameters_with_raw_bytes() {
        let detector = FixedDetector("UTF-8");
        // The declared charset wins over the detector
        k9::assert_equal!(
            repair_field_value(
                "Content-Disposition",
                b"attachment; filename*=iso-8859-1''r\xe9sum\xe9.pdf",
                &detector,
                "en"
            ),
            "attachment; filename*=UTF-8'en'r%C3%A9sum%C3%A9.pdf"
        );
        k9::assert_equal!(
            repair_field_value(
                "Content-Disposition",
                b"attachment; filename*=iso-8859-1'fr'caf%E9-\xe9.txt",
                &detector,
                "en"
            ),
            "attachment; filename*=UTF-8'fr'caf%C3%A9-%C3%A9.txt"
        );
        k9::assert_equal!(
            repair_field_value(
                "Content-Type",
                b"application/pdf; name*=iso-8859-1''r\xe9sum\xe9.pdf",
                &detector,
                "en"
            ),
            "application/pdf; name=\"=?UTF-8?B?csOpc3Vtw6kucGRm?=\""
        );
    }

    #[test]
    fn undecodable_parameters_become_underscores() {
        let latin1 = FixedDetector("ISO-8859-1");
        k9::assert_equal!(
            repair_field_value(
                "Content-Type",
                b"text/plain; name=\"a.txt\"; x-tag=\xff\xfe",
                &latin1,
                "en"
            ),
            "text/plain; name=\"a.txt\"; x-tag=__"
        );
    }

    #[test]
    fn other_headers_are_transcoded() {
        let latin1 = FixedDetector("ISO-8859-1");
        k9::assert_equal!(
            repair_field_value("Subject", b"caf\xe9", &latin1, "en"),
            "café"
        );
        // Without a filename the disposition is only transcoded
        k9::assert_equal!(
            repair_field_value("Content-Disposition", b"inline; x=\xe9", &latin1, "en"),
            "inline; x=é"
        );
    }

    #[test]
    fn undecodable_bytes() {
        let utf8 = FixedDetector("UTF-8");
        k9::assert_equal!(transcode_lossy(b"caf\xff", &utf8), "caf_");
        let bogus = FixedDetector("no-such-charset");
        k9::assert_equal!(transcode_lossy(b"ok\xff", &bogus), "ok_");
    }

    #[test]
    fn parameter_splitting() {
        k9::assert_equal!(
            split_parameters(b"a; b=\"x;y\"; c=d; ;"),
            vec![b"a".as_slice(), b"b=\"x;y\"", b"c=d"]
        );
        k9::assert_equal!(
            key_value(b"name = \"a \\\"b\\\"\""),
            Some(("name".to_string(), b"a \"b\"".to_vec()))
        );
        assert!(needs_repair("Content-Type", b"text/plain; name=\xe9.txt"));
        assert!(needs_repair("content-disposition", b"inline; filename*=\xe9.txt"));
        assert!(!needs_repair("Content-Disposition", "inline; filename=é.txt".as_bytes()));
        assert!(!needs_repair("Content-Disposition", b"inline; size=\xe9"));
        assert!(!needs_repair("Subject", b"\xe9"));
    }

    #[test]
    fn default_detector_gives_a_usable_label() {
        let label = default_detector().detect("plain ascii text".as_bytes());
        assert!(Charset::for_label_no_replacement(label.as_bytes()).is_some());
    }
}
