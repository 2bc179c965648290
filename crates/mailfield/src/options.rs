use serde::{Deserialize, Serialize};

/// Controls how fields are encoded and whether raw 8-bit values
/// are repaired while parsing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FieldOptions {
    /// Charset used when encoding non-ASCII text for output
    pub charset: String,
    /// Language tag used for RFC 2231 extended parameters
    pub parameter_language: String,
    pub repair_charsets: bool,
    /// Preferred maximum line length when folding
    pub fold_width: usize,
}

impl Default for FieldOptions {
    fn default() -> Self {
        Self {
            charset: "UTF-8".to_string(),
            parameter_language: "en".to_string(),
            repair_charsets: true,
            fold_width: 78,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let options: FieldOptions =
            serde_json::from_str(r#"{"charset": "ISO-8859-1"}"#).unwrap();
        k9::assert_equal!(
            options,
            FieldOptions {
                charset: "ISO-8859-1".to_string(),
                ..FieldOptions::default()
            }
        );
        k9::assert_equal!(options.fold_width, 78);
        k9::assert_equal!(options.parameter_language.as_str(), "en");
    }
}
