use crate::error::FieldParseError;
use crate::grammar::{AddrSpec, AddressList, Mailbox, MailboxList, MessageID, MimeParameters};
use crate::options::FieldOptions;
use crate::registry::{self, FieldKind, FieldType};
use crate::repair::{default_detector, is_clean, repair_field_value, CharsetDetector};
use crate::structured::{FieldValue, StructuredField};
use crate::unfold::{split_field, split_field_bytes, unfold};
use crate::wrap::fold;
use crate::{MailFieldError, Result};
use chrono::{DateTime, FixedOffset};
use std::cmp::Ordering;

/// Where a field is in its lifecycle.
/// Text is parsed on first access and the result kept until the
/// value is replaced.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldState {
    /// A name without a value
    Empty,
    /// Raw value text that has not been parsed yet
    Unparsed(String),
    Parsed(StructuredField),
}

/// A single header field
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    field_type: FieldType,
    options: FieldOptions,
    state: FieldState,
}

impl Field {
    fn build(name: &str, state: FieldState) -> Self {
        let field_type = registry::resolve(name);
        let name = field_type
            .canonical_name()
            .map(str::to_string)
            .unwrap_or_else(|| name.to_string());
        Self {
            name,
            field_type,
            options: FieldOptions::default(),
            state,
        }
    }

    /// Create a field from a `Name: value` line
    pub fn parse(line: &str) -> Result<Self> {
        let (name, value) = split_field(line)?;
        Ok(Self::new(&name, value))
    }

    /// Create a field from a raw line which may contain 8-bit text.
    /// Values that are not valid UTF-8 are repaired.
    pub fn parse_bytes(line: &[u8]) -> Result<Self> {
        Self::parse_bytes_with_options(line, FieldOptions::default())
    }

    pub fn parse_bytes_with_options(line: &[u8], options: FieldOptions) -> Result<Self> {
        Self::parse_bytes_with_detector(line, options, default_detector())
    }

    pub fn parse_bytes_with_detector(
        line: &[u8],
        options: FieldOptions,
        detector: &dyn CharsetDetector,
    ) -> Result<Self> {
        let (name, value) = split_field_bytes(line)?;
        let value = if options.repair_charsets && !is_clean(&value) {
            repair_field_value(&name, &value, detector, &options.parameter_language).into_owned()
        } else {
            String::from_utf8_lossy(&value).into_owned()
        };
        Ok(Self::new(&name, value).with_options(options))
    }

    /// Create a field from its name and raw value. The value is
    /// parsed when it is first needed.
    pub fn new(name: &str, value: impl Into<String>) -> Self {
        Self::build(name, FieldState::Unparsed(value.into()))
    }

    /// Create a field that has no value yet
    pub fn named(name: &str) -> Self {
        Self::build(name, FieldState::Empty)
    }

    /// Create a field from a structured value, which must be
    /// appropriate for the field
    pub fn with_value(name: &str, value: FieldValue) -> Result<Self> {
        let mut field = Self::named(name);
        field.assign(value)?;
        Ok(field)
    }

    pub fn with_options(mut self, options: FieldOptions) -> Self {
        self.options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn kind(&self) -> Option<FieldKind> {
        self.field_type.kind()
    }

    /// The charset used when encoding non-ASCII text
    pub fn charset(&self) -> &str {
        &self.options.charset
    }

    pub fn set_charset(&mut self, charset: &str) {
        self.options.charset = charset.to_string();
    }

    pub fn options(&self) -> &FieldOptions {
        &self.options
    }

    pub fn state(&self) -> &FieldState {
        &self.state
    }

    /// The raw text of a value that has not been parsed yet
    pub fn raw_value(&self) -> Option<&str> {
        match &self.state {
            FieldState::Unparsed(raw) => Some(raw),
            _ => None,
        }
    }

    fn resolve(&mut self) {
        if let FieldState::Unparsed(raw) = &self.state {
            let parsed = self.field_type.dispatch(raw);
            self.state = FieldState::Parsed(parsed);
        }
    }

    /// The parsed field, along with any problems found while
    /// parsing it. `None` if the field has no value.
    pub fn structured(&mut self) -> Option<&StructuredField> {
        self.resolve();
        match &self.state {
            FieldState::Parsed(field) => Some(field),
            _ => None,
        }
    }

    pub fn value(&mut self) -> Option<&FieldValue> {
        self.structured().map(StructuredField::value)
    }

    pub fn errors(&mut self) -> &[FieldParseError] {
        match self.structured() {
            Some(field) => field.errors(),
            None => &[],
        }
    }

    /// Replace the value with `text`, which must satisfy the grammar
    /// for this field. The field is left unchanged on error.
    pub fn set_value(&mut self, text: &str) -> Result<()> {
        let text = unfold(text);
        let value = self
            .field_type
            .parse(text.trim())
            .map_err(|source| MailFieldError::InvalidAssignment {
                name: self.name.clone(),
                source,
            })?;
        self.state = FieldState::Parsed(StructuredField::new(value));
        Ok(())
    }

    /// Replace the value with an already structured one
    pub fn assign(&mut self, value: FieldValue) -> Result<()> {
        if !self.field_type.accepts(&value) {
            return Err(MailFieldError::InvalidAssignment {
                name: self.name.clone(),
                source: FieldParseError::new(
                    "value",
                    value.variant_name(),
                    format!("a {} is not valid for {}", value.variant_name(), self.name),
                ),
            });
        }
        self.state = FieldState::Parsed(StructuredField::new(value));
        Ok(())
    }

    /// The value in its unfolded wire form
    pub fn render(&mut self) -> String {
        self.resolve();
        match &self.state {
            FieldState::Parsed(field) => field.render(&self.options),
            FieldState::Empty => String::new(),
            FieldState::Unparsed(_) => unreachable!(),
        }
    }

    /// The complete folded header line, including the trailing CRLF
    pub fn to_header_string(&mut self) -> String {
        let value = self.render();
        format!(
            "{}: {}\r\n",
            self.name,
            fold(&value, self.name.len() + 2, self.options.fold_width)
        )
    }

    pub fn addresses(&mut self) -> Option<&AddressList> {
        self.value().and_then(FieldValue::addresses)
    }

    pub fn mailboxes(&mut self) -> Option<&MailboxList> {
        self.value().and_then(FieldValue::mailboxes)
    }

    pub fn mailbox(&mut self) -> Option<&Mailbox> {
        self.value().and_then(FieldValue::mailbox)
    }

    pub fn return_path(&mut self) -> Option<Option<&AddrSpec>> {
        self.value().and_then(FieldValue::return_path)
    }

    pub fn date(&mut self) -> Option<&DateTime<FixedOffset>> {
        self.value().and_then(FieldValue::date)
    }

    pub fn message_id(&mut self) -> Option<&MessageID> {
        self.value().and_then(FieldValue::message_id)
    }

    pub fn message_ids(&mut self) -> Option<&[MessageID]> {
        self.value().and_then(FieldValue::message_ids)
    }

    pub fn keywords(&mut self) -> Option<&[String]> {
        self.value().and_then(FieldValue::keywords)
    }

    pub fn mime_version(&mut self) -> Option<(u32, u32)> {
        self.value().and_then(FieldValue::mime_version)
    }

    pub fn mime_parameters(&mut self) -> Option<&MimeParameters> {
        self.value().and_then(FieldValue::mime_parameters)
    }

    pub fn transfer_encoding(&mut self) -> Option<&str> {
        self.value().and_then(FieldValue::transfer_encoding)
    }

    pub fn text(&mut self) -> Option<&str> {
        self.value().and_then(FieldValue::text)
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
    }
}

/// Fields order by their conventional position in a message.
/// Unrecognized names come after all known names and are not
/// comparable with each other.
impl PartialOrd for Field {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (
            self.field_type.order_index(),
            other.field_type.order_index(),
        ) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            (Some(_), None) => Some(Ordering::Less),
            (None, Some(_)) => Some(Ordering::Greater),
            (None, None) if self == other => Some(Ordering::Equal),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::repair::test::FixedDetector;
    use std::collections::BTreeMap;

    #[test]
    fn lazy_parsing() {
        let mut field = Field::parse("subject: =?UTF-8?B?SGVsbG8=?=").unwrap();
        k9::assert_equal!(field.name(), "Subject");
        k9::assert_equal!(field.kind(), Some(FieldKind::Subject));
        k9::assert_equal!(field.raw_value(), Some("=?UTF-8?B?SGVsbG8=?="));

        k9::assert_equal!(field.text(), Some("Hello"));
        k9::assert_equal!(field.raw_value(), None);
        assert!(field.errors().is_empty());
    }

    #[test]
    fn names() {
        k9::assert_equal!(Field::new("x-MyHeader", "v").name(), "x-MyHeader");
        k9::assert_equal!(Field::new("MESSAGE-ID", "<a@b>").name(), "Message-ID");
        k9::assert_equal!(Field::named("content-type").state(), &FieldState::Empty);
        assert!(Field::parse("no colon here").is_err());
    }

    #[test]
    fn empty_field() {
        let mut field = Field::named("Subject");
        k9::assert_equal!(field.value(), None);
        k9::assert_equal!(field.render(), "");
        k9::assert_equal!(field.to_header_string(), "Subject: \r\n");
    }

    #[test]
    fn degraded() {
        let mut field = Field::new("Date", "yesterday");
        k9::assert_equal!(field.errors().len(), 1);
        k9::assert_equal!(field.date(), None);
        k9::assert_equal!(field.text(), Some("yesterday"));
        k9::assert_equal!(field.render(), "yesterday");
    }

    #[test]
    fn typed_access() {
        let mut field = Field::new("To", "Someone <someone@example.com>, other@example.com");
        k9::assert_equal!(field.addresses().map(|list| list.0.len()), Some(2));
        k9::assert_equal!(field.mailboxes(), None);
        k9::assert_equal!(field.text(), None);

        let mut field = Field::new("References", "<a@example.com>\r\n <b@example.com>");
        k9::assert_equal!(
            field.message_ids().map(<[MessageID]>::to_vec),
            Some(vec![
                MessageID("a@example.com".to_string()),
                MessageID("b@example.com".to_string())
            ])
        );

        let mut field = Field::new("Content-Type", "text/plain; charset=utf-8");
        let params = field.mime_parameters().unwrap();
        k9::assert_equal!(params.value.as_str(), "text/plain");
        k9::assert_equal!(params.get("charset"), Some("utf-8".to_string()));
    }

    #[test]
    fn set_value() {
        let mut field = Field::new("To", "a@example.com");
        field.set_value("b@example.com,\r\n c@example.com").unwrap();
        k9::assert_equal!(field.render(), "b@example.com, c@example.com");

        let err = field.set_value("not an <address").unwrap_err();
        assert!(
            matches!(&err, MailFieldError::InvalidAssignment { name, .. } if name == "To"),
            "{err:?}"
        );
        // Unchanged
        k9::assert_equal!(field.render(), "b@example.com, c@example.com");

        let mut field = Field::new("Subject", "old");
        field.set_value("café").unwrap();
        k9::assert_equal!(field.text(), Some("café"));
        k9::assert_equal!(field.render(), "=?UTF-8?B?Y2Fmw6k=?=");
    }

    #[test]
    fn assign() {
        let mut field = Field::named("Date");
        assert!(field
            .assign(FieldValue::Unstructured("today".to_string()))
            .is_err());

        let date = DateTime::parse_from_rfc2822("Tue, 1 Jul 2003 10:52:37 +0200").unwrap();
        field.assign(FieldValue::Date(date)).unwrap();
        k9::assert_equal!(field.render(), "Tue, 1 Jul 2003 10:52:37 +0200");

        let params = MimeParameters::from_parts(
            "text/plain",
            &[("charset".to_string(), "utf-8".to_string())]
                .into_iter()
                .collect::<BTreeMap<_, _>>(),
        );
        let mut field = Field::with_value("Content-Type", FieldValue::ContentType(params)).unwrap();
        k9::assert_equal!(
            field.to_header_string(),
            "Content-Type: text/plain; charset=utf-8\r\n"
        );
    }

    #[test]
    fn header_string() {
        let mut field = Field::new("Subject", "café");
        k9::assert_equal!(field.to_header_string(), "Subject: =?UTF-8?B?Y2Fmw6k=?=\r\n");

        let mut field = Field::new(
            "Subject",
            "this is a rather long subject line that will need to be folded \
             when it is rendered because it exceeds the line width",
        );
        let header = field.to_header_string();
        for line in header.split("\r\n") {
            assert!(line.len() <= 78, "{line}");
        }
        let mut reparsed = Field::parse(header.trim_end()).unwrap();
        k9::assert_equal!(reparsed.render(), field.render());
    }

    #[test]
    fn charset() {
        let mut field = Field::new("Subject", "café");
        field.set_charset("ISO-8859-1");
        k9::assert_equal!(field.charset(), "ISO-8859-1");
        k9::assert_equal!(field.render(), "=?ISO-8859-1?B?Y2Fm6Q==?=");
    }

    #[test]
    fn comparison() {
        let received = Field::new("Received", "by x; Tue, 1 Jul 2003 10:52:37 +0200");
        let to = Field::new("to", "a@example.com");
        let subject = Field::new("Subject", "hi");
        assert!(received < to);
        assert!(to < subject);
        assert!(subject < Field::new("X-Mailer", "thing"));

        k9::assert_equal!(Field::new("subject", "x"), Field::new("SUBJECT", "y"));
        k9::assert_equal!(
            Field::new("X-A", "1").partial_cmp(&Field::new("X-B", "2")),
            None
        );
        k9::assert_equal!(
            Field::new("X-A", "1").partial_cmp(&Field::new("x-a", "2")),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn repaired_bytes() {
        let latin1 = FixedDetector("ISO-8859-1");
        let mut field = Field::parse_bytes_with_detector(
            b"Content-Disposition: attachment; filename=\"r\xe9sum\xe9.pdf\"",
            FieldOptions::default(),
            &latin1,
        )
        .unwrap();
        k9::assert_equal!(
            field.mime_parameters().and_then(|p| p.get("filename")),
            Some("résumé.pdf".to_string())
        );
        k9::assert_equal!(
            field.render(),
            "attachment; filename*=UTF-8'en'r%C3%A9sum%C3%A9.pdf"
        );

        let options = FieldOptions {
            repair_charsets: false,
            ..FieldOptions::default()
        };
        let field =
            Field::parse_bytes_with_detector(b"Subject: caf\xe9", options, &latin1).unwrap();
        k9::assert_equal!(field.raw_value(), Some("caf\u{fffd}"));
    }
}
