use crate::address::encode_address_value;
use crate::error::FieldParseError;
use crate::grammar::{
    encode_phrase, AddrSpec, AddressList, Mailbox, MailboxList, MessageID, MimeParameters,
};
use crate::options::FieldOptions;
use crate::rfc2047;
use crate::unfold::unfold;
use chrono::{DateTime, FixedOffset};

/// Produce the wire representation of a value, without the
/// header name and without folding
pub trait EncodeHeaderValue {
    fn encode_value(&self, options: &FieldOptions) -> String;
}

/// The parsed value of a field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Addresses(AddressList),
    Mailboxes(MailboxList),
    Mailbox(Mailbox),
    /// `None` is the null reverse path, `<>`
    ReturnPath(Option<AddrSpec>),
    Date(DateTime<FixedOffset>),
    MessageId(MessageID),
    MessageIds(Vec<MessageID>),
    Keywords(Vec<String>),
    MimeVersion(u32, u32),
    ContentType(MimeParameters),
    ContentDisposition(MimeParameters),
    ContentTransferEncoding(String),
    Received {
        info: String,
        date: DateTime<FixedOffset>,
    },
    /// Text with its encoded words decoded
    Unstructured(String),
    /// The value of a field with an unrecognized name, decoded
    /// as for unstructured text
    Optional(String),
    /// A value that its grammar rejected. `text` is the unfolded
    /// original; `address` records whether the field holds
    /// addresses, which selects the encoder used when rendering.
    Raw { text: String, address: bool },
}

/// Text is emitted as-is only when parsing it back will yield
/// the same text; otherwise the whole of it is B-encoded
fn encode_text(text: &str, charset: &str) -> String {
    let passthrough = text.is_ascii()
        && text.trim() == text
        && unfold(text) == text
        && rfc2047::decode(text) == text;
    if passthrough || text.is_empty() {
        text.to_string()
    } else {
        rfc2047::b_encode(text, charset)
    }
}

impl FieldValue {
    pub fn addresses(&self) -> Option<&AddressList> {
        match self {
            Self::Addresses(list) => Some(list),
            _ => None,
        }
    }

    pub fn mailboxes(&self) -> Option<&MailboxList> {
        match self {
            Self::Mailboxes(list) => Some(list),
            _ => None,
        }
    }

    pub fn mailbox(&self) -> Option<&Mailbox> {
        match self {
            Self::Mailbox(mbox) => Some(mbox),
            _ => None,
        }
    }

    pub fn return_path(&self) -> Option<Option<&AddrSpec>> {
        match self {
            Self::ReturnPath(path) => Some(path.as_ref()),
            _ => None,
        }
    }

    /// The date of a Date or Received field
    pub fn date(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Self::Date(date) | Self::Received { date, .. } => Some(date),
            _ => None,
        }
    }

    pub fn message_id(&self) -> Option<&MessageID> {
        match self {
            Self::MessageId(id) => Some(id),
            _ => None,
        }
    }

    pub fn message_ids(&self) -> Option<&[MessageID]> {
        match self {
            Self::MessageIds(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn keywords(&self) -> Option<&[String]> {
        match self {
            Self::Keywords(words) => Some(words),
            _ => None,
        }
    }

    pub fn mime_version(&self) -> Option<(u32, u32)> {
        match self {
            Self::MimeVersion(major, minor) => Some((*major, *minor)),
            _ => None,
        }
    }

    /// Parameters of a Content-Type or Content-Disposition field
    pub fn mime_parameters(&self) -> Option<&MimeParameters> {
        match self {
            Self::ContentType(params) | Self::ContentDisposition(params) => Some(params),
            _ => None,
        }
    }

    pub fn transfer_encoding(&self) -> Option<&str> {
        match self {
            Self::ContentTransferEncoding(cte) => Some(cte),
            _ => None,
        }
    }

    /// The text of unstructured, optional and degraded fields
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Unstructured(text) | Self::Optional(text) | Self::Raw { text, .. } => {
                Some(text)
            }
            _ => None,
        }
    }

    /// A short name for the variant, used in diagnostics
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Addresses(_) => "address list",
            Self::Mailboxes(_) => "mailbox list",
            Self::Mailbox(_) => "mailbox",
            Self::ReturnPath(_) => "return path",
            Self::Date(_) => "date",
            Self::MessageId(_) => "message id",
            Self::MessageIds(_) => "message id list",
            Self::Keywords(_) => "keywords",
            Self::MimeVersion(..) => "mime version",
            Self::ContentType(_) => "content type",
            Self::ContentDisposition(_) => "content disposition",
            Self::ContentTransferEncoding(_) => "content transfer encoding",
            Self::Received { .. } => "received",
            Self::Unstructured(_) => "unstructured",
            Self::Optional(_) => "optional",
            Self::Raw { .. } => "raw",
        }
    }
}

impl EncodeHeaderValue for FieldValue {
    fn encode_value(&self, options: &FieldOptions) -> String {
        match self {
            Self::Addresses(list) => list.encode_value(options),
            Self::Mailboxes(list) => list.encode_value(options),
            Self::Mailbox(mbox) => mbox.encode_value(options),
            Self::ReturnPath(Some(addr)) => format!("<{}>", addr.encode_value(options)),
            Self::ReturnPath(None) => "<>".to_string(),
            Self::Date(date) => date.to_rfc2822(),
            Self::MessageId(id) => id.encode_value(options),
            Self::MessageIds(ids) => ids.encode_value(options),
            Self::Keywords(words) => words
                .iter()
                .map(|w| encode_phrase(w, &options.charset))
                .collect::<Vec<_>>()
                .join(", "),
            Self::MimeVersion(major, minor) => format!("{major}.{minor}"),
            Self::ContentType(params) | Self::ContentDisposition(params) => {
                params.encode_value(options)
            }
            Self::ContentTransferEncoding(cte) => cte.clone(),
            Self::Received { info, date } => {
                if info.is_empty() {
                    format!("; {}", date.to_rfc2822())
                } else {
                    let info = rfc2047::encode(info, &options.charset);
                    format!("{info}; {}", date.to_rfc2822())
                }
            }
            Self::Unstructured(text) | Self::Optional(text) => {
                encode_text(text, &options.charset)
            }
            Self::Raw { text, .. } if text.is_ascii() => text.clone(),
            Self::Raw {
                text,
                address: true,
            } => encode_address_value(text, &options.charset).into_owned(),
            Self::Raw {
                text,
                address: false,
            } => rfc2047::encode(text, &options.charset).into_owned(),
        }
    }
}

/// A field value together with the problems found while parsing it.
/// The error log is empty unless the value was degraded to `Raw`.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredField {
    value: FieldValue,
    errors: Vec<FieldParseError>,
}

impl StructuredField {
    pub fn new(value: FieldValue) -> Self {
        Self {
            value,
            errors: vec![],
        }
    }

    /// Keep the original text of a value that its grammar rejected
    pub fn degraded(text: String, address: bool, error: FieldParseError) -> Self {
        Self {
            value: FieldValue::Raw { text, address },
            errors: vec![error],
        }
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn into_value(self) -> FieldValue {
        self.value
    }

    pub fn errors(&self) -> &[FieldParseError] {
        &self.errors
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.value, FieldValue::Raw { .. })
    }

    /// The unfolded wire text for the value
    pub fn render(&self, options: &FieldOptions) -> String {
        self.value.encode_value(options)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::grammar::Parser;

    #[test]
    fn render_unstructured() {
        let options = FieldOptions::default();
        k9::assert_equal!(
            FieldValue::Unstructured("Hello".to_string()).encode_value(&options),
            "Hello"
        );
        k9::assert_equal!(
            FieldValue::Unstructured("café".to_string()).encode_value(&options),
            "=?UTF-8?B?Y2Fmw6k=?="
        );
        // Would decode differently if emitted verbatim
        let tricky = FieldValue::Unstructured("=?UTF-8?Q?x?=".to_string()).encode_value(&options);
        k9::assert_equal!(rfc2047::decode(&tricky), "=?UTF-8?Q?x?=");
    }

    #[test]
    fn render_raw() {
        let options = FieldOptions::default();
        let raw = FieldValue::Raw {
            text: "not <really an address".to_string(),
            address: true,
        };
        k9::assert_equal!(raw.encode_value(&options), "not <really an address");

        let raw = FieldValue::Raw {
            text: "José <broken".to_string(),
            address: true,
        };
        k9::assert_equal!(raw.encode_value(&options), "=?UTF-8?B?Sm9zw6k=?= <broken");

        let raw = FieldValue::Raw {
            text: "lundi prochain à midi".to_string(),
            address: false,
        };
        k9::assert_equal!(
            rfc2047::decode(&raw.encode_value(&options)),
            "lundi prochain à midi"
        );
    }

    #[test]
    fn render_structured() {
        let options = FieldOptions::default();
        k9::assert_equal!(
            FieldValue::ReturnPath(None).encode_value(&options),
            "<>"
        );
        k9::assert_equal!(
            FieldValue::ReturnPath(Some(AddrSpec::new("bounce", "example.com")))
                .encode_value(&options),
            "<bounce@example.com>"
        );
        k9::assert_equal!(FieldValue::MimeVersion(1, 0).encode_value(&options), "1.0");
        k9::assert_equal!(
            FieldValue::Keywords(vec!["urgent".to_string(), "follow up".to_string()])
                .encode_value(&options),
            "urgent, follow up"
        );

        let (info, date) =
            Parser::parse_received_header("by mx.example.net; Tue, 1 Jul 2003 10:52:37 +0200")
                .unwrap();
        k9::assert_equal!(
            FieldValue::Received { info, date }.encode_value(&options),
            "by mx.example.net; Tue, 1 Jul 2003 10:52:37 +0200"
        );
        k9::assert_equal!(
            FieldValue::Received {
                info: "from café".to_string(),
                date,
            }
            .encode_value(&options),
            "=?UTF-8?B?ZnJvbSBjYWbDqQ==?=; Tue, 1 Jul 2003 10:52:37 +0200"
        );
    }

    #[test]
    fn accessors() {
        let value = FieldValue::Unstructured("hi".to_string());
        k9::assert_equal!(value.text(), Some("hi"));
        k9::assert_equal!(value.addresses(), None);
        k9::assert_equal!(value.variant_name(), "unstructured");

        let field = StructuredField::degraded(
            "bad".to_string(),
            false,
            FieldParseError::new("date_time", "bad", "input contains invalid characters"),
        );
        assert!(field.is_degraded());
        k9::assert_equal!(field.errors().len(), 1);
        k9::assert_equal!(field.value().text(), Some("bad"));
    }
}
