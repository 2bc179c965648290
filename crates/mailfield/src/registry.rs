use crate::error::FieldParseError;
use crate::grammar::Parser;
use crate::rfc2047;
use crate::structured::{FieldValue, StructuredField};
use crate::unfold::unfold;
use crate::{MailFieldError, Result};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Parses an unfolded field value
pub type FieldParser = fn(&str) -> std::result::Result<FieldValue, FieldParseError>;

/// The fields with a structured grammar, in their conventional
/// order within a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    ReturnPath,
    Received,
    ResentDate,
    ResentFrom,
    ResentSender,
    ResentTo,
    ResentCc,
    ResentBcc,
    ResentMessageId,
    Date,
    From,
    Sender,
    ReplyTo,
    To,
    Cc,
    Bcc,
    MessageId,
    InReplyTo,
    References,
    Subject,
    Comments,
    Keywords,
    MimeVersion,
    ContentType,
    ContentTransferEncoding,
    ContentLocation,
    ContentDisposition,
    ContentDescription,
    ContentId,
}

impl FieldKind {
    pub const ALL: [FieldKind; 29] = [
        Self::ReturnPath,
        Self::Received,
        Self::ResentDate,
        Self::ResentFrom,
        Self::ResentSender,
        Self::ResentTo,
        Self::ResentCc,
        Self::ResentBcc,
        Self::ResentMessageId,
        Self::Date,
        Self::From,
        Self::Sender,
        Self::ReplyTo,
        Self::To,
        Self::Cc,
        Self::Bcc,
        Self::MessageId,
        Self::InReplyTo,
        Self::References,
        Self::Subject,
        Self::Comments,
        Self::Keywords,
        Self::MimeVersion,
        Self::ContentType,
        Self::ContentTransferEncoding,
        Self::ContentLocation,
        Self::ContentDisposition,
        Self::ContentDescription,
        Self::ContentId,
    ];

    pub fn canonical_name(&self) -> &'static str {
        match self {
            Self::ReturnPath => "Return-Path",
            Self::Received => "Received",
            Self::ResentDate => "Resent-Date",
            Self::ResentFrom => "Resent-From",
            Self::ResentSender => "Resent-Sender",
            Self::ResentTo => "Resent-To",
            Self::ResentCc => "Resent-Cc",
            Self::ResentBcc => "Resent-Bcc",
            Self::ResentMessageId => "Resent-Message-ID",
            Self::Date => "Date",
            Self::From => "From",
            Self::Sender => "Sender",
            Self::ReplyTo => "Reply-To",
            Self::To => "To",
            Self::Cc => "Cc",
            Self::Bcc => "Bcc",
            Self::MessageId => "Message-ID",
            Self::InReplyTo => "In-Reply-To",
            Self::References => "References",
            Self::Subject => "Subject",
            Self::Comments => "Comments",
            Self::Keywords => "Keywords",
            Self::MimeVersion => "Mime-Version",
            Self::ContentType => "Content-Type",
            Self::ContentTransferEncoding => "Content-Transfer-Encoding",
            Self::ContentLocation => "Content-Location",
            Self::ContentDisposition => "Content-Disposition",
            Self::ContentDescription => "Content-Description",
            Self::ContentId => "Content-ID",
        }
    }

    /// Position in the conventional field order
    pub fn order_index(&self) -> usize {
        *self as usize
    }

    /// Whether values of this field are addresses
    pub fn is_address(&self) -> bool {
        matches!(
            self,
            Self::ReturnPath
                | Self::ResentFrom
                | Self::ResentSender
                | Self::ResentTo
                | Self::ResentCc
                | Self::ResentBcc
                | Self::From
                | Self::Sender
                | Self::ReplyTo
                | Self::To
                | Self::Cc
                | Self::Bcc
        )
    }

    /// Parse an unfolded value with this field's grammar
    pub fn parse(&self, text: &str) -> std::result::Result<FieldValue, FieldParseError> {
        Ok(match self {
            Self::ReturnPath => FieldValue::ReturnPath(Parser::parse_return_path_header(text)?),
            Self::Received => {
                let (info, date) = Parser::parse_received_header(text)?;
                FieldValue::Received { info, date }
            }
            Self::ResentDate | Self::Date => FieldValue::Date(Parser::parse_date_header(text)?),
            Self::ResentFrom | Self::From => {
                FieldValue::Mailboxes(Parser::parse_mailbox_list_header(text)?)
            }
            Self::ResentSender | Self::Sender => {
                FieldValue::Mailbox(Parser::parse_mailbox_header(text)?)
            }
            Self::ResentTo
            | Self::ResentCc
            | Self::ResentBcc
            | Self::ReplyTo
            | Self::To
            | Self::Cc
            | Self::Bcc => FieldValue::Addresses(Parser::parse_address_list_header(text)?),
            Self::ResentMessageId | Self::MessageId => {
                FieldValue::MessageId(Parser::parse_msg_id_header(text)?)
            }
            Self::InReplyTo | Self::References => {
                FieldValue::MessageIds(Parser::parse_msg_id_header_list(text)?)
            }
            Self::Subject
            | Self::Comments
            | Self::ContentLocation
            | Self::ContentDescription => {
                FieldValue::Unstructured(rfc2047::decode(text).into_owned())
            }
            Self::Keywords => FieldValue::Keywords(Parser::parse_keywords_header(text)?),
            Self::MimeVersion => {
                let (major, minor) = Parser::parse_mime_version_header(text)?;
                FieldValue::MimeVersion(major, minor)
            }
            Self::ContentType => FieldValue::ContentType(Parser::parse_content_type_header(text)?),
            Self::ContentTransferEncoding => FieldValue::ContentTransferEncoding(
                Parser::parse_content_transfer_encoding_header(text)?,
            ),
            Self::ContentDisposition => {
                FieldValue::ContentDisposition(Parser::parse_content_disposition_header(text)?)
            }
            Self::ContentId => FieldValue::MessageId(Parser::parse_content_id_header(text)?),
        })
    }

    /// Whether `value` is the variant that this field holds
    pub fn accepts(&self, value: &FieldValue) -> bool {
        use FieldValue as V;
        match self {
            Self::ReturnPath => matches!(value, V::ReturnPath(_)),
            Self::Received => matches!(value, V::Received { .. }),
            Self::ResentDate | Self::Date => matches!(value, V::Date(_)),
            Self::ResentFrom | Self::From => matches!(value, V::Mailboxes(_)),
            Self::ResentSender | Self::Sender => matches!(value, V::Mailbox(_)),
            Self::ResentTo
            | Self::ResentCc
            | Self::ResentBcc
            | Self::ReplyTo
            | Self::To
            | Self::Cc
            | Self::Bcc => matches!(value, V::Addresses(_)),
            Self::ResentMessageId | Self::MessageId | Self::ContentId => {
                matches!(value, V::MessageId(_))
            }
            Self::InReplyTo | Self::References => matches!(value, V::MessageIds(_)),
            Self::Subject
            | Self::Comments
            | Self::ContentLocation
            | Self::ContentDescription => matches!(value, V::Unstructured(_)),
            Self::Keywords => matches!(value, V::Keywords(_)),
            Self::MimeVersion => matches!(value, V::MimeVersion(..)),
            Self::ContentType => matches!(value, V::ContentType(_)),
            Self::ContentTransferEncoding => matches!(value, V::ContentTransferEncoding(_)),
            Self::ContentDisposition => matches!(value, V::ContentDisposition(_)),
        }
    }
}

/// How a field name is handled
#[derive(Debug, Clone, Copy)]
pub enum FieldType {
    Known(FieldKind),
    /// Added through [FieldRegistryBuilder::register]
    Registered {
        name: &'static str,
        parser: FieldParser,
    },
    /// Any other name; the value is treated as unstructured text
    Optional,
}

impl FieldType {
    pub fn canonical_name(&self) -> Option<&'static str> {
        match self {
            Self::Known(kind) => Some(kind.canonical_name()),
            Self::Registered { name, .. } => Some(name),
            Self::Optional => None,
        }
    }

    pub fn kind(&self) -> Option<FieldKind> {
        match self {
            Self::Known(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Unknown and registered names have no order index and sort
    /// after all known names
    pub fn order_index(&self) -> Option<usize> {
        self.kind().map(|kind| kind.order_index())
    }

    pub fn is_address(&self) -> bool {
        self.kind().map(|kind| kind.is_address()).unwrap_or(false)
    }

    pub fn parse(&self, text: &str) -> std::result::Result<FieldValue, FieldParseError> {
        match self {
            Self::Known(kind) => kind.parse(text),
            Self::Registered { parser, .. } => parser(text),
            Self::Optional => Ok(FieldValue::Optional(rfc2047::decode(text).into_owned())),
        }
    }

    pub fn dispatch(&self, raw: &str) -> StructuredField {
        let text = unfold(raw);
        let text = text.trim();
        match self.parse(text) {
            Ok(value) => StructuredField::new(value),
            Err(err) => {
                tracing::debug!(
                    "{} value {text:?} did not parse, keeping it as raw text: {err:#}",
                    self.canonical_name().unwrap_or("optional")
                );
                StructuredField::degraded(text.to_string(), self.is_address(), err)
            }
        }
    }

    pub fn accepts(&self, value: &FieldValue) -> bool {
        match self {
            Self::Known(kind) => kind.accepts(value),
            Self::Registered { .. } => !matches!(value, FieldValue::Raw { .. }),
            Self::Optional => matches!(value, FieldValue::Optional(_) | FieldValue::Unstructured(_)),
        }
    }
}

/// Maps field names to their handling. The table is built on first
/// use and is immutable afterwards.
#[derive(Debug)]
pub struct FieldRegistry {
    names: HashMap<String, FieldType>,
}

static REGISTRY: OnceLock<FieldRegistry> = OnceLock::new();

impl FieldRegistry {
    fn with_extensions(extensions: Vec<(&'static str, FieldParser)>) -> Self {
        let mut names: HashMap<String, FieldType> = FieldKind::ALL
            .iter()
            .map(|kind| {
                (
                    kind.canonical_name().to_ascii_lowercase(),
                    FieldType::Known(*kind),
                )
            })
            .collect();
        for (name, parser) in extensions {
            names.insert(
                name.to_ascii_lowercase(),
                FieldType::Registered { name, parser },
            );
        }
        Self { names }
    }

    pub fn builder() -> FieldRegistryBuilder {
        FieldRegistryBuilder::default()
    }

    pub fn get() -> &'static FieldRegistry {
        REGISTRY.get_or_init(|| Self::with_extensions(vec![]))
    }

    /// Case-insensitive lookup of a field name
    pub fn resolve(&self, name: &str) -> FieldType {
        self.names
            .get(&name.to_ascii_lowercase())
            .copied()
            .unwrap_or(FieldType::Optional)
    }
}

/// Collects additional field grammars. These can only be installed
/// before the registry is first used.
#[derive(Default)]
pub struct FieldRegistryBuilder {
    extensions: Vec<(&'static str, FieldParser)>,
}

impl FieldRegistryBuilder {
    /// Register a grammar for `name`. This replaces the built-in
    /// grammar if `name` is a known field.
    pub fn register(mut self, name: &'static str, parser: FieldParser) -> Self {
        self.extensions.push((name, parser));
        self
    }

    pub fn install(self) -> Result<()> {
        REGISTRY
            .set(FieldRegistry::with_extensions(self.extensions))
            .map_err(|_| MailFieldError::RegistryInitialized)
    }
}

/// Resolve a field name against the process-wide registry
pub fn resolve(name: &str) -> FieldType {
    FieldRegistry::get().resolve(name)
}

/// Parse a raw value for the named field. If the grammar rejects
/// the value, it is kept as raw text and the error is recorded on
/// the result.
pub fn dispatch(name: &str, raw: &str) -> StructuredField {
    resolve(name).dispatch(raw)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolving() {
        k9::assert_equal!(
            resolve("message-id").canonical_name(),
            Some("Message-ID")
        );
        k9::assert_equal!(resolve("CONTENT-TYPE").kind(), Some(FieldKind::ContentType));
        k9::assert_equal!(resolve("X-Mailer").canonical_name(), None);
        assert!(resolve("reply-to").is_address());
        assert!(!resolve("subject").is_address());
    }

    #[test]
    fn order() {
        k9::assert_equal!(FieldKind::ReturnPath.order_index(), 0);
        k9::assert_equal!(FieldKind::ContentId.order_index(), 28);
        for (idx, kind) in FieldKind::ALL.iter().enumerate() {
            k9::assert_equal!(kind.order_index(), idx);
        }
        assert!(FieldKind::Received.order_index() < FieldKind::To.order_index());
        assert!(FieldKind::To.order_index() < FieldKind::Subject.order_index());
        k9::assert_equal!(resolve("X-Custom").order_index(), None);
    }

    #[test]
    fn dispatching() {
        let field = dispatch("Subject", "=?UTF-8?B?SGVsbG8=?=");
        k9::assert_equal!(field.value(), &FieldValue::Unstructured("Hello".to_string()));
        assert!(field.errors().is_empty());

        let field = dispatch("X-Thing", "some\r\n value");
        k9::assert_equal!(field.value(), &FieldValue::Optional("some value".to_string()));

        let field = dispatch("Date", "not a date");
        assert!(field.is_degraded());
        k9::assert_equal!(
            field.value(),
            &FieldValue::Raw {
                text: "not a date".to_string(),
                address: false
            }
        );
        k9::assert_equal!(field.errors()[0].element.as_str(), "date_time");

        let field = dispatch("To", "broken <address");
        k9::assert_equal!(
            field.value(),
            &FieldValue::Raw {
                text: "broken <address".to_string(),
                address: true
            }
        );
    }

    #[test]
    fn accepts() {
        assert!(FieldKind::Subject.accepts(&FieldValue::Unstructured("x".to_string())));
        assert!(!FieldKind::Date.accepts(&FieldValue::Unstructured("x".to_string())));
        assert!(FieldType::Optional.accepts(&FieldValue::Optional("x".to_string())));
    }

    #[test]
    fn late_install_is_rejected() {
        // Force initialization
        resolve("Subject");
        k9::assert_equal!(
            FieldRegistry::builder()
                .register("X-Late", |text| Ok(FieldValue::Optional(text.to_string())))
                .install(),
            Err(MailFieldError::RegistryInitialized)
        );
    }
}
