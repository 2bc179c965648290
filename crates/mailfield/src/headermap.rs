use crate::field::Field;
use crate::grammar::{AddressList, Mailbox, MailboxList, MessageID, MimeParameters};
use crate::header::{split_header_block, HeaderConformance};
use crate::options::FieldOptions;
use bstr::ByteSlice;
use chrono::{DateTime, FixedOffset};

/// Represents an ordered list of headers.
/// Note that there may be multiple headers with the same name.
/// Derefs to the underlying `Vec<Field>` for mutation,
/// but provides some accessors for retrieving headers by name.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    headers: Vec<Field>,
}

impl std::ops::Deref for HeaderMap {
    type Target = Vec<Field>;
    fn deref(&self) -> &Vec<Field> {
        &self.headers
    }
}

impl std::ops::DerefMut for HeaderMap {
    fn deref_mut(&mut self) -> &mut Vec<Field> {
        &mut self.headers
    }
}

#[derive(Debug, Clone)]
pub struct HeaderParseResult {
    pub headers: HeaderMap,
    /// Offset of the body within the parsed block
    pub body_offset: usize,
    pub overall_conformance: HeaderConformance,
}

impl HeaderMap {
    pub fn new(headers: Vec<Field>) -> Self {
        Self { headers }
    }

    pub fn parse(block: impl AsRef<[u8]>) -> HeaderParseResult {
        Self::parse_with_options(block, FieldOptions::default())
    }

    /// Split a header block into fields. Lines that cannot be split
    /// into a name and a value are skipped.
    pub fn parse_with_options(block: impl AsRef<[u8]>, options: FieldOptions) -> HeaderParseResult {
        let block = split_header_block(block.as_ref());
        let mut overall_conformance = block.overall_conformance;
        let mut headers = vec![];

        for line in block.lines {
            match Field::parse_bytes_with_options(line.bytes, options.clone()) {
                Ok(field) => headers.push(field),
                Err(err) => {
                    tracing::warn!(
                        "dropping header line {:?}: {err:#}",
                        line.bytes.as_bstr()
                    );
                    overall_conformance.set(HeaderConformance::MISSING_COLON_VALUE, true);
                }
            }
        }

        HeaderParseResult {
            headers: Self { headers },
            body_offset: block.body_offset,
            overall_conformance,
        }
    }

    pub fn get_first(&self, name: &str) -> Option<&Field> {
        self.headers
            .iter()
            .find(|field| field.name().eq_ignore_ascii_case(name))
    }

    pub fn get_first_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.headers
            .iter_mut()
            .find(|field| field.name().eq_ignore_ascii_case(name))
    }

    pub fn get_last(&self, name: &str) -> Option<&Field> {
        self.headers
            .iter()
            .rev()
            .find(|field| field.name().eq_ignore_ascii_case(name))
    }

    pub fn iter_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl DoubleEndedIterator<Item = &'a Field> + 'a {
        self.headers
            .iter()
            .filter(move |field| field.name().eq_ignore_ascii_case(name))
    }

    pub fn append(&mut self, field: Field) {
        self.headers.push(field);
    }

    /// Remove every field with the given name, returning how many
    /// were removed
    pub fn remove_all_named(&mut self, name: &str) -> usize {
        let before = self.headers.len();
        self.headers
            .retain(|field| !field.name().eq_ignore_ascii_case(name));
        before - self.headers.len()
    }

    /// Arrange the fields into their conventional order. The sort is
    /// stable: fields with the same name, and unrecognized fields,
    /// keep their relative order.
    pub fn sort(&mut self) {
        self.headers
            .sort_by_key(|field| field.field_type().order_index().unwrap_or(usize::MAX));
    }

    /// The folded wire form of all fields
    pub fn to_header_string(&mut self) -> String {
        self.headers
            .iter_mut()
            .map(Field::to_header_string)
            .collect()
    }

    fn first_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.get_first_mut(name)
    }

    pub fn subject(&mut self) -> Option<&str> {
        self.first_mut("Subject")?.text()
    }

    pub fn from(&mut self) -> Option<&MailboxList> {
        self.first_mut("From")?.mailboxes()
    }

    pub fn sender(&mut self) -> Option<&Mailbox> {
        self.first_mut("Sender")?.mailbox()
    }

    pub fn to(&mut self) -> Option<&AddressList> {
        self.first_mut("To")?.addresses()
    }

    pub fn cc(&mut self) -> Option<&AddressList> {
        self.first_mut("Cc")?.addresses()
    }

    pub fn bcc(&mut self) -> Option<&AddressList> {
        self.first_mut("Bcc")?.addresses()
    }

    pub fn reply_to(&mut self) -> Option<&AddressList> {
        self.first_mut("Reply-To")?.addresses()
    }

    pub fn date(&mut self) -> Option<&DateTime<FixedOffset>> {
        self.first_mut("Date")?.date()
    }

    pub fn message_id(&mut self) -> Option<&MessageID> {
        self.first_mut("Message-ID")?.message_id()
    }

    pub fn content_type(&mut self) -> Option<&MimeParameters> {
        self.first_mut("Content-Type")?.mime_parameters()
    }

    pub fn content_disposition(&mut self) -> Option<&MimeParameters> {
        self.first_mut("Content-Disposition")?.mime_parameters()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const MESSAGE: &str = "X-Mailer: thing\r\n\
Subject: =?UTF-8?Q?Hello=2C?=\r\n =?UTF-8?Q?_world?=\r\n\
To: a@example.com,\r\n\tb@example.com\r\n\
Received: from a by b; Tue, 1 Jul 2003 10:52:37 +0200\r\n\
From: Someone <someone@example.com>\r\n\
X-Other: value\r\n\
Received: from c by d; Tue, 1 Jul 2003 10:50:00 +0200\r\n\
\r\n\
body\r\n";

    #[test]
    fn parsing() {
        let HeaderParseResult {
            mut headers,
            body_offset,
            overall_conformance,
        } = HeaderMap::parse(MESSAGE);

        k9::assert_equal!(headers.len(), 7);
        k9::assert_equal!(&MESSAGE[body_offset..], "body\r\n");
        k9::assert_equal!(overall_conformance, HeaderConformance::default());

        k9::assert_equal!(headers.subject(), Some("Hello, world"));
        k9::assert_equal!(headers.to().map(|list| list.0.len()), Some(2));
        k9::assert_equal!(
            headers
                .from()
                .and_then(|list| list.0[0].name.as_deref())
                .map(str::to_string),
            Some("Someone".to_string())
        );
        k9::assert_equal!(headers.cc(), None);
        k9::assert_equal!(headers.iter_named("received").count(), 2);
    }

    #[test]
    fn sorting() {
        let mut headers = HeaderMap::parse(MESSAGE).headers;
        headers.sort();
        let names: Vec<&str> = headers.iter().map(|field| field.name()).collect();
        k9::assert_equal!(
            names,
            vec![
                "Received", "Received", "From", "To", "Subject", "X-Mailer", "X-Other"
            ]
        );
        // Stable among equal names
        k9::assert_equal!(
            headers[0].raw_value(),
            Some("from a by b; Tue, 1 Jul 2003 10:52:37 +0200")
        );
    }

    #[test]
    fn mutation() {
        let mut headers = HeaderMap::default();
        headers.append(Field::new("Subject", "one"));
        headers.append(Field::new("X-Tag", "a"));
        headers.append(Field::new("x-tag", "b"));
        k9::assert_equal!(headers.get_last("X-TAG").and_then(Field::raw_value), Some("b"));

        headers
            .get_first_mut("subject")
            .unwrap()
            .set_value("two")
            .unwrap();
        k9::assert_equal!(headers.remove_all_named("x-tag"), 2);
        k9::assert_equal!(headers.to_header_string(), "Subject: two\r\n");
    }

    #[test]
    fn lookup_by_borrowed_name() {
        let headers = HeaderMap::parse(MESSAGE).headers;
        let first = {
            let name = String::from("RECEIVED");
            headers.get_first(&name)
        };
        let last = {
            let name = "Received".to_ascii_lowercase();
            headers.get_last(&name)
        };
        k9::assert_equal!(
            first.and_then(Field::raw_value),
            Some("from a by b; Tue, 1 Jul 2003 10:52:37 +0200")
        );
        k9::assert_equal!(
            last.and_then(Field::raw_value),
            Some("from c by d; Tue, 1 Jul 2003 10:50:00 +0200")
        );
        k9::assert_equal!(headers.get_first("Bcc"), None);
    }

    #[test]
    fn dropped_lines() {
        let result = HeaderMap::parse("Subject: hi\r\nnot a header\r\nTo: a@example.com\r\n\r\n");
        let names: Vec<&str> = result.headers.iter().map(|field| field.name()).collect();
        k9::assert_equal!(names, vec!["Subject", "To"]);
        assert!(result
            .overall_conformance
            .contains(HeaderConformance::MISSING_COLON_VALUE));
    }

    #[test]
    fn render_round_trip() {
        let mut headers = HeaderMap::parse(MESSAGE).headers;
        let rendered = headers.to_header_string();
        let mut reparsed = HeaderMap::parse(&rendered).headers;
        k9::assert_equal!(reparsed.to_header_string(), rendered);
        k9::assert_equal!(reparsed.subject(), Some("Hello, world"));
    }
}
