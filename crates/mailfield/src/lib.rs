mod address;
mod error;
mod field;
mod grammar;
mod header;
mod headermap;
mod nom_utils;
mod options;
mod registry;
mod repair;
mod rfc2047;
mod structured;
mod unfold;
mod wrap;

pub use error::{FieldParseError, MailFieldError};
pub type Result<T> = std::result::Result<T, MailFieldError>;

pub use address::encode_address_value;
pub use field::{Field, FieldState};
pub use grammar::{
    AddrSpec, Address, AddressList, Mailbox, MailboxList, MessageID, MimeParameters, Parser,
};
pub use header::{split_header_block, HeaderBlock, HeaderConformance, RawHeaderLine};
pub use headermap::*;
pub use options::FieldOptions;
pub use registry::{
    dispatch, resolve, FieldKind, FieldParser, FieldRegistry, FieldRegistryBuilder, FieldType,
};
pub use repair::{
    default_detector, is_clean, needs_repair, repair_field_value, transcode_lossy,
    CharsetDetector, NormalizerDetector,
};
pub use rfc2047::{
    b_encode, collapse, decode, encode, extended_value, param_encode, q_encode, EncodedWord,
    ParamValue, Segment, WordEncoding,
};
pub use structured::{EncodeHeaderValue, FieldValue, StructuredField};
pub use unfold::{split_field, split_field_bytes, unfold, unfold_bytes};
pub use wrap::fold;
