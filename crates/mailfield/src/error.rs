use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MailFieldError {
    #[error("invalid header: {0}")]
    HeaderParse(String),
    #[error(transparent)]
    FieldParse(#[from] FieldParseError),
    #[error("cannot assign to '{name}': {source}")]
    InvalidAssignment {
        name: String,
        #[source]
        source: FieldParseError,
    },
    #[error("the field registry is already in use and can no longer be extended")]
    RegistryInitialized,
}

/// A structured grammar rejected a field value.
/// This is recoverable: passive parsing degrades the field
/// to its raw text and keeps this around for diagnostics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{element}: {reason}")]
pub struct FieldParseError {
    /// The grammar element that failed, eg: `address_list`
    pub element: String,
    /// The value that was being parsed
    pub value: String,
    /// Human readable explanation
    pub reason: String,
}

impl FieldParseError {
    pub fn new(
        element: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            element: element.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}
