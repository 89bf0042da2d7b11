use std::borrow::Cow;

/// All possible error kinds raised while decoding or validating a
/// Thing Description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A compact IRI uses a prefix which is not declared in the `@context`.
    UnknownPrefix,
    /// A token is neither a fully-qualified IRI nor a `prefix:local` pair.
    MalformedReference,
    /// The document does not have the structure of a Thing Description.
    MalformedDescription,
    /// A value does not satisfy its data schema.
    InvalidValue,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::UnknownPrefix => "Unknown Prefix",
            Self::MalformedReference => "Malformed Reference",
            Self::MalformedDescription => "Malformed Description",
            Self::InvalidValue => "Invalid Value",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// A model error.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn malformed(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::MalformedDescription, description)
    }

    pub(crate) fn invalid_value(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidValue, description)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::malformed(format!("Json error caused by {e}"))
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
