use std::borrow::Cow;

/// All possible error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No rule matches the semantics of a required field.
    UnknownSemantics,
    /// A compact IRI uses an undeclared prefix.
    UnknownPrefix,
    /// A token is neither an IRI nor a compact IRI.
    MalformedReference,
    /// A device answered with an unexpected status or could not be reached.
    RemoteRequest,
    /// A device answered with a structurally invalid document.
    MalformedResponse,
    /// A value does not satisfy its data schema.
    InvalidValue,
    /// A write was attempted on a read-only property.
    ReadOnly,
    /// An interaction is not reachable through `HTTP`.
    UnsupportedScheme,
    /// The semantic equivalence service failed.
    Oracle,
    /// A device violated the event subscription protocol.
    Subscription,
    /// An invalid configuration was provided.
    Configuration,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::UnknownSemantics => "Unknown Semantics",
            Self::UnknownPrefix => "Unknown Prefix",
            Self::MalformedReference => "Malformed Reference",
            Self::RemoteRequest => "Remote Request",
            Self::MalformedResponse => "Malformed Response",
            Self::InvalidValue => "Invalid Value",
            Self::ReadOnly => "Read Only",
            Self::UnsupportedScheme => "Unsupported Scheme",
            Self::Oracle => "Oracle",
            Self::Subscription => "Subscription",
            Self::Configuration => "Configuration",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// A controller error.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
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
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl std::error::Error for Error {}

impl From<wotkit::Error> for Error {
    fn from(e: wotkit::Error) -> Self {
        let kind = match e.kind() {
            wotkit::ErrorKind::UnknownPrefix => ErrorKind::UnknownPrefix,
            wotkit::ErrorKind::MalformedReference => ErrorKind::MalformedReference,
            wotkit::ErrorKind::MalformedDescription => ErrorKind::MalformedResponse,
            wotkit::ErrorKind::InvalidValue => ErrorKind::InvalidValue,
        };
        Self::new(kind, e.description().to_owned())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::new(ErrorKind::RemoteRequest, format!("Request error caused by {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::MalformedResponse, format!("Json error caused by {e}"))
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
