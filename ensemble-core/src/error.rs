//! Error types for the messaging core.

use std::error::Error;
use std::fmt;

/// Boxed error type carried by handlers and transports.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Errors raised while parsing, rendering, or matching subjects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectError {
    /// A subject was empty where a non-empty one is required.
    EmptySubject,
    /// A filter was empty where a non-empty one is required.
    EmptyFilter,
    /// An event name was empty.
    EmptyName,
    /// A `{placeholder}` did not occupy a whole token (e.g. `pre{x}`).
    PlaceholderNotToken { token: String },
    /// The same placeholder name appeared twice in one template.
    DuplicatePlaceholder { name: String },
    /// The match-all wildcard appeared before the final token.
    MatchAllNotTerminal,
    /// The scope's key set does not equal the template's placeholder set.
    ScopeMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    /// Rendering a subject was attempted without values for these keys.
    MissingPlaceholders { keys: Vec<String> },
    /// A scope value could not be turned into subject tokens.
    InvalidScope { reason: String },
}

impl fmt::Display for SubjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectError::EmptySubject => write!(f, "Subject cannot be empty"),
            SubjectError::EmptyFilter => write!(f, "Filter cannot be empty"),
            SubjectError::EmptyName => write!(f, "Name cannot be empty"),
            SubjectError::PlaceholderNotToken { token } => {
                write!(f, "Placeholder must occupy a whole token: {token}")
            }
            SubjectError::DuplicatePlaceholder { name } => {
                write!(f, "Duplicate placeholder: {name}")
            }
            SubjectError::MatchAllNotTerminal => {
                write!(f, "Match-all wildcard is only allowed as the final token")
            }
            SubjectError::ScopeMismatch {
                missing,
                unexpected,
            } => {
                write!(
                    f,
                    "Scope keys do not match template placeholders. Missing in template: {missing:?}, unexpected in template: {unexpected:?}"
                )
            }
            SubjectError::MissingPlaceholders { keys } => {
                write!(f, "Cannot render subject. Missing placeholders: {keys:?}")
            }
            SubjectError::InvalidScope { reason } => {
                write!(f, "Invalid scope: {reason}")
            }
        }
    }
}

impl Error for SubjectError {}

/// Errors raised by a [`Codec`](crate::codec::Codec) implementation.
#[derive(Debug, Clone)]
pub enum CodecError {
    Encode { reason: String },
    Decode { reason: String },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Encode { reason } => write!(f, "Encode error: {reason}"),
            CodecError::Decode { reason } => write!(f, "Decode error: {reason}"),
        }
    }
}

impl Error for CodecError {}

/// Errors raised when decoding a delivered envelope on access.
///
/// Covers payload and header decoding as well as scope extraction from a
/// subject too short to cover the template placeholders.
#[derive(Debug, Clone)]
pub enum DecodeError {
    Payload { reason: String },
    Headers { reason: String },
    Scope { reason: String },
    /// The delivered subject has no token at the placeholder's index.
    MissingToken { key: String, index: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Payload { reason } => write!(f, "Cannot decode payload: {reason}"),
            DecodeError::Headers { reason } => write!(f, "Cannot decode headers: {reason}"),
            DecodeError::Scope { reason } => write!(f, "Cannot decode scope: {reason}"),
            DecodeError::MissingToken { key, index } => {
                write!(f, "Invalid subject. Missing placeholder: {key} (index: {index})")
            }
        }
    }
}

impl Error for DecodeError {}

/// Errors surfaced by bus operations.
#[derive(Debug)]
pub enum BusError {
    /// A request did not receive a reply in time.
    Timeout,
    /// The subscription scope closed before any reply arrived.
    NoReply,
    /// A reply was already sent for this request.
    AlreadyReplied,
    /// The transport is not connected.
    NotConnected,
    /// The operation is not supported by this transport.
    Unsupported(&'static str),
    /// A subject could not be rendered from the given scope.
    Render(SubjectError),
    /// A payload or header could not be encoded or decoded.
    Codec(CodecError),
    /// The underlying transport failed.
    Transport(BoxError),
}

impl BusError {
    /// Construct a `Transport` variant from any error type.
    ///
    /// Used by transport crates to wrap driver-specific errors.
    pub fn transport(err: impl Error + Send + Sync + 'static) -> Self {
        BusError::Transport(Box::new(err))
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Timeout => write!(f, "Timed out waiting for a reply"),
            BusError::NoReply => write!(f, "No reply received"),
            BusError::AlreadyReplied => write!(f, "A reply was already sent for this request"),
            BusError::NotConnected => write!(f, "Transport is not connected"),
            BusError::Unsupported(what) => write!(f, "Unsupported operation: {what}"),
            BusError::Render(err) => write!(f, "Cannot render subject: {err}"),
            BusError::Codec(err) => write!(f, "Codec error: {err}"),
            BusError::Transport(err) => write!(f, "Transport error: {err}"),
        }
    }
}

impl Error for BusError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BusError::Render(err) => Some(err),
            BusError::Codec(err) => Some(err),
            BusError::Transport(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<SubjectError> for BusError {
    fn from(err: SubjectError) -> Self {
        BusError::Render(err)
    }
}

impl From<CodecError> for BusError {
    fn from(err: CodecError) -> Self {
        BusError::Codec(err)
    }
}
