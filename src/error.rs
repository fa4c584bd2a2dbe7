//! Error taxonomy for a component session.
//!
//! Every failure unwinds to the return value of [`Component::run`](crate::Component::run)
//! (or [`Component::connect`](crate::Component::connect) for dial failures). Nothing is retried.

use std::time::Duration;

/// Boxed error returned by user handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type returned by registered handlers.
pub type HandlerResult = std::result::Result<(), BoxError>;

pub type Result<T> = std::result::Result<T, ComponentError>;

/// Errors that terminate a component session.
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    /// The TCP dial failed.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The TCP dial did not complete in time.
    #[error("connect to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    /// Transport-level read or write failure on a live connection.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The server closed the connection without closing the stream.
    #[error("connection closed by server")]
    ConnectionClosed,

    /// Stream negotiation or authentication failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Malformed XML or an unexpected element shape on the stream.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A registered handler returned an error.
    #[error("handler error: {0}")]
    Handler(#[source] BoxError),

    /// The run was cancelled by the caller.
    #[error("component run cancelled")]
    Cancelled,

    /// The underlying transport cannot configure TCP keep-alive.
    #[error("transport does not support TCP keep-alive")]
    KeepAliveUnsupported,

    /// Configuration rejected before dialing.
    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

impl ComponentError {
    /// True when the session ended because cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ComponentError::Cancelled)
    }
}

/// Failures during the XEP-0114 handshake.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// The server's stream header carried no `id` attribute.
    #[error("server stream header has no id attribute")]
    MissingStreamId,

    /// Something other than a stream header arrived first.
    #[error("expected server stream header, got {0}")]
    UnexpectedHeader(String),

    /// The server did not acknowledge the handshake digest.
    #[error("authentication failed: {reason}")]
    AuthenticationFailed { reason: String },
}

/// XML decoding failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed XML: {0}")]
    Malformed(String),

    /// An end tag with no matching start at the top level of the stream.
    #[error("unexpected end tag </{0}>")]
    UnexpectedEndTag(String),

    #[error("expected <{expected}> element, got <{found}>")]
    UnexpectedElement { expected: &'static str, found: String },

    /// `<iq/>` without a valid `type` attribute.
    #[error("invalid iq type {0:?}")]
    InvalidIqType(Option<String>),

    /// The peer kept sending bytes that never formed a complete element.
    #[error("element buffer exceeded {limit} bytes")]
    BufferOverflow { limit: usize },
}
