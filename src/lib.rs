//! XEP-0114 external component client.
//!
//! Connects to an XMPP server's component port, authenticates with the
//! shared-secret handshake, then routes every incoming top-level element to
//! the handler registered for its kind until the stream ends, a handler
//! fails, or the caller cancels.
//!
//! Logging goes through `tracing`; install a subscriber in the host program
//! to see it. Raw traffic is logged under the
//! [`TRAFFIC_TARGET`](transport::TRAFFIC_TARGET) target when
//! [`Options::trace_traffic`] is set.

pub mod component;
pub mod error;
pub mod ns;
pub mod options;
pub mod stanza;
pub mod transport;
pub mod xml;

pub use component::{CloseHandle, Component, Session};
pub use error::{BoxError, ComponentError, DecodeError, HandlerResult, HandshakeError, Result};
pub use options::Options;
pub use stanza::{
    DiscoInfoQuery, Header, Identity, Iq, IqType, Message, Presence, Stanza, StanzaKind, StreamError,
};
pub use transport::Transport;
pub use xml::{Element, Name, Node, ToXml};
