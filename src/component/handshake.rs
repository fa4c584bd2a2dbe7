//! XEP-0114 stream negotiation and handshake.
//!
//! Protocol flow:
//! 1. Send `<stream:stream to='{name}' xmlns='jabber:component:accept' ...>` (open tag only)
//! 2. Read the server's stream header and take its `id`
//! 3. Send `<handshake>{hex(sha1(id + secret))}</handshake>`
//! 4. Read `<handshake/>` (accepted) or anything else (rejected)

use std::fmt::Write as _;

use quick_xml::escape::escape;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use crate::error::{ComponentError, HandshakeError, Result};
use crate::ns;
use crate::stanza::StreamError;
use crate::transport::Transport;
use crate::xml::{Element, Frame, StreamCodec};

/// Lowercase hex SHA-1 of `stream_id` followed by `secret`.
pub fn handshake_digest(stream_id: &str, secret: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(stream_id.as_bytes());
    hasher.update(secret.as_bytes());
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

/// Opening tag of the component stream. Never closed during the session.
pub fn stream_open(name: &str) -> String {
    format!(
        "<?xml version='1.0'?><stream:stream to='{}' xmlns='{}' xmlns:stream='{}'>",
        escape(name),
        ns::COMPONENT_ACCEPT,
        ns::STREAMS
    )
}

/// Describe a top-level element for error messages.
fn describe(element: &Element) -> String {
    match StreamError::from_node(element.node()) {
        Some(stream_error) => format!("stream error: {}", stream_error),
        None => format!("unexpected <{}> reply", element.name().local),
    }
}

fn is_acknowledgement(element: &Element) -> bool {
    let node = element.node();
    node.name.local == "handshake" && node.nodes.is_empty() && node.data.trim().is_empty()
}

/// Run the handshake to completion on a fresh stream.
pub(crate) async fn negotiate<T: Transport>(
    codec: &mut StreamCodec<T>,
    name: &str,
    shared_secret: &str,
) -> Result<()> {
    // Step 1: open our side of the stream
    debug!(component = name, "Handshake: Sending stream open");
    codec.write_raw(stream_open(name).as_bytes()).await?;

    // Step 2: server stream header carries the stream id
    let header = match codec.next_frame().await? {
        Frame::StreamOpen(header) => header,
        Frame::Element(raw) => {
            let found = match Element::parse(raw.as_str(), codec.scope()) {
                Ok(element) => describe(&element),
                Err(_) => raw,
            };
            return Err(HandshakeError::UnexpectedHeader(found).into());
        }
        Frame::StreamClose => {
            return Err(HandshakeError::UnexpectedHeader("</stream:stream>".to_string()).into());
        }
    };
    codec.set_scope(&header);
    let stream_id = header.id().ok_or(HandshakeError::MissingStreamId)?;
    debug!(stream_id, from = ?header.attr("from"), "Handshake: Received stream header");

    // Step 3: prove knowledge of the secret
    let digest = handshake_digest(stream_id, shared_secret);
    codec
        .write_raw(format!("<handshake>{}</handshake>", digest).as_bytes())
        .await?;
    debug!("Handshake: Sent digest");

    // Step 4: acknowledgement
    let reason = match codec.next_element().await {
        Ok(Some(element)) if is_acknowledgement(&element) => {
            info!(component = name, "Handshake: Accepted by server");
            return Ok(());
        }
        Ok(Some(element)) => describe(&element),
        Ok(None) => "server closed the stream".to_string(),
        Err(ComponentError::ConnectionClosed) => "connection closed".to_string(),
        Err(ComponentError::Io(e)) => format!("connection lost: {}", e),
        Err(ComponentError::Decode(e)) => format!("malformed reply: {}", e),
        Err(e) => return Err(e),
    };
    warn!(component = name, reason = %reason, "Handshake: Rejected");
    Err(HandshakeError::AuthenticationFailed { reason }.into())
}
