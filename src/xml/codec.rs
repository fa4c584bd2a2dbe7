//! Incremental element reader/writer bound to a transport.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error};

use crate::error::{ComponentError, DecodeError, Result};
use crate::transport::{TracedStream, Transport};
use crate::xml::framing::{extract_frame, Frame, StreamHeader};
use crate::xml::node::{Element, Namespaces};
use crate::xml::ToXml;

/// Maximum bytes buffered while waiting for one element to complete.
///
/// Typical stanzas are a few KB; vCard avatars rarely exceed 100 KB.
/// Past this limit the peer is sending something that will never frame.
pub const MAX_ELEMENT_BUFFER_SIZE: usize = 1_024 * 1_024;

const READ_CHUNK_SIZE: usize = 8192;

/// Reads complete top-level elements from, and writes XML to, one transport.
#[derive(Debug)]
pub struct StreamCodec<T> {
    stream: TracedStream<T>,
    buffer: Vec<u8>,
    scope: Namespaces,
}

impl<T: Transport> StreamCodec<T> {
    /// Bind a codec to `transport`; `trace` installs the byte-level taps.
    pub fn new(transport: T, trace: bool) -> Self {
        Self {
            stream: TracedStream::new(transport, trace),
            buffer: Vec::new(),
            scope: Namespaces::default(),
        }
    }

    pub fn transport(&self) -> &T {
        self.stream.get_ref()
    }

    /// Namespace scope top-level elements are parsed in.
    pub fn scope(&self) -> &Namespaces {
        &self.scope
    }

    /// Adopt the namespace declarations of the peer's stream header.
    pub fn set_scope(&mut self, header: &StreamHeader) {
        self.scope = header.namespaces();
    }

    /// Block until the next frame is complete.
    pub async fn next_frame(&mut self) -> Result<Frame> {
        let mut read_buf = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some((frame, consumed)) = extract_frame(&self.buffer)? {
                self.buffer.drain(..consumed);
                return Ok(frame);
            }

            if self.buffer.len() > MAX_ELEMENT_BUFFER_SIZE {
                error!(
                    buffer_bytes = self.buffer.len(),
                    limit = MAX_ELEMENT_BUFFER_SIZE,
                    "Element buffer exceeded size limit"
                );
                return Err(DecodeError::BufferOverflow {
                    limit: MAX_ELEMENT_BUFFER_SIZE,
                }
                .into());
            }

            let n = self.stream.read(&mut read_buf).await?;
            if n == 0 {
                debug!(pending_bytes = self.buffer.len(), "Connection closed by peer");
                return Err(ComponentError::ConnectionClosed);
            }
            self.buffer.extend_from_slice(&read_buf[..n]);
        }
    }

    /// Block until the next top-level element is complete and parse it.
    ///
    /// Returns `Ok(None)` when the peer closed the stream with `</stream:stream>`.
    /// A second stream header mid-session is a decode error.
    pub async fn next_element(&mut self) -> Result<Option<Element>> {
        match self.next_frame().await? {
            Frame::Element(raw) => Ok(Some(Element::parse(raw, &self.scope)?)),
            Frame::StreamClose => Ok(None),
            Frame::StreamOpen(_) => Err(DecodeError::UnexpectedElement {
                expected: "top-level element",
                found: "stream:stream".to_string(),
            }
            .into()),
        }
    }

    /// Serialize `value` and write it to the stream.
    pub async fn send<X: ToXml + ?Sized>(&mut self, value: &X) -> Result<()> {
        let xml = value.to_xml();
        self.write_raw(xml.as_bytes()).await
    }

    /// Write bytes as-is, bypassing serialization.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Shut down the write half. The connection closes when the codec is dropped.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
