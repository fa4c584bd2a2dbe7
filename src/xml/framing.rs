//! Top-level element boundary detection on an open XML stream.
//!
//! The stream root (`<stream:stream>`) stays open for the whole session, so a
//! document parser never sees a complete document. Instead the byte buffer is
//! scanned for the next complete *child* of the root: the stream header, one
//! top-level element, or the closing `</stream:stream>`.

use quick_xml::errors::{IllFormedError, SyntaxError};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::DecodeError;
use crate::xml::node::{read_attributes, Attribute, Namespaces};

/// One unit read off the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The peer's `<stream:stream ...>` opening tag.
    StreamOpen(StreamHeader),
    /// One complete top-level element, raw.
    Element(String),
    /// `</stream:stream>`.
    StreamClose,
}

/// Attributes of the peer's stream header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamHeader {
    pub attributes: Vec<Attribute>,
}

impl StreamHeader {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Stream identifier assigned by the server.
    pub fn id(&self) -> Option<&str> {
        self.attr("id").filter(|id| !id.is_empty())
    }

    /// Namespace scope the header establishes for every top-level element.
    pub fn namespaces(&self) -> Namespaces {
        Namespaces::default().nested(&self.attributes)
    }
}

/// State machine for element boundary detection.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ParserState {
    /// Between elements, or before the stream header.
    Idle,
    /// Inside a top-level element, collecting events.
    InElement,
}

fn bytes_to_string(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn is_stream_root(name: &[u8], local: &[u8]) -> bool {
    local == b"stream" || name == b"stream:stream"
}

/// Longest markup opener (`<![CDATA[`) quick-xml needs to classify `<!` markup.
const BANG_MARKUP_LOOKAHEAD: usize = 9;

/// Extract the next frame from the start of `buffer`.
///
/// Returns `Ok(Some((frame, bytes_consumed)))` when a complete frame is
/// available, `Ok(None)` when more bytes are needed, and an error when the
/// bytes can never become well-formed.
pub fn extract_frame(buffer: &[u8]) -> Result<Option<(Frame, usize)>, DecodeError> {
    // A bare closing tag has no matching start in the buffer; check it first
    let trimmed = buffer
        .iter()
        .position(|&b| b != b' ' && b != b'\t' && b != b'\n' && b != b'\r');
    if let Some(start) = trimmed {
        if buffer[start..].starts_with(b"</stream:stream>") {
            return Ok(Some((Frame::StreamClose, start + b"</stream:stream>".len())));
        }
    }

    let mut reader = Reader::from_reader(buffer);
    reader.config_mut().trim_text(false);
    reader.config_mut().check_end_names = true;

    let mut depth: u32 = 0;
    let mut state = ParserState::Idle;
    let mut element_start: usize = 0;

    loop {
        let pos = reader.buffer_position() as usize;

        match reader.read_event() {
            Ok(Event::Decl(_)) | Ok(Event::PI(_)) | Ok(Event::Comment(_)) | Ok(Event::DocType(_)) => {
                continue;
            }
            Ok(Event::Start(e)) => {
                if state == ParserState::Idle && is_stream_root(e.name().as_ref(), e.name().local_name().as_ref()) {
                    let header = StreamHeader {
                        attributes: read_attributes(&e)?,
                    };
                    let tag_end = reader.buffer_position() as usize;
                    return Ok(Some((Frame::StreamOpen(header), tag_end)));
                }

                depth += 1;
                if state == ParserState::Idle && depth == 1 {
                    state = ParserState::InElement;
                    element_start = pos;
                }
            }
            Ok(Event::Empty(e)) => {
                // Self-closing stream header: open and close at once
                if state == ParserState::Idle && is_stream_root(e.name().as_ref(), e.name().local_name().as_ref()) {
                    let header = StreamHeader {
                        attributes: read_attributes(&e)?,
                    };
                    let tag_end = reader.buffer_position() as usize;
                    return Ok(Some((Frame::StreamOpen(header), tag_end)));
                }

                // Self-closing top-level element, e.g. <handshake/>
                if state == ParserState::Idle && depth == 0 {
                    let tag_end = reader.buffer_position() as usize;
                    return Ok(Some((Frame::Element(bytes_to_string(&buffer[pos..tag_end])), tag_end)));
                }
            }
            Ok(Event::Text(_)) | Ok(Event::CData(_)) => {
                // Whitespace keep-alives between elements land here too
            }
            Ok(Event::End(e)) => {
                if depth == 0 {
                    if is_stream_root(e.name().as_ref(), e.name().local_name().as_ref()) {
                        let tag_end = reader.buffer_position() as usize;
                        return Ok(Some((Frame::StreamClose, tag_end)));
                    }
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    return Err(DecodeError::UnexpectedEndTag(name));
                }

                depth -= 1;
                if state == ParserState::InElement && depth == 0 {
                    let tag_end = reader.buffer_position() as usize;
                    return Ok(Some((
                        Frame::Element(bytes_to_string(&buffer[element_start..tag_end])),
                        tag_end,
                    )));
                }
            }
            Ok(Event::Eof) => {
                return Ok(None);
            }
            Err(quick_xml::Error::IllFormed(IllFormedError::UnmatchedEndTag(name))) => {
                // An end tag with nothing open in this buffer: only the stream root may close here
                if name == "stream:stream" || name == "stream" {
                    let tag_end = buffer[pos..]
                        .iter()
                        .position(|&b| b == b'>')
                        .map_or(buffer.len(), |i| pos + i + 1);
                    return Ok(Some((Frame::StreamClose, tag_end)));
                }
                return Err(DecodeError::UnexpectedEndTag(name));
            }
            Err(quick_xml::Error::Syntax(
                SyntaxError::UnclosedTag
                | SyntaxError::UnclosedComment
                | SyntaxError::UnclosedCData
                | SyntaxError::UnclosedDoctype
                | SyntaxError::UnclosedPIOrXmlDecl,
            )) => {
                // Expected during TCP streaming: the rest arrives with the next read
                return Ok(None);
            }
            Err(quick_xml::Error::Syntax(SyntaxError::InvalidBangMarkup))
                if buffer.len() - pos < BANG_MARKUP_LOOKAHEAD =>
            {
                return Ok(None);
            }
            Err(e) => {
                return Err(DecodeError::Malformed(e.to_string()));
            }
        }
    }
}
