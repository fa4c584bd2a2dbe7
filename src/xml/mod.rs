//! Stream codec: element framing, the generic node tree, and serialization.

pub mod codec;
pub mod framing;
pub mod node;

pub use codec::{StreamCodec, MAX_ELEMENT_BUFFER_SIZE};
pub use framing::{extract_frame, Frame, StreamHeader};
pub use node::{Attribute, Element, Name, Namespaces, Node};

use crate::ns;

/// Anything that can be written to the stream as XML.
///
/// Top-level values are serialized in the `jabber:component:accept` default
/// namespace declared by the stream header.
pub trait ToXml {
    fn write_xml(&self, out: &mut String);

    fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }
}

impl ToXml for Node {
    fn write_xml(&self, out: &mut String) {
        self.write_in(ns::COMPONENT_ACCEPT, out);
    }
}

/// Pre-rendered XML, written verbatim.
impl ToXml for str {
    fn write_xml(&self, out: &mut String) {
        out.push_str(self);
    }
}

impl ToXml for String {
    fn write_xml(&self, out: &mut String) {
        out.push_str(self);
    }
}

impl<X: ToXml + ?Sized> ToXml for &X {
    fn write_xml(&self, out: &mut String) {
        (**self).write_xml(out);
    }
}
