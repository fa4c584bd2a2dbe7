//! Generic XML node tree.
//!
//! A [`Node`] is any element: a namespace-qualified name, its attributes,
//! its character data and its child elements. It is the fallback decode
//! target for unrecognized stanzas and the shape of embedded payloads
//! (vCards, disco queries, arbitrary extensions).
//!
//! Stanza fragments are parsed outside the document that declares their
//! namespaces (`<stream:stream xmlns='jabber:component:accept' ...>`), so
//! parsing takes the stream-level [`Namespaces`] as the starting scope.

use std::borrow::Cow;
use std::ops::Range;

use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::DecodeError;

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Namespace-qualified element name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Name {
    /// Resolved namespace URI (empty when unqualified).
    pub space: String,
    pub local: String,
}

impl Name {
    pub fn new(space: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            space: space.into(),
            local: local.into(),
        }
    }

    pub fn is(&self, space: &str, local: &str) -> bool {
        self.space == space && self.local == local
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.space.is_empty() {
            f.write_str(&self.local)
        } else {
            write!(f, "{{{}}}{}", self.space, self.local)
        }
    }
}

/// Attribute as it appeared on the wire: raw qualified name, unescaped value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An arbitrary XML element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub name: Name,
    /// Attributes in document order (the set is unordered for comparison purposes
    /// on the wire, but order is kept for faithful re-serialization).
    pub attributes: Vec<Attribute>,
    /// Character data directly inside this element, concatenated.
    pub data: String,
    pub nodes: Vec<Node>,
}

impl Node {
    pub fn new(space: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            name: Name::new(space, local),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute::new(name, value));
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.nodes.push(child);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// First child with the given local name, in any namespace.
    pub fn child(&self, local: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name.local == local)
    }

    pub fn child_ns(&self, space: &str, local: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name.is(space, local))
    }

    /// Serialize with `parent_space` as the inherited default namespace.
    ///
    /// An `xmlns` declaration is emitted only when this node's namespace differs
    /// from the inherited one and the attributes do not already declare it.
    pub fn write_in(&self, parent_space: &str, out: &mut String) {
        out.push('<');
        out.push_str(&self.name.local);
        let declares_default = self.attributes.iter().any(|a| a.name == "xmlns");
        if !self.name.space.is_empty() && self.name.space != parent_space && !declares_default {
            push_attr(out, "xmlns", &self.name.space);
        }
        for attr in &self.attributes {
            push_attr(out, &attr.name, &attr.value);
        }
        if self.data.is_empty() && self.nodes.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        out.push_str(&escape(self.data.as_str()));
        let space = if self.name.space.is_empty() {
            parent_space
        } else {
            &self.name.space
        };
        for child in &self.nodes {
            child.write_in(space, out);
        }
        out.push_str("</");
        out.push_str(&self.name.local);
        out.push('>');
    }
}

/// Append ` name='value'` with the value escaped.
pub(crate) fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("='");
    out.push_str(&escape(value));
    out.push('\'');
}

/// In-scope namespace declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespaces {
    default: String,
    prefixes: Vec<(String, String)>,
}

impl Namespaces {
    pub fn with_default(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            prefixes: Vec::new(),
        }
    }

    pub fn default_namespace(&self) -> &str {
        &self.default
    }

    /// Scope of an element carrying `attributes`, nested in `self`.
    pub fn nested(&self, attributes: &[Attribute]) -> Namespaces {
        let mut scope = self.clone();
        for attr in attributes {
            if attr.name == "xmlns" {
                scope.default = attr.value.clone();
            } else if let Some(prefix) = attr.name.strip_prefix("xmlns:") {
                scope.prefixes.retain(|(p, _)| p != prefix);
                scope.prefixes.push((prefix.to_string(), attr.value.clone()));
            }
        }
        scope
    }

    /// Resolve an element prefix. Unbound prefixes resolve to themselves.
    pub fn resolve(&self, prefix: Option<&str>) -> String {
        match prefix {
            None => self.default.clone(),
            Some("xml") => XML_NAMESPACE.to_string(),
            Some(prefix) => self
                .prefixes
                .iter()
                .find(|(p, _)| p == prefix)
                .map(|(_, uri)| uri.clone())
                .unwrap_or_else(|| prefix.to_string()),
        }
    }
}

/// Decode the attributes of a start tag.
pub(crate) fn read_attributes(start: &BytesStart<'_>) -> Result<Vec<Attribute>, DecodeError> {
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| DecodeError::Malformed(e.to_string()))?;
        let name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = unescape_text(&attr.value)?.into_owned();
        attributes.push(Attribute { name, value });
    }
    Ok(attributes)
}

fn unescape_text(raw: &[u8]) -> Result<Cow<'static, str>, DecodeError> {
    let text = String::from_utf8_lossy(raw);
    unescape(&text)
        .map(|s| Cow::Owned(s.into_owned()))
        .map_err(|e| DecodeError::Malformed(e.to_string()))
}

fn open_node(start: &BytesStart<'_>, scope: &Namespaces) -> Result<(Node, Namespaces), DecodeError> {
    let attributes = read_attributes(start)?;
    let scope = scope.nested(&attributes);
    let qname = start.name();
    let prefix = qname
        .prefix()
        .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned());
    let local = String::from_utf8_lossy(qname.local_name().as_ref()).into_owned();
    let node = Node {
        name: Name {
            space: scope.resolve(prefix.as_deref()),
            local,
        },
        attributes,
        data: String::new(),
        nodes: Vec::new(),
    };
    Ok((node, scope))
}

/// One complete top-level element read from the stream.
///
/// Keeps the raw XML alongside the parsed tree so stanza shapes can expose
/// their inner XML verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    raw: String,
    node: Node,
    inner: Range<usize>,
}

impl Element {
    /// Parse one complete element, resolving namespaces against `scope`.
    pub fn parse(raw: impl Into<String>, scope: &Namespaces) -> Result<Element, DecodeError> {
        let raw = raw.into();
        let (node, inner) = parse_tree(&raw, scope)?;
        Ok(Element { raw, node, inner })
    }

    pub fn name(&self) -> &Name {
        &self.node.name
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn into_node(self) -> Node {
        self.node
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Everything between the start and end tag, verbatim.
    pub fn inner_xml(&self) -> &str {
        &self.raw[self.inner.clone()]
    }
}

fn parse_tree(raw: &str, scope: &Namespaces) -> Result<(Node, Range<usize>), DecodeError> {
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text(false);
    reader.config_mut().check_end_names = true;

    let mut stack: Vec<(Node, Namespaces)> = Vec::new();
    let mut inner_start = 0;

    loop {
        let pos = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let parent = stack.last().map(|(_, ns)| ns).unwrap_or(scope);
                let (node, ns) = open_node(&e, parent)?;
                if stack.is_empty() {
                    inner_start = reader.buffer_position() as usize;
                }
                stack.push((node, ns));
            }
            Ok(Event::Empty(e)) => {
                let parent = stack.last().map(|(_, ns)| ns).unwrap_or(scope);
                let (node, _) = open_node(&e, parent)?;
                match stack.last_mut() {
                    Some((parent, _)) => parent.nodes.push(node),
                    None => {
                        let end = reader.buffer_position() as usize;
                        return Ok((node, end..end));
                    }
                }
            }
            Ok(Event::End(e)) => {
                let Some((node, _)) = stack.pop() else {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    return Err(DecodeError::UnexpectedEndTag(name));
                };
                match stack.last_mut() {
                    Some((parent, _)) => parent.nodes.push(node),
                    None => return Ok((node, inner_start..pos)),
                }
            }
            Ok(Event::Text(t)) => {
                if let Some((node, _)) = stack.last_mut() {
                    node.data.push_str(&unescape_text(&t)?);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some((node, _)) = stack.last_mut() {
                    node.data.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::Eof) => {
                return Err(DecodeError::Malformed(
                    "element ended before its closing tag".to_string(),
                ));
            }
            Ok(_) => {
                // Declarations, comments, processing instructions
            }
            Err(e) => return Err(DecodeError::Malformed(e.to_string())),
        }
    }
}
