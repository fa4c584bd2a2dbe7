//! Stanza shapes recognized by the dispatch loop.
//!
//! Only what routing needs is modeled: addressing, the `type` attribute,
//! the inner XML verbatim, and the few payloads the loop looks at
//! (vCards and disco#info queries). Everything else stays a [`Node`].

use std::fmt;
use std::str::FromStr;

use crate::error::DecodeError;
use crate::ns;
use crate::xml::node::{push_attr, Element, Name, Node};
use crate::xml::ToXml;

/// Addressing attributes common to every stanza.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub from: Option<String>,
    pub to: Option<String>,
    pub id: Option<String>,
}

impl Header {
    fn from_node(node: &Node) -> Self {
        Self {
            from: node.attr("from").map(str::to_string),
            to: node.attr("to").map(str::to_string),
            id: node.attr("id").map(str::to_string),
        }
    }

    fn write_attrs(&self, out: &mut String) {
        if let Some(from) = &self.from {
            push_attr(out, "from", from);
        }
        if let Some(to) = &self.to {
            push_attr(out, "to", to);
        }
        if let Some(id) = &self.id {
            push_attr(out, "id", id);
        }
    }

    /// Header for a reply: addresses swapped, id kept.
    pub fn reply(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
            id: self.id.clone(),
        }
    }
}

fn expect_local(element: &Element, expected: &'static str) -> Result<(), DecodeError> {
    if element.name().local == expected {
        Ok(())
    } else {
        Err(DecodeError::UnexpectedElement {
            expected,
            found: element.name().local.clone(),
        })
    }
}

fn is_vcard(node: &Node) -> bool {
    node.name.is(ns::VCARD, "vCard")
}

/// Write a stanza body: the verbatim inner XML when present, otherwise the
/// structured children.
fn write_stanza(
    out: &mut String,
    local: &str,
    header: &Header,
    type_: Option<&str>,
    content: &str,
    children: &[&Node],
) {
    out.push('<');
    out.push_str(local);
    header.write_attrs(out);
    if let Some(type_) = type_ {
        push_attr(out, "type", type_);
    }
    if content.is_empty() && children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    if content.is_empty() {
        for child in children {
            child.write_in(ns::COMPONENT_ACCEPT, out);
        }
    } else {
        out.push_str(content);
    }
    out.push_str("</");
    out.push_str(local);
    out.push('>');
}

/// `<message/>` stanza.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub type_: Option<String>,
    /// Text of the `<body/>` child.
    pub body: Option<String>,
    /// Inner XML, verbatim. Takes precedence over the structured fields when sending.
    pub content: String,
    /// Embedded `vcard-temp` contact card.
    pub vcard: Option<Node>,
    /// Children other than `<body/>` and the vCard.
    pub extensions: Vec<Node>,
}

impl Message {
    pub fn decode(element: &Element) -> Result<Self, DecodeError> {
        expect_local(element, "message")?;
        let node = element.node();
        Ok(Self {
            header: Header::from_node(node),
            type_: node.attr("type").map(str::to_string),
            body: node.child("body").map(|b| b.data.clone()),
            content: element.inner_xml().to_string(),
            vcard: node.nodes.iter().find(|n| is_vcard(n)).cloned(),
            extensions: node
                .nodes
                .iter()
                .filter(|n| n.name.local != "body" && !is_vcard(n))
                .cloned()
                .collect(),
        })
    }
}

impl ToXml for Message {
    fn write_xml(&self, out: &mut String) {
        let body = self
            .body
            .as_ref()
            .map(|text| Node::new(ns::COMPONENT_ACCEPT, "body").with_data(text.clone()));
        let mut children: Vec<&Node> = Vec::new();
        children.extend(body.as_ref());
        children.extend(self.vcard.as_ref());
        children.extend(self.extensions.iter());
        write_stanza(out, "message", &self.header, self.type_.as_deref(), &self.content, &children);
    }
}

/// `<presence/>` stanza.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Presence {
    pub header: Header,
    pub type_: Option<String>,
    pub show: Option<String>,
    pub status: Option<String>,
    /// Inner XML, verbatim. Takes precedence over the structured fields when sending.
    pub content: String,
    /// Children other than `<show/>` and `<status/>`.
    pub extensions: Vec<Node>,
}

impl Presence {
    pub fn decode(element: &Element) -> Result<Self, DecodeError> {
        expect_local(element, "presence")?;
        let node = element.node();
        Ok(Self {
            header: Header::from_node(node),
            type_: node.attr("type").map(str::to_string),
            show: node.child("show").map(|n| n.data.clone()),
            status: node.child("status").map(|n| n.data.clone()),
            content: element.inner_xml().to_string(),
            extensions: node
                .nodes
                .iter()
                .filter(|n| n.name.local != "show" && n.name.local != "status")
                .cloned()
                .collect(),
        })
    }
}

impl ToXml for Presence {
    fn write_xml(&self, out: &mut String) {
        let show = self
            .show
            .as_ref()
            .map(|text| Node::new(ns::COMPONENT_ACCEPT, "show").with_data(text.clone()));
        let status = self
            .status
            .as_ref()
            .map(|text| Node::new(ns::COMPONENT_ACCEPT, "status").with_data(text.clone()));
        let mut children: Vec<&Node> = Vec::new();
        children.extend(show.as_ref());
        children.extend(status.as_ref());
        children.extend(self.extensions.iter());
        write_stanza(out, "presence", &self.header, self.type_.as_deref(), &self.content, &children);
    }
}

/// The required `type` of an `<iq/>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IqType {
    Get,
    Set,
    Result,
    Error,
}

impl IqType {
    pub fn as_str(self) -> &'static str {
        match self {
            IqType::Get => "get",
            IqType::Set => "set",
            IqType::Result => "result",
            IqType::Error => "error",
        }
    }
}

impl fmt::Display for IqType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IqType {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get" => Ok(IqType::Get),
            "set" => Ok(IqType::Set),
            "result" => Ok(IqType::Result),
            "error" => Ok(IqType::Error),
            other => Err(DecodeError::InvalidIqType(Some(other.to_string()))),
        }
    }
}

/// `<iq/>` (info/query) stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iq {
    pub header: Header,
    pub type_: IqType,
    /// Inner XML, verbatim. Takes precedence over the structured fields when sending.
    pub content: String,
    pub vcard: Option<Node>,
    /// The payload child: the first child that is not a vCard.
    pub node: Option<Node>,
}

impl Iq {
    pub fn new(type_: IqType, header: Header) -> Self {
        Self {
            header,
            type_,
            content: String::new(),
            vcard: None,
            node: None,
        }
    }

    pub fn decode(element: &Element) -> Result<Self, DecodeError> {
        expect_local(element, "iq")?;
        let node = element.node();
        let type_ = node
            .attr("type")
            .ok_or(DecodeError::InvalidIqType(None))?
            .parse()?;
        Ok(Self {
            header: Header::from_node(node),
            type_,
            content: element.inner_xml().to_string(),
            vcard: node.nodes.iter().find(|n| is_vcard(n)).cloned(),
            node: node.nodes.iter().find(|n| !is_vcard(n)).cloned(),
        })
    }

    /// The payload parsed as a disco#info query, if that is what it is.
    pub fn disco_info(&self) -> Option<DiscoInfoQuery> {
        self.node.as_ref().and_then(DiscoInfoQuery::from_node)
    }
}

impl ToXml for Iq {
    fn write_xml(&self, out: &mut String) {
        let mut children: Vec<&Node> = Vec::new();
        children.extend(self.vcard.as_ref());
        children.extend(self.node.as_ref());
        write_stanza(out, "iq", &self.header, Some(self.type_.as_str()), &self.content, &children);
    }
}

/// XEP-0030 `<identity/>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub category: String,
    pub type_: String,
    pub name: Option<String>,
}

/// XEP-0030 disco#info `<query/>`, as a request or a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoInfoQuery {
    /// Optional node attribute addressing a sub-entity.
    pub node: Option<String>,
    pub identities: Vec<Identity>,
    /// `var` of every `<feature/>`.
    pub features: Vec<String>,
}

impl DiscoInfoQuery {
    /// Parse `node` if it is a disco#info query; identities or features with
    /// missing required attributes are skipped.
    pub fn from_node(node: &Node) -> Option<Self> {
        if !node.name.is(ns::DISCO_INFO, "query") {
            return None;
        }
        let identities = node
            .nodes
            .iter()
            .filter(|n| n.name.local == "identity")
            .filter_map(|n| {
                Some(Identity {
                    category: n.attr("category")?.to_string(),
                    type_: n.attr("type")?.to_string(),
                    name: n.attr("name").map(str::to_string),
                })
            })
            .collect();
        let features = node
            .nodes
            .iter()
            .filter(|n| n.name.local == "feature")
            .filter_map(|n| n.attr("var").map(str::to_string))
            .collect();
        Some(Self {
            node: node.attr("node").map(str::to_string),
            identities,
            features,
        })
    }

    pub fn to_node(&self) -> Node {
        let mut query = Node::new(ns::DISCO_INFO, "query");
        if let Some(node) = &self.node {
            query = query.with_attr("node", node.clone());
        }
        for identity in &self.identities {
            let mut child = Node::new(ns::DISCO_INFO, "identity")
                .with_attr("category", identity.category.clone())
                .with_attr("type", identity.type_.clone());
            if let Some(name) = &identity.name {
                child = child.with_attr("name", name.clone());
            }
            query = query.with_child(child);
        }
        for feature in &self.features {
            query = query.with_child(Node::new(ns::DISCO_INFO, "feature").with_attr("var", feature.clone()));
        }
        query
    }
}

impl ToXml for DiscoInfoQuery {
    fn write_xml(&self, out: &mut String) {
        self.to_node().write_xml(out);
    }
}

/// `<stream:error/>` sent by the server before it closes the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamError {
    /// Defined condition, e.g. `not-authorized`.
    pub condition: String,
    pub text: Option<String>,
}

impl StreamError {
    pub fn from_node(node: &Node) -> Option<Self> {
        if !node.name.is(ns::STREAMS, "error") {
            return None;
        }
        let condition = node
            .nodes
            .iter()
            .find(|n| n.name.local != "text")
            .map(|n| n.name.local.clone())
            .unwrap_or_else(|| "undefined-condition".to_string());
        let text = node
            .child_ns(ns::STREAM_ERRORS, "text")
            .map(|n| n.data.clone());
        Some(Self { condition, text })
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.text {
            Some(text) => write!(f, "{} ({})", self.condition, text),
            None => f.write_str(&self.condition),
        }
    }
}

/// Routing class of a top-level element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaKind {
    Message,
    Presence,
    Iq,
    Other,
}

/// Classify a top-level element by name.
///
/// Stanzas arrive in the stream's default namespace, so only the local name
/// decides; elements in the stream namespace (`stream:error`,
/// `stream:features`) are never stanzas.
pub fn classify(name: &Name) -> StanzaKind {
    if name.space == ns::STREAMS {
        return StanzaKind::Other;
    }
    match name.local.as_str() {
        "message" => StanzaKind::Message,
        "presence" => StanzaKind::Presence,
        "iq" => StanzaKind::Iq,
        _ => StanzaKind::Other,
    }
}

/// A decoded top-level element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stanza {
    Message(Message),
    Presence(Presence),
    Iq(Iq),
    Other(Node),
}

impl Stanza {
    pub fn decode(element: &Element) -> Result<Self, DecodeError> {
        Ok(match classify(element.name()) {
            StanzaKind::Message => Stanza::Message(Message::decode(element)?),
            StanzaKind::Presence => Stanza::Presence(Presence::decode(element)?),
            StanzaKind::Iq => Stanza::Iq(Iq::decode(element)?),
            StanzaKind::Other => Stanza::Other(element.node().clone()),
        })
    }

    pub fn kind(&self) -> StanzaKind {
        match self {
            Stanza::Message(_) => StanzaKind::Message,
            Stanza::Presence(_) => StanzaKind::Presence,
            Stanza::Iq(_) => StanzaKind::Iq,
            Stanza::Other(_) => StanzaKind::Other,
        }
    }
}

impl ToXml for Stanza {
    fn write_xml(&self, out: &mut String) {
        match self {
            Stanza::Message(m) => m.write_xml(out),
            Stanza::Presence(p) => p.write_xml(out),
            Stanza::Iq(iq) => iq.write_xml(out),
            Stanza::Other(node) => node.write_xml(out),
        }
    }
}
