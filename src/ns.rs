//! XML namespaces used on a component stream.

/// Default namespace of a XEP-0114 component stream.
pub const COMPONENT_ACCEPT: &str = "jabber:component:accept";

/// Namespace bound to the `stream:` prefix.
pub const STREAMS: &str = "http://etherx.jabber.org/streams";

/// Defined conditions inside `<stream:error/>`.
pub const STREAM_ERRORS: &str = "urn:ietf:params:xml:ns:xmpp-streams";

/// XEP-0030 service discovery, info query.
pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";

/// XEP-0054 vCard.
pub const VCARD: &str = "vcard-temp";
