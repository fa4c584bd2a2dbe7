//! Handler table and element routing for the dispatch stage.

use crate::error::{ComponentError, HandlerResult, Result};
use crate::stanza::{classify, DiscoInfoQuery, Iq, Message, Presence, StanzaKind};
use crate::xml::{Element, Node, ToXml};

pub type MessageHandler = Box<dyn FnMut(&mut Session<'_>, &Message) -> HandlerResult + Send>;
pub type PresenceHandler = Box<dyn FnMut(&mut Session<'_>, &Presence) -> HandlerResult + Send>;
pub type IqHandler = Box<dyn FnMut(&mut Session<'_>, &Iq) -> HandlerResult + Send>;
pub type DiscoInfoHandler =
    Box<dyn FnMut(&mut Session<'_>, &Iq, &DiscoInfoQuery) -> HandlerResult + Send>;
pub type UnknownHandler = Box<dyn FnMut(&mut Session<'_>, &Node) -> HandlerResult + Send>;

/// Per-session handler slots. Every slot starts as a no-op that succeeds.
pub struct Handlers {
    pub(crate) message: MessageHandler,
    pub(crate) presence: PresenceHandler,
    pub(crate) iq: IqHandler,
    pub(crate) disco_info: DiscoInfoHandler,
    pub(crate) unknown: UnknownHandler,
}

impl Default for Handlers {
    fn default() -> Self {
        Self {
            message: Box::new(|_, _| Ok(())),
            presence: Box::new(|_, _| Ok(())),
            iq: Box::new(|_, _| Ok(())),
            disco_info: Box::new(|_, _, _| Ok(())),
            unknown: Box::new(|_, _| Ok(())),
        }
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers").finish_non_exhaustive()
    }
}

/// Handle passed to handlers for replying on the stream.
///
/// Handlers are synchronous: writes are queued and flushed by the dispatch
/// loop as soon as the handler returns, before the next element is read.
#[derive(Debug)]
pub struct Session<'a> {
    name: &'a str,
    outbox: &'a mut Vec<u8>,
}

impl<'a> Session<'a> {
    pub(crate) fn new(name: &'a str, outbox: &'a mut Vec<u8>) -> Self {
        Self { name, outbox }
    }

    /// The component's own address.
    pub fn name(&self) -> &str {
        self.name
    }

    /// Queue `value` for sending.
    pub fn send<X: ToXml + ?Sized>(&mut self, value: &X) {
        self.outbox.extend_from_slice(value.to_xml().as_bytes());
    }

    /// Queue raw bytes for sending, bypassing serialization.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.outbox.extend_from_slice(bytes);
    }
}

/// Decode `element` and invoke the handler(s) for its kind.
///
/// For an `<iq/>` carrying a disco#info query the generic iq handler runs
/// first, then the disco-info handler. A handler error stops routing at once.
pub(crate) fn route(handlers: &mut Handlers, session: &mut Session<'_>, element: &Element) -> Result<()> {
    match classify(element.name()) {
        StanzaKind::Message => {
            let message = Message::decode(element)?;
            (handlers.message)(session, &message).map_err(ComponentError::Handler)
        }
        StanzaKind::Presence => {
            let presence = Presence::decode(element)?;
            (handlers.presence)(session, &presence).map_err(ComponentError::Handler)
        }
        StanzaKind::Iq => {
            let iq = Iq::decode(element)?;
            (handlers.iq)(session, &iq).map_err(ComponentError::Handler)?;
            if let Some(query) = iq.disco_info() {
                (handlers.disco_info)(session, &iq, &query).map_err(ComponentError::Handler)?;
            }
            Ok(())
        }
        StanzaKind::Other => (handlers.unknown)(session, element.node()).map_err(ComponentError::Handler),
    }
}
