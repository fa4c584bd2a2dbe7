//! Component session orchestrator.
//!
//! A [`Component`] owns one connection to the server. [`Component::run`]
//! drives the stage machine (handshake, then dispatch) until the server closes
//! the stream, something fails, or cancellation is observed between steps.
//! The transport is closed exactly once before `run` returns, whatever the
//! outcome.
//!
//! ```no_run
//! # async fn demo() -> xmpp_component::Result<()> {
//! use tokio_util::sync::CancellationToken;
//! use xmpp_component::{Component, Options};
//!
//! let options = Options::new("127.0.0.1:5347", "bot.example.com", "s3cr3t");
//! let mut component = Component::connect(&options).await?;
//! component.on_message(|session, message| {
//!     let mut reply = message.clone();
//!     reply.header = message.header.reply();
//!     session.send(&reply);
//!     Ok(())
//! });
//! component.run(CancellationToken::new()).await
//! # }
//! ```

pub mod dispatch;
pub mod handshake;
pub mod stage;

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{ComponentError, HandlerResult, Result};
use crate::options::Options;
use crate::stanza::{DiscoInfoQuery, Iq, Message, Presence};
use crate::transport::{self, Transport};
use crate::xml::{Node, StreamCodec, ToXml};

pub use dispatch::{Handlers, Session};
pub use handshake::{handshake_digest, stream_open};
pub use stage::{Event, Stage};

/// Cancels a running [`Component::run`] from another task.
///
/// The default handle is not attached to any component; closing it is a no-op.
#[derive(Debug, Clone, Default)]
pub struct CloseHandle(Option<CancellationToken>);

impl CloseHandle {
    /// Request cancellation. Takes effect at the next stage step, after any
    /// read currently in progress returns.
    pub fn close(&self) {
        if let Some(token) = &self.0 {
            token.cancel();
        }
    }
}

/// One component session over a transport (TCP unless substituted).
///
/// Handlers must be registered before calling [`run`](Self::run); the table
/// is not touched by anything else while the session runs.
#[derive(Debug)]
pub struct Component<T = TcpStream> {
    /// `None` once the session has ended and the transport was released.
    codec: Option<StreamCodec<T>>,
    handlers: Handlers,
    stage: Stage,
    name: String,
    shared_secret: String,
    shutdown: CancellationToken,
    outbox: Vec<u8>,
}

impl Component<TcpStream> {
    /// Dial the server and prepare a session. No XML is exchanged until [`run`](Self::run).
    pub async fn connect(options: &Options) -> Result<Self> {
        options.validate()?;
        info!(
            address = %options.address,
            component = %options.name,
            "Connecting component"
        );
        let stream = transport::dial(&options.address, options.connect_timeout()).await?;
        Self::with_transport(options, stream)
    }
}

impl<T: Transport> Component<T> {
    /// Prepare a session over an already connected transport.
    ///
    /// Applies the configured keep-alive, which fails with
    /// [`ComponentError::KeepAliveUnsupported`] on transports without one.
    pub fn with_transport(options: &Options, transport: T) -> Result<Self> {
        options.validate()?;
        if let Some(period) = options.keepalive() {
            transport.set_keepalive(period)?;
        }
        Ok(Self {
            codec: Some(StreamCodec::new(transport, options.trace_traffic)),
            handlers: Handlers::default(),
            stage: Stage::Handshake,
            name: options.name.clone(),
            shared_secret: options.shared_secret.clone(),
            shutdown: CancellationToken::new(),
            outbox: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn on_message<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&mut Session<'_>, &Message) -> HandlerResult + Send + 'static,
    {
        self.handlers.message = Box::new(handler);
        self
    }

    pub fn on_presence<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&mut Session<'_>, &Presence) -> HandlerResult + Send + 'static,
    {
        self.handlers.presence = Box::new(handler);
        self
    }

    /// Handler for every `<iq/>`, including those that also reach
    /// [`on_disco_info`](Self::on_disco_info).
    pub fn on_iq<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&mut Session<'_>, &Iq) -> HandlerResult + Send + 'static,
    {
        self.handlers.iq = Box::new(handler);
        self
    }

    pub fn on_disco_info<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&mut Session<'_>, &Iq, &DiscoInfoQuery) -> HandlerResult + Send + 'static,
    {
        self.handlers.disco_info = Box::new(handler);
        self
    }

    /// Handler for top-level elements that are not stanzas.
    pub fn on_unknown<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&mut Session<'_>, &Node) -> HandlerResult + Send + 'static,
    {
        self.handlers.unknown = Box::new(handler);
        self
    }

    /// Enable TCP keep-alive on the live connection.
    pub fn set_tcp_keepalive(&self, period: Duration) -> Result<()> {
        let codec = self.codec.as_ref().ok_or(ComponentError::ConnectionClosed)?;
        codec.transport().set_keepalive(period)
    }

    /// Request cancellation of an in-progress [`run`](Self::run).
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Handle for closing the session while `run` holds `&mut self`.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle(Some(self.shutdown.clone()))
    }

    /// Serialize `value` and write it to the stream.
    pub async fn send<X: ToXml + ?Sized>(&mut self, value: &X) -> Result<()> {
        let codec = self.codec.as_mut().ok_or(ComponentError::ConnectionClosed)?;
        codec.send(value).await
    }

    /// Write bytes directly to the connection, bypassing serialization.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let codec = self.codec.as_mut().ok_or(ComponentError::ConnectionClosed)?;
        codec.write_raw(bytes).await
    }

    /// Drive the session to completion.
    ///
    /// Returns `Ok(())` when the server closes the stream, and
    /// [`ComponentError::Cancelled`] when `cancel` or [`close`](Self::close)
    /// fired. Cancellation is checked between steps only; a blocked read is
    /// never interrupted. A component runs once: later calls fail with
    /// [`ComponentError::ConnectionClosed`].
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        if self.codec.is_none() {
            return Err(ComponentError::ConnectionClosed);
        }
        info!(component = %self.name, "Component session started");

        let result = self.drive(&cancel).await;
        self.release().await;

        match &result {
            Ok(()) => info!(component = %self.name, "Component session ended: stream closed by server"),
            Err(e) if e.is_cancelled() => info!(component = %self.name, "Component session cancelled"),
            Err(e) => error!(component = %self.name, error = %e, "Component session failed"),
        }
        result
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<()> {
        while !self.stage.is_terminal() {
            let event = match self.stage {
                _ if cancel.is_cancelled() || self.shutdown.is_cancelled() => Event::Cancelled,
                Stage::Handshake => match self.codec.as_mut() {
                    Some(codec) => match handshake::negotiate(codec, &self.name, &self.shared_secret).await {
                        Ok(()) => Event::Authenticated,
                        Err(e) => Event::Failed(e),
                    },
                    None => Event::Failed(ComponentError::ConnectionClosed),
                },
                Stage::Dispatch => self.dispatch_next().await,
                Stage::Done | Stage::Failed(_) => break,
            };
            let current = std::mem::replace(&mut self.stage, Stage::Done);
            self.stage = current.next(event);
        }

        match std::mem::replace(&mut self.stage, Stage::Done) {
            Stage::Failed(e) => Err(e),
            _ => Ok(()),
        }
    }

    /// Read one element, route it, then flush whatever the handlers queued.
    async fn dispatch_next(&mut self) -> Event {
        let Some(codec) = self.codec.as_mut() else {
            return Event::Failed(ComponentError::ConnectionClosed);
        };
        let element = match codec.next_element().await {
            Ok(Some(element)) => element,
            Ok(None) => return Event::StreamClosed,
            Err(e) => return Event::Failed(e),
        };
        debug!(element = %element.name(), "Dispatching element");

        let routed = {
            let mut session = Session::new(&self.name, &mut self.outbox);
            dispatch::route(&mut self.handlers, &mut session, &element)
        };
        // Replies queued before a handler failed still go out
        let flushed = self.flush_outbox().await;

        match routed.and(flushed) {
            Ok(()) => Event::Dispatched,
            Err(e) => Event::Failed(e),
        }
    }

    async fn flush_outbox(&mut self) -> Result<()> {
        if self.outbox.is_empty() {
            return Ok(());
        }
        let Some(codec) = self.codec.as_mut() else {
            return Err(ComponentError::ConnectionClosed);
        };
        let result = codec.write_raw(&self.outbox).await;
        self.outbox.clear();
        result
    }

    /// Shut down the write half, then drop the transport so the connection
    /// is fully closed before `run` returns.
    async fn release(&mut self) {
        let Some(mut codec) = self.codec.take() else {
            return;
        };
        if let Err(e) = codec.shutdown().await {
            debug!(error = %e, "Transport shutdown failed");
        }
        drop(codec);
        debug!(component = %self.name, "Transport closed");
    }
}
