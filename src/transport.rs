//! Transport adapter: the raw duplex byte stream under the XML stream.
//!
//! Knows nothing about XMPP. Provides the TCP dial, optional byte-level
//! tracing taps, and the keep-alive capability.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
use tracing::{debug, error, info};

use crate::error::{ComponentError, Result};

/// `tracing` target for raw traffic events emitted by [`TracedStream`].
pub const TRAFFIC_TARGET: &str = "xmpp_component::traffic";

/// A duplex byte stream a component session can run over.
///
/// Keep-alive is an optional capability: transports that are not TCP sockets
/// keep the default implementation, which reports
/// [`ComponentError::KeepAliveUnsupported`].
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {
    fn set_keepalive(&self, period: Duration) -> Result<()> {
        let _ = period;
        Err(ComponentError::KeepAliveUnsupported)
    }
}

/// Round a keep-alive period up to whole seconds, the unit the kernel takes.
pub fn keepalive_period(period: Duration) -> Duration {
    let secs = period.as_secs() + u64::from(period.subsec_nanos() > 0);
    Duration::from_secs(secs.max(1))
}

impl Transport for TcpStream {
    /// Idle time before the first probe and the interval between probes are
    /// both set to `period`.
    fn set_keepalive(&self, period: Duration) -> Result<()> {
        let period = keepalive_period(period);
        let keepalive = socket2::TcpKeepalive::new().with_time(period);
        #[cfg(any(
            target_os = "android",
            target_os = "freebsd",
            target_os = "ios",
            target_os = "linux",
            target_os = "macos",
            target_os = "netbsd",
            target_os = "windows",
        ))]
        let keepalive = keepalive.with_interval(period);
        socket2::SockRef::from(self).set_tcp_keepalive(&keepalive)?;
        debug!(period_secs = period.as_secs(), "TCP keep-alive enabled");
        Ok(())
    }
}

/// In-memory transport, used for tests and in-process bridges.
impl Transport for DuplexStream {}

/// Dial `address` (`host:port`) with a bounded connect time.
pub async fn dial(address: &str, timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
        .await
        .map_err(|_| {
            error!(address, timeout_secs = timeout.as_secs(), "TCP connect timed out");
            ComponentError::ConnectTimeout {
                address: address.to_string(),
                timeout,
            }
        })?
        .map_err(|e| {
            error!(address, error = %e, error_kind = ?e.kind(), "TCP connect failed");
            ComponentError::Connect {
                address: address.to_string(),
                source: e,
            }
        })?;
    info!(address, "Connected (TCP)");
    Ok(stream)
}

/// Pass-through wrapper that logs every byte read and written when enabled.
///
/// Bytes are forwarded unchanged; logging never affects the data path.
#[derive(Debug)]
pub struct TracedStream<T> {
    inner: T,
    enabled: bool,
}

impl<T> TracedStream<T> {
    pub fn new(inner: T, enabled: bool) -> Self {
        Self { inner, enabled }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for TracedStream<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if this.enabled {
            if let Poll::Ready(Ok(())) = &poll {
                let data = &buf.filled()[before..];
                if !data.is_empty() {
                    debug!(target: TRAFFIC_TARGET, bytes = data.len(), data = %String::from_utf8_lossy(data), "RECV");
                }
            }
        }
        poll
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for TracedStream<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if this.enabled {
            if let Poll::Ready(Ok(n)) = &poll {
                let data = &buf[..*n];
                debug!(target: TRAFFIC_TARGET, bytes = data.len(), data = %String::from_utf8_lossy(data), "SEND");
            }
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
