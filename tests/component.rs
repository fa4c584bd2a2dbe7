use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use xmpp_component::{
    Component, ComponentError, DiscoInfoQuery, HandshakeError, Identity, Iq, IqType, Message,
    Options, Transport,
};

const SERVER_HEADER: &str = "<?xml version='1.0'?><stream:stream xmlns:stream='http://etherx.jabber.org/streams' xmlns='jabber:component:accept' from='bot.example.com' id='3BF96D32'>";

/// sha1("3BF96D32" + "secret")
const DIGEST: &str = "b09ea9b3b7f586be8a08d0a3dd7466f110aeb136";

const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Scripted server end of a component connection.
struct FakeServer<S> {
    io: S,
    received: String,
    cursor: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FakeServer<S> {
    fn new(io: S) -> Self {
        Self {
            io,
            received: String::new(),
            cursor: 0,
        }
    }

    /// Read until `needle` arrives; returns everything up to and including it.
    async fn expect(&mut self, needle: &str) -> String {
        loop {
            if let Some(pos) = self.received[self.cursor..].find(needle) {
                let end = self.cursor + pos + needle.len();
                let chunk = self.received[self.cursor..end].to_string();
                self.cursor = end;
                return chunk;
            }
            let mut buf = [0u8; 4096];
            let n = tokio::time::timeout(IO_TIMEOUT, self.io.read(&mut buf))
                .await
                .expect("timed out waiting for component")
                .expect("read from component");
            assert!(
                n > 0,
                "component closed before sending {:?}; pending {:?}",
                needle,
                &self.received[self.cursor..]
            );
            self.received.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
    }

    async fn send(&mut self, xml: &str) {
        self.io.write_all(xml.as_bytes()).await.expect("write to component");
    }

    /// Play the server side of a successful handshake.
    async fn accept_handshake(&mut self) {
        let open = self
            .expect("xmlns:stream='http://etherx.jabber.org/streams'>")
            .await;
        assert!(open.contains("to='bot.example.com'"), "stream open: {}", open);
        self.send(SERVER_HEADER).await;
        self.expect(&format!("<handshake>{}</handshake>", DIGEST)).await;
        self.send("<handshake/>").await;
    }

    /// Wait for the component to close its side of the connection.
    async fn expect_eof(&mut self) {
        let mut buf = [0u8; 4096];
        loop {
            let n = tokio::time::timeout(IO_TIMEOUT, self.io.read(&mut buf))
                .await
                .expect("timed out waiting for component to close")
                .expect("read from component");
            if n == 0 {
                return;
            }
        }
    }
}

fn options() -> Options {
    Options::new("in-memory", "bot.example.com", "secret")
}

fn duplex_component() -> (Component<DuplexStream>, FakeServer<DuplexStream>) {
    let (client, server) = tokio::io::duplex(16 * 1024);
    let component = Component::with_transport(&options(), client).expect("component");
    (component, FakeServer::new(server))
}

#[derive(Debug, Default)]
struct Calls {
    message: Vec<String>,
    presence: usize,
    iq: Vec<String>,
    disco: Vec<String>,
    unknown: Vec<String>,
}

/// Register handlers on every slot that only record what they saw.
fn record_calls<T: Transport>(component: &mut Component<T>) -> Arc<Mutex<Calls>> {
    let calls = Arc::new(Mutex::new(Calls::default()));
    let (c1, c2, c3, c4, c5) = (
        calls.clone(),
        calls.clone(),
        calls.clone(),
        calls.clone(),
        calls.clone(),
    );
    component
        .on_message(move |_, m| {
            c1.lock().unwrap().message.push(format!(
                "{}:{}",
                m.type_.as_deref().unwrap_or(""),
                m.content
            ));
            Ok(())
        })
        .on_presence(move |_, _| {
            c2.lock().unwrap().presence += 1;
            Ok(())
        })
        .on_iq(move |_, iq| {
            c3.lock().unwrap().iq.push(iq.header.id.clone().unwrap_or_default());
            Ok(())
        })
        .on_disco_info(move |_, iq, _| {
            c4.lock().unwrap().disco.push(iq.header.id.clone().unwrap_or_default());
            Ok(())
        })
        .on_unknown(move |_, node| {
            c5.lock().unwrap().unknown.push(node.name.to_string());
            Ok(())
        });
    calls
}

/// Transport that counts write-half shutdowns and drops.
struct CountingTransport {
    inner: DuplexStream,
    shutdowns: Arc<AtomicUsize>,
    drops: Arc<AtomicUsize>,
}

impl Drop for CountingTransport {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

impl AsyncRead for CountingTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for CountingTransport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_shutdown(cx);
        if poll.is_ready() {
            this.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
        poll
    }
}

impl Transport for CountingTransport {}

#[tokio::test]
async fn test_full_session_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake server listener");
    let address = listener.local_addr().expect("listener addr").to_string();

    let fake_server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.expect("accept component");
        let mut server = FakeServer::new(socket);
        server.accept_handshake().await;

        server
            .send("<message from='user@example.com/res' to='bot.example.com' type='chat' id='m1'><body>hello</body></message>")
            .await;
        let echo = server.expect("</message>").await;

        server
            .send("<iq from='user@example.com/res' to='bot.example.com' type='get' id='disco1'><query xmlns='http://jabber.org/protocol/disco#info'/></iq>")
            .await;
        let disco = server.expect("</iq>").await;

        server.send("</stream:stream>").await;
        server.expect_eof().await;
        (echo, disco)
    });

    let options = Options::new(address, "bot.example.com", "secret")
        .with_keepalive(Duration::from_secs(30))
        .trace_traffic(true);
    let mut component = Component::connect(&options).await.expect("connect");
    component
        .on_message(|session, m| {
            let reply = Message {
                header: m.header.reply(),
                type_: m.type_.clone(),
                body: m.body.clone(),
                ..Default::default()
            };
            session.send(&reply);
            Ok(())
        })
        .on_disco_info(|session, iq, _| {
            let mut result = Iq::new(IqType::Result, iq.header.reply());
            let query = DiscoInfoQuery {
                node: None,
                identities: vec![Identity {
                    category: "component".to_string(),
                    type_: "generic".to_string(),
                    name: Some("Echo".to_string()),
                }],
                features: vec!["http://jabber.org/protocol/disco#info".to_string()],
            };
            result.node = Some(query.to_node());
            session.send(&result);
            Ok(())
        });

    component.run(CancellationToken::new()).await.expect("run");

    let (echo, disco) = fake_server.await.expect("fake server");
    assert_eq!(
        echo,
        "<message from='bot.example.com' to='user@example.com/res' id='m1' type='chat'><body>hello</body></message>"
    );
    assert!(disco.starts_with("<iq from='bot.example.com' to='user@example.com/res' id='disco1' type='result'>"));
    assert!(disco.contains("<identity category='component' type='generic' name='Echo'/>"));
}

#[tokio::test]
async fn test_each_kind_reaches_only_its_handler() {
    let (mut component, mut server) = duplex_component();
    let calls = record_calls(&mut component);

    let script = tokio::spawn(async move {
        server.accept_handshake().await;
        server.send(r#"<message to="a" type="chat">hi</message>"#).await;
        server
            .send(r#"<iq type="get" id="1"><query xmlns="http://jabber.org/protocol/disco#info"/></iq>"#)
            .await;
        server.send("<r xmlns='urn:xmpp:sm:3'/>").await;
        server.send("</stream:stream>").await;
        server.expect_eof().await;
    });

    component.run(CancellationToken::new()).await.expect("run");
    script.await.expect("fake server");

    let calls = calls.lock().unwrap();
    assert_eq!(calls.message, vec!["chat:hi".to_string()]);
    assert_eq!(calls.iq, vec!["1".to_string()]);
    assert_eq!(calls.disco, vec!["1".to_string()]);
    assert_eq!(calls.unknown, vec!["{urn:xmpp:sm:3}r".to_string()]);
    assert_eq!(calls.presence, 0);
}

#[tokio::test]
async fn test_rejected_handshake_fails_and_closes() {
    let (mut component, mut server) = duplex_component();
    let calls = record_calls(&mut component);

    let script = tokio::spawn(async move {
        server.expect("xmlns:stream='http://etherx.jabber.org/streams'>").await;
        server.send(SERVER_HEADER).await;
        server.expect("</handshake>").await;
        server
            .send("<stream:error><not-authorized xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></stream:error></stream:stream>")
            .await;
        server.expect_eof().await;
    });

    let err = component.run(CancellationToken::new()).await.unwrap_err();
    script.await.expect("fake server");

    match err {
        ComponentError::Handshake(HandshakeError::AuthenticationFailed { reason }) => {
            assert!(reason.contains("not-authorized"), "reason: {}", reason);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    let calls = calls.lock().unwrap();
    assert!(calls.message.is_empty() && calls.unknown.is_empty());
}

#[tokio::test]
async fn test_handler_error_ends_run_without_reading_further() {
    let (mut component, mut server) = duplex_component();
    let calls = record_calls(&mut component);
    component.on_message(|_, _| Err("boom".into()));

    let script = tokio::spawn(async move {
        server.accept_handshake().await;
        server.send("<message><body>first</body></message><presence/>").await;
        server.expect_eof().await;
    });

    let err = component.run(CancellationToken::new()).await.unwrap_err();
    script.await.expect("fake server");

    match err {
        ComponentError::Handler(e) => assert_eq!(e.to_string(), "boom"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(calls.lock().unwrap().presence, 0);
}

#[tokio::test]
async fn test_replies_queued_before_handler_error_are_flushed() {
    let (mut component, mut server) = duplex_component();
    component.on_presence(|session, _| {
        session.write_raw(b"<presence type='unavailable'/>");
        Err("stop".into())
    });

    let script = tokio::spawn(async move {
        server.accept_handshake().await;
        server.send("<presence/>").await;
        server.expect("<presence type='unavailable'/>").await;
        server.expect_eof().await;
    });

    let err = component.run(CancellationToken::new()).await.unwrap_err();
    script.await.expect("fake server");
    assert!(matches!(err, ComponentError::Handler(_)));
}

#[tokio::test]
async fn test_cancel_while_blocked_waits_for_read() {
    let (mut component, mut server) = duplex_component();
    let calls = record_calls(&mut component);
    let handle = component.close_handle();

    let run = tokio::spawn(async move { component.run(CancellationToken::new()).await });

    server.accept_handshake().await;
    // Let the component reach its next read
    tokio::time::sleep(Duration::from_millis(100)).await;

    handle.close();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!run.is_finished(), "a blocked read is not interrupted");

    server.send("<presence/>").await;
    let err = tokio::time::timeout(IO_TIMEOUT, run)
        .await
        .expect("run returns after the read completes")
        .expect("run task")
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(calls.lock().unwrap().presence, 1);
    server.expect_eof().await;
}

#[tokio::test]
async fn test_cancel_between_iterations_stops_before_next_read() {
    let (mut component, mut server) = duplex_component();
    let cancel = CancellationToken::new();
    let seen = Arc::new(AtomicUsize::new(0));

    let (token, counter) = (cancel.clone(), seen.clone());
    component.on_message(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        token.cancel();
        Ok(())
    });

    let script = tokio::spawn(async move {
        server.accept_handshake().await;
        server.send("<message>one</message><message>two</message>").await;
        server.expect_eof().await;
    });

    let err = component.run(cancel).await.unwrap_err();
    script.await.expect("fake server");

    assert!(err.is_cancelled());
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connection_drop_during_dispatch() {
    let (mut component, mut server) = duplex_component();

    let script = tokio::spawn(async move {
        server.accept_handshake().await;
        server.send("<presence/>").await;
        drop(server);
    });

    let err = component.run(CancellationToken::new()).await.unwrap_err();
    script.await.expect("fake server");
    assert!(matches!(err, ComponentError::ConnectionClosed));
}

#[tokio::test]
async fn test_transport_shut_down_exactly_once() {
    for reject in [false, true] {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let drops = Arc::new(AtomicUsize::new(0));
        let transport = CountingTransport {
            inner: client,
            shutdowns: shutdowns.clone(),
            drops: drops.clone(),
        };
        let mut component = Component::with_transport(&options(), transport).expect("component");
        let mut server = FakeServer::new(server);

        let script = tokio::spawn(async move {
            if reject {
                server.expect("xmlns:stream='http://etherx.jabber.org/streams'>").await;
                server.send(SERVER_HEADER).await;
                server.expect("</handshake>").await;
                server.send("<handshake>no</handshake>").await;
            } else {
                server.accept_handshake().await;
                server.send("</stream:stream>").await;
            }
            server.expect_eof().await;
        });

        let result = component.run(CancellationToken::new()).await;
        script.await.expect("fake server");
        assert_eq!(result.is_err(), reject);
        // Released by run itself, not by dropping the component
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        // A second run must not release the transport again
        assert!(matches!(
            component.run(CancellationToken::new()).await,
            Err(ComponentError::ConnectionClosed)
        ));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_tcp_connection_closed_when_run_returns() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake server listener");
    let address = listener.local_addr().expect("listener addr").to_string();
    let (run_done_tx, run_done_rx) = tokio::sync::oneshot::channel::<()>();

    let fake_server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.expect("accept component");
        let mut server = FakeServer::new(socket);
        server.accept_handshake().await;
        server.send("</stream:stream>").await;
        server.expect_eof().await;
        run_done_rx.await.expect("run finished");

        // A fully closed peer answers with a reset, so writes start failing
        for _ in 0..50 {
            if server.io.write_all(b"<presence/>").await.is_err() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    });

    let options = Options::new(address, "bot.example.com", "secret");
    let mut component = Component::connect(&options).await.expect("connect");
    component.run(CancellationToken::new()).await.expect("run");
    run_done_tx.send(()).expect("fake server waiting");

    let writes_failed = fake_server.await.expect("fake server");
    assert!(writes_failed, "socket still open after run returned");
    // The component is still alive here; only run released the socket
    assert!(matches!(
        component.write_raw(b" ").await,
        Err(ComponentError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let address = listener.local_addr().expect("listener addr").to_string();
    drop(listener);

    let options = Options::new(address, "bot.example.com", "secret")
        .with_connect_timeout(Duration::from_secs(2));
    let err = Component::connect(&options).await.unwrap_err();
    assert!(matches!(err, ComponentError::Connect { .. }));
}
