//! Echo component: replies to every chat message with its own body and
//! answers disco#info queries.
//!
//! ```text
//! XMPP_COMPONENT_ADDRESS=127.0.0.1:5347 \
//! XMPP_COMPONENT_NAME=echo.localhost \
//! XMPP_COMPONENT_SECRET=secret \
//! cargo run --example echo
//! ```
//!
//! Alternatively pass a JSON options file as the only argument.
//! `RUST_LOG` overrides the default log filter; `RUST_LOG=xmpp_component::traffic=debug`
//! together with `"trace_traffic": true` shows raw XML.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use xmpp_component::{
    BoxError, Component, DiscoInfoQuery, Identity, Iq, IqType, Message, Options,
};

fn load_options() -> Result<Options, BoxError> {
    if let Some(path) = std::env::args().nth(1) {
        let raw = std::fs::read_to_string(&path)?;
        return Ok(serde_json::from_str(&raw)?);
    }

    let var = |key: &str| std::env::var(key).map_err(|_| format!("{} is not set", key));
    let mut options = Options::new(
        var("XMPP_COMPONENT_ADDRESS")?,
        var("XMPP_COMPONENT_NAME")?,
        var("XMPP_COMPONENT_SECRET")?,
    )
    .trace_traffic(std::env::var("XMPP_COMPONENT_TRACE").is_ok());
    if let Ok(secs) = std::env::var("XMPP_COMPONENT_KEEPALIVE_SECS") {
        options = options.with_keepalive(Duration::from_secs(secs.parse()?));
    }
    Ok(options)
}

fn init_logging() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new("xmpp_component=info,echo=info,warn")
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    init_logging();

    let options = load_options()?;
    tracing::info!(options = ?options, "Starting echo component");

    let mut component = Component::connect(&options).await?;
    component
        .on_message(|session, message| {
            if message.type_.as_deref() == Some("error") {
                return Ok(());
            }
            let Some(body) = &message.body else {
                return Ok(());
            };
            tracing::info!(from = ?message.header.from, "Echoing message");
            session.send(&Message {
                header: message.header.reply(),
                type_: message.type_.clone(),
                body: Some(body.clone()),
                ..Default::default()
            });
            Ok(())
        })
        .on_disco_info(|session, iq, query| {
            if iq.type_ != IqType::Get {
                return Ok(());
            }
            let info = DiscoInfoQuery {
                node: query.node.clone(),
                identities: vec![Identity {
                    category: "component".to_string(),
                    type_: "generic".to_string(),
                    name: Some("Echo".to_string()),
                }],
                features: vec![xmpp_component::ns::DISCO_INFO.to_string()],
            };
            let mut result = Iq::new(IqType::Result, iq.header.reply());
            result.node = Some(info.to_node());
            session.send(&result);
            Ok(())
        });

    let handle = component.close_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, stopping after the next element");
            handle.close();
        }
    });

    match component.run(CancellationToken::new()).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
