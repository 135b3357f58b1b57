//! The tokio-tungstenite transport implementation.

use crate::{
    endpoint::Endpoint,
    transport::{ConnectError, Connector, EventSink, EventStream, TransportError},
};
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use parlance_realtime_types::{ClientEvent, Inbound, ServerEvent};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials the configured endpoint and hands back split sink/stream halves.
pub struct WsConnector {
    endpoint: Endpoint,
    model: String,
}

impl WsConnector {
    pub fn new(endpoint: Endpoint, model: impl Into<String>) -> Self {
        Self {
            endpoint,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<(Box<dyn EventSink>, Box<dyn EventStream>), ConnectError> {
        let url = self.endpoint.url_for_model(&self.model);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        if let Endpoint::Direct { credential, .. } = &self.endpoint {
            let auth = format!("Bearer {}", credential.expose())
                .parse()
                .map_err(|_| TransportError::Handshake("credential is not header-safe".into()))?;
            request.headers_mut().insert("Authorization", auth);
            let beta = "realtime=v1"
                .parse()
                .map_err(|_| TransportError::Handshake("invalid beta header".into()))?;
            request.headers_mut().insert("OpenAI-Beta", beta);
        }

        let (ws, _) = connect_async(request)
            .await
            .map_err(TransportError::WebSocket)?;
        info!(%url, "connected to realtime service");

        let (sink, stream) = ws.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsEvents { stream })))
    }
}

struct WsSink {
    sink: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl EventSink for WsSink {
    async fn send(&mut self, event: ClientEvent) -> Result<(), TransportError> {
        let text = serde_json::to_string(&event)?;
        self.sink.send(WsMessage::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink.close().await?;
        Ok(())
    }
}

struct WsEvents {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl EventStream for WsEvents {
    async fn next(&mut self) -> Option<Result<Inbound, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => match ServerEvent::parse(&text) {
                    Ok(inbound) => return Some(Ok(inbound)),
                    // The service only sends JSON; a frame we cannot parse at
                    // all is logged and skipped rather than ending the stream.
                    Err(e) => warn!(error = %e, "dropping unparseable frame"),
                },
                Ok(WsMessage::Close(frame)) => {
                    debug!(?frame, "peer sent close frame");
                    return None;
                }
                // tungstenite answers pings internally on the next flush.
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
                Ok(other) => debug!(len = other.len(), "ignoring non-text frame"),
                Err(e) => return Some(Err(TransportError::WebSocket(e))),
            }
        }
    }
}
