//! Frame transport for the realtime session.
//!
//! The engine only sees [`Connector`] and [`Connection`]; the WebSocket
//! implementation lives here alongside an in-memory pair used by tests.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use crate::error::Error;
use crate::Result;

/// Opens connections to the realtime service.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Connection;

    async fn connect(&self) -> Result<Self::Connection>;
}

/// One open, bidirectional stream of text frames.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Next text frame. `None` once the peer has closed the stream.
    async fn recv(&mut self) -> Option<Result<String>>;

    async fn close(&mut self) -> Result<()>;
}

/// Authenticated WebSocket connector.
pub struct WebSocketConnector {
    url: Url,
    api_key: String,
}

impl WebSocketConnector {
    pub fn new(url: Url, api_key: impl Into<String>) -> Self {
        Self {
            url,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Connection = WebSocketConnection;

    async fn connect(&self) -> Result<Self::Connection> {
        let mut request = self.url.as_str().into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| Error::Config(format!("API key is not a valid header value: {}", e)))?;
        let headers = request.headers_mut();
        headers.insert("Authorization", auth);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (stream, response) = connect_async(request).await?;
        info!("Connected to {} ({})", self.url.host_str().unwrap_or("server"), response.status());
        Ok(WebSocketConnection { stream })
    }
}

pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.stream.send(WsMessage::Text(frame.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.to_string())),
                Ok(WsMessage::Close(frame)) => {
                    info!("Server closed connection: {:?}", frame);
                    return None;
                }
                Ok(WsMessage::Binary(data)) => {
                    return Some(Err(Error::Protocol(format!(
                        "unexpected binary frame ({} bytes)",
                        data.len()
                    ))))
                }
                Ok(other) => debug!("Skipping control frame ({} bytes)", other.len()),
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub use channel::{ChannelConnector, ServerEnd};
