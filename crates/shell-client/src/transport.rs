//! Transport seam between the agent and the network.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use shell_core::{Result, ShellError};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Outbound half: one item is one text frame.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ShellError> + Send>>;

/// Inbound half: text frames until the connection ends.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An open, message-framed connection to the hub.
pub struct Transport {
    /// Frames to the hub.
    pub sink: FrameSink,
    /// Frames from the hub.
    pub stream: FrameStream,
}

/// Opens transports. The agent calls this on every (re)connect attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`.
    async fn connect(&self, url: &str) -> Result<Transport>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Transport> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ShellError::Connection(format!("{url}: {e}")))?;
        let (tx, rx) = ws.split();

        let sink = tx
            .with(|frame: String| future::ready(Ok::<_, WsError>(Message::Text(frame.into()))))
            .sink_map_err(|e| ShellError::Connection(e.to_string()));

        let stream = rx.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => String::from_utf8(data.to_vec()).ok().map(Ok),
                Ok(_) => None,
                Err(e) => Some(Err(ShellError::Connection(e.to_string()))),
            })
        });

        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
