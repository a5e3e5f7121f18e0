//! WebSocket-backed `FrameTransport`.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chainpipe_core::{ClientError, Frame, FrameTransport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One WebSocket connection speaking ChainPipe binary frames.
pub struct WsTransport {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
}

impl WsTransport {
    /// Dial `url` with a connect timeout.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, ClientError> {
        if url.trim().is_empty() {
            return Err(ClientError::EmptyUrl);
        }
        tracing::info!(url = %url, "dialing node");
        let connect = tokio_tungstenite::connect_async(url);
        let (ws, _) = time::timeout(timeout, connect)
            .await
            .map_err(|_| ClientError::Timeout {
                ms: timeout.as_millis() as u64,
            })?
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let (sink, stream) = ws.split();
        Ok(Self { sink, stream })
    }
}

#[async_trait]
impl FrameTransport for WsTransport {
    async fn send(&mut self, frame: Frame) -> Result<(), ClientError> {
        self.sink
            .send(Message::Binary(frame.encode().into()))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame, ClientError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Binary(bytes)) => {
                    return Some(Frame::decode(&bytes).map_err(ClientError::from));
                }
                Ok(Message::Close(_)) => return None,
                // Protocol-level pings are handled by tungstenite; text and
                // pong frames carry nothing for us.
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "websocket receive error");
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}
