//! Push channel carrying live report frames

use crate::error::LiveError;
use futures_util::StreamExt;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::Message,
    MaybeTlsStream, WebSocketStream,
};

/// An open push channel
pub trait LiveChannel: Send + 'static {
    /// Next text frame; `None` once the channel has closed
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<String, LiveError>>> + Send;

    /// Close the channel (best effort)
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens push channels
pub trait LiveConnector: Send + Sync + 'static {
    type Channel: LiveChannel;

    fn connect(&self, url: &str) -> impl Future<Output = Result<Self::Channel, LiveError>> + Send;
}

/// WebSocket connector
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl LiveConnector for WsConnector {
    type Channel = WsChannel;

    async fn connect(&self, url: &str) -> Result<WsChannel, LiveError> {
        let (stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| LiveError::ConnectTimeout(url.to_string()))?
            .map_err(|source| LiveError::Connect {
                url: url.to_string(),
                source,
            })?;

        tracing::debug!("Live channel connected: {}", url);
        Ok(WsChannel { stream })
    }
}

/// WebSocket-backed live channel
pub struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl LiveChannel for WsChannel {
    async fn next_frame(&mut self) -> Option<Result<String, LiveError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                    Ok(text) => return Some(Ok(text.to_owned())),
                    Err(e) => {
                        tracing::debug!("Skipping binary live frame that is not UTF-8: {}", e);
                        continue;
                    }
                },
                Ok(Message::Close(frame)) => {
                    tracing::debug!("Live channel closed by server: {:?}", frame);
                    return None;
                }
                // Ping/pong are answered by tungstenite itself
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("Error closing live channel: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::ws::{Message as WsMessage, WebSocketUpgrade},
        routing::get,
        Router,
    };

    /// Serves one socket that sends `frames` and then closes
    async fn spawn_sender(frames: Vec<WsMessage>) -> String {
        let app = Router::new().route(
            "/live",
            get(move |ws: WebSocketUpgrade| {
                let frames = frames.clone();
                async move {
                    ws.on_upgrade(move |mut socket| async move {
                        for frame in frames {
                            if socket.send(frame).await.is_err() {
                                return;
                            }
                        }
                        let _ = socket.send(WsMessage::Close(None)).await;
                    })
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("ws://{}/live", addr)
    }

    #[tokio::test]
    async fn test_binary_frames_must_be_utf8() {
        let url = spawn_sender(vec![
            WsMessage::Binary(vec![0xff, 0xfe, 0x00].into()),
            WsMessage::Binary(br#"{"experiment_id":"exp-1"}"#.to_vec().into()),
            WsMessage::Text("plain".into()),
        ])
        .await;

        let mut channel = WsConnector::default().connect(&url).await.unwrap();
        assert_eq!(
            channel.next_frame().await.unwrap().unwrap(),
            r#"{"experiment_id":"exp-1"}"#
        );
        assert_eq!(channel.next_frame().await.unwrap().unwrap(), "plain");
        assert!(channel.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_to_missing_route_fails() {
        let url = spawn_sender(Vec::new()).await.replace("/live", "/nowhere");
        let err = WsConnector::default().connect(&url).await.err().unwrap();
        assert!(matches!(err, LiveError::Connect { .. }));
    }
}
