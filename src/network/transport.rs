// src/network/transport.rs
//! Pool connection transports
//!
//! `stratum+tcp://` and `tcp://` pools speak newline-delimited JSON over a
//! plain socket; `ws://` and `wss://` pools carry one JSON message per text
//! frame.

use crate::utils::error::MinerError;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tungstenite::protocol::Message;
use url::Url;

/// An open connection to a pool
pub enum Transport {
    /// Line-delimited JSON over TCP
    Tcp {
        /// Incoming lines
        reader: Lines<BufReader<OwnedReadHalf>>,
        /// Outgoing half
        writer: OwnedWriteHalf,
    },
    /// JSON text frames over WebSocket
    Ws(Box<WebSocketStream<MaybeTlsStream<TcpStream>>>),
}

impl Transport {
    /// Opens a connection for the scheme in `url`
    ///
    /// # Errors
    /// Returns `MinerError` if:
    /// - URL is invalid or uses an unsupported scheme
    /// - TCP connect or WebSocket handshake fails
    pub async fn connect(url: &str) -> Result<Self, MinerError> {
        let parsed = Url::parse(url)?;

        match parsed.scheme() {
            "stratum+tcp" | "tcp" => {
                let host = parsed
                    .host_str()
                    .ok_or_else(|| MinerError::ConfigError(format!("No host in '{}'", url)))?;
                let port = parsed
                    .port()
                    .ok_or_else(|| MinerError::ConfigError(format!("No port in '{}'", url)))?;
                let stream = TcpStream::connect((host, port)).await.map_err(|e| {
                    MinerError::ConnectionError(format!("Connection to '{}' failed: {}", url, e))
                })?;
                stream.set_nodelay(true)?;
                let (read, writer) = stream.into_split();
                Ok(Transport::Tcp {
                    reader: BufReader::new(read).lines(),
                    writer,
                })
            }
            "ws" | "wss" => {
                let (ws, _) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
                    MinerError::ConnectionError(format!("Connection to '{}' failed: {}", url, e))
                })?;
                Ok(Transport::Ws(Box::new(ws)))
            }
            other => Err(MinerError::ConfigError(format!(
                "Unsupported pool scheme '{}' in '{}'",
                other, url
            ))),
        }
    }

    /// Sends one JSON message
    pub async fn send(&mut self, value: &Value) -> Result<(), MinerError> {
        match self {
            Transport::Tcp { writer, .. } => {
                let mut line = value.to_string();
                line.push('\n');
                writer.write_all(line.as_bytes()).await?;
                Ok(())
            }
            Transport::Ws(ws) => {
                ws.send(Message::Text(value.to_string().into())).await?;
                Ok(())
            }
        }
    }

    /// Receives the next JSON text, or `None` once the pool closes
    ///
    /// Cancel safe, so it can sit in a `select!` arm.
    pub async fn recv(&mut self) -> Result<Option<String>, MinerError> {
        match self {
            Transport::Tcp { reader, .. } => loop {
                match reader.next_line().await? {
                    Some(line) if line.trim().is_empty() => continue,
                    other => return Ok(other),
                }
            },
            Transport::Ws(ws) => loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                    Some(Ok(Message::Close(_))) | None => return Ok(None),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_transport_frames_messages_by_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            let got = lines.next_line().await.unwrap().unwrap();
            write.write_all(b"\n{\"id\":1,\"result\":null}\n").await.unwrap();
            got
        });

        let mut transport = Transport::connect(&format!("stratum+tcp://{}", addr))
            .await
            .unwrap();
        transport.send(&json!({"method": "login"})).await.unwrap();
        let reply = transport.recv().await.unwrap();
        assert_eq!(reply.as_deref(), Some(r#"{"id":1,"result":null}"#));
        assert_eq!(server.await.unwrap(), r#"{"method":"login"}"#);
        assert_eq!(transport.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_url_is_a_url_error() {
        assert!(matches!(
            Transport::connect("pool.example.com").await,
            Err(MinerError::UrlError(_))
        ));
    }

    #[tokio::test]
    async fn unsupported_scheme_is_a_config_error() {
        assert!(matches!(
            Transport::connect("http://pool.example.com:3333").await,
            Err(MinerError::ConfigError(_))
        ));
    }
}
