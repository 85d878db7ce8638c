//! Wire framing and per-connection I/O halves

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::{BroadcasterError, Result};

const READ_BUFFER_SIZE: usize = 1024;

/// How messages are delimited on the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Bytes written back to back with no delimiter
    Raw,
    /// Newline-delimited JSON
    #[default]
    Lines,
    /// One WebSocket text frame per message
    #[serde(rename = "websocket")]
    WebSocket,
}

impl std::fmt::Display for Framing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Raw => "raw",
            Self::Lines => "lines",
            Self::WebSocket => "websocket",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "lines" | "ndjson" => Ok(Self::Lines),
            "websocket" | "ws" => Ok(Self::WebSocket),
            _ => Err(format!("Unknown framing: {}", s)),
        }
    }
}

/// What the peer sent us
#[derive(Debug)]
pub(crate) enum Inbound {
    Text(String),
    Closed,
}

pub(crate) enum Writer {
    Stream { half: OwnedWriteHalf, framing: Framing },
    WebSocket(SplitSink<WebSocketStream<TcpStream>, Message>),
}

pub(crate) enum Reader {
    Stream(OwnedReadHalf),
    WebSocket(SplitStream<WebSocketStream<TcpStream>>),
}

/// Complete the transport handshake (if any) and split the socket
pub(crate) async fn establish(
    stream: TcpStream,
    framing: Framing,
    handshake_timeout: Duration,
) -> Result<(Reader, Writer)> {
    stream.set_nodelay(true)?;
    match framing {
        Framing::Raw | Framing::Lines => {
            let (read, write) = stream.into_split();
            Ok((Reader::Stream(read), Writer::Stream { half: write, framing }))
        }
        Framing::WebSocket => {
            let ws = tokio::time::timeout(handshake_timeout, tokio_tungstenite::accept_async(stream))
                .await
                .map_err(|_| BroadcasterError::HandshakeTimeout)??;
            let (sink, stream) = ws.split();
            Ok((Reader::WebSocket(stream), Writer::WebSocket(sink)))
        }
    }
}

impl Writer {
    /// Write one encoded message, applying the framing
    pub(crate) async fn send(&mut self, message: &Bytes) -> Result<()> {
        match self {
            Self::Stream { half, framing: Framing::Lines } => {
                let mut line = BytesMut::with_capacity(message.len() + 1);
                line.extend_from_slice(message);
                line.extend_from_slice(b"\n");
                half.write_all(&line).await?;
            }
            Self::Stream { half, .. } => {
                half.write_all(message).await?;
            }
            Self::WebSocket(sink) => {
                let text = String::from_utf8_lossy(message).into_owned();
                sink.send(Message::text(text)).await?;
            }
        }
        Ok(())
    }

    /// Best-effort orderly shutdown of the write side
    pub(crate) async fn close(&mut self) {
        let result = match self {
            Self::Stream { half, .. } => half.shutdown().await.map_err(BroadcasterError::from),
            Self::WebSocket(sink) => sink.close().await.map_err(BroadcasterError::from),
        };
        if let Err(e) = result {
            tracing::debug!("Error while closing client: {}", e);
        }
    }
}

impl Reader {
    /// Wait for the next inbound message or the end of the connection
    pub(crate) async fn next(&mut self) -> Result<Inbound> {
        match self {
            Self::Stream(half) => {
                let mut buf = [0u8; READ_BUFFER_SIZE];
                let n = half.read(&mut buf).await?;
                if n == 0 {
                    return Ok(Inbound::Closed);
                }
                Ok(Inbound::Text(String::from_utf8_lossy(&buf[..n]).into_owned()))
            }
            Self::WebSocket(stream) => loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => return Ok(Inbound::Text(text.as_str().to_owned())),
                    Some(Ok(Message::Close(_))) | None => return Ok(Inbound::Closed),
                    // Ping/pong are answered by tungstenite; binary is ignored
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            },
        }
    }
}
