//! DevTools WebSocket client with strict request/response correlation.
//!
//! One command is in flight at a time: [`ProtocolClient::send`] writes a
//! frame tagged with the next id and then reads frames until the one carrying
//! that id shows up. Event notifications and stale responses (from a command
//! that previously timed out) are read and dropped along the way.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, trace, warn};

use crate::error::ScrapeError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything that can execute a DevTools command and hand back its `result`.
///
/// [`ProtocolClient`] is the real implementation; the extractors and the
/// friends-list scraper are written against this trait.
#[async_trait]
pub trait DevtoolsChannel: Send {
    async fn call(&mut self, method: &str, params: Value) -> Result<Value, ScrapeError>;
}

#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct IncomingFrame {
    id: Option<u64>,
    method: Option<String>,
    result: Option<Value>,
    error: Option<RemoteErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl From<RemoteErrorBody> for ScrapeError {
    fn from(body: RemoteErrorBody) -> Self {
        ScrapeError::RemoteError {
            code: body.code,
            message: body.message,
            data: body.data.map(|d| match d {
                Value::String(s) => s,
                other => other.to_string(),
            }),
        }
    }
}

pub struct ProtocolClient {
    url: String,
    stream: WsStream,
    next_id: u64,
    command_timeout: Duration,
    discarded_frames: u64,
}

impl ProtocolClient {
    /// Open a WebSocket to a DevTools target. Any failure to complete the
    /// handshake within `connect_timeout` is [`ScrapeError::HandshakeFailed`],
    /// the one error the retry loop treats as transient.
    #[instrument(skip(connect_timeout))]
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, ScrapeError> {
        let handshake = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| ScrapeError::HandshakeFailed {
                url: url.to_string(),
                reason: format!("no handshake within {connect_timeout:?}"),
            })?;

        let (stream, response) = handshake.map_err(|e| ScrapeError::HandshakeFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        info!(status = %response.status(), "DevTools WebSocket connected");

        Ok(Self {
            url: url.to_string(),
            stream,
            next_id: 1,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            discarded_frames: 0,
        })
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Id of the most recently sent command, 0 before the first send.
    pub fn last_id(&self) -> u64 {
        self.next_id - 1
    }

    /// Frames read and dropped because they did not answer the command being
    /// waited on.
    pub fn discarded_frames(&self) -> u64 {
        self.discarded_frames
    }

    /// Send one command and wait for its response.
    pub async fn send(&mut self, method: &str, params: Value) -> Result<Value, ScrapeError> {
        let id = self.next_id;
        self.next_id += 1;

        let frame = serde_json::to_string(&CommandRequest {
            id,
            method,
            params: &params,
        })
        .map_err(|e| ScrapeError::MalformedResponse(format!("cannot encode {method}: {e}")))?;

        debug!(id, method, "Sending DevTools command");
        self.stream
            .send(Message::Text(frame))
            .await
            .map_err(|e| ScrapeError::ConnectionClosed(format!("send {method}: {e}")))?;

        let timeout = self.command_timeout;
        let frame = tokio::time::timeout(timeout, self.read_response(id))
            .await
            .map_err(|_| ScrapeError::ProtocolTimeout {
                method: method.to_string(),
                id,
                waited: timeout,
            })??;

        if let Some(error) = frame.error {
            warn!(id, method, code = error.code, message = %error.message, "DevTools command failed");
            return Err(error.into());
        }

        Ok(frame.result.unwrap_or(Value::Null))
    }

    async fn read_response(&mut self, id: u64) -> Result<IncomingFrame, ScrapeError> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(ScrapeError::ConnectionClosed(e.to_string())),
                None => return Err(ScrapeError::ConnectionClosed("stream ended".to_string())),
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        self.discarded_frames += 1;
                        continue;
                    }
                },
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| format!("{} {}", f.code, f.reason))
                        .unwrap_or_else(|| "closed by remote".to_string());
                    return Err(ScrapeError::ConnectionClosed(reason));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };

            let frame: IncomingFrame = match serde_json::from_str(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Dropping unparsable DevTools frame");
                    self.discarded_frames += 1;
                    continue;
                }
            };

            match frame.id {
                Some(frame_id) if frame_id == id => return Ok(frame),
                Some(frame_id) => {
                    debug!(expected = id, got = frame_id, "Dropping response to an earlier command");
                    self.discarded_frames += 1;
                }
                None => {
                    trace!(event = frame.method.as_deref().unwrap_or("?"), "Dropping event");
                    self.discarded_frames += 1;
                }
            }
        }
    }

    /// Send a close frame. Dropping the client also closes the socket, this
    /// just does it politely.
    pub async fn close(mut self) -> Result<(), ScrapeError> {
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(ScrapeError::ConnectionClosed(e.to_string())),
        }
    }
}

#[async_trait]
impl DevtoolsChannel for ProtocolClient {
    async fn call(&mut self, method: &str, params: Value) -> Result<Value, ScrapeError> {
        self.send(method, params).await
    }
}
