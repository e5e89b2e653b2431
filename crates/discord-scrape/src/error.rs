use std::time::Duration;

use thiserror::Error;

/// Every way a scrape can fail.
///
/// Kinds are kept distinct all the way to the caller: the host decides whether
/// to ask for re-authentication based on which variant it receives.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("Discord process not found (looked for {0})")]
    ProcessNotFound(String),

    #[error("Failed to relaunch Discord with remote debugging: {0}")]
    LaunchFailed(String),

    #[error("DevTools endpoint on port {port} did not answer within {waited:?}: {reason}")]
    DebugPortTimeout {
        port: u16,
        waited: Duration,
        reason: String,
    },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("WebSocket handshake with {url} failed: {reason}")]
    HandshakeFailed { url: String, reason: String },

    #[error("DevTools command '{method}' (id {id}) timed out after {waited:?}")]
    ProtocolTimeout {
        method: String,
        id: u64,
        waited: Duration,
    },

    #[error("DevTools error {code}: {message}")]
    RemoteError {
        code: i64,
        message: String,
        data: Option<String>,
    },

    #[error("DevTools connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Gave up after {attempts} connection attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("A scrape is already in progress for this session")]
    ScrapeInProgress,

    #[error("Scrape worker stopped before producing a result: {0}")]
    WorkerFailed(String),
}

impl ScrapeError {
    /// Only a failed WebSocket handshake is worth another attempt; the client
    /// is usually still starting up when that happens.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScrapeError::HandshakeFailed { .. })
    }

    /// Failures the host should treat as "authentication failed" rather than a
    /// transient hiccup.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            ScrapeError::MaxRetriesExceeded { .. } | ScrapeError::ProcessNotFound(_)
        )
    }
}
