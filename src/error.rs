use std::time::Duration;

/// Errors surfaced by the codecs, transports and the signing client.
///
/// Application-level transaction failures (a non-zero result code) are not
/// errors: they are reported inside [`crate::client::TxResult`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid memo: {0}")]
    InvalidMemo(String),

    #[error("query failed with HTTP status {status}: {message}")]
    RemoteQuery { status: u16, message: String },

    #[error("RPC error {code}: {message}")]
    RemoteRpc { code: i64, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unknown IBC destination: {0}")]
    UnknownDestination(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transaction {hash} was not committed within {timeout:?}")]
    BroadcastTimeout { hash: String, timeout: Duration },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("invalid event filter: {0}")]
    InvalidFilter(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    /// Classify a reqwest failure, keeping timeouts distinct from other transport errors.
    pub(crate) fn from_http(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            Error::Timeout(timeout)
        } else {
            Error::Transport(e.to_string())
        }
    }

    pub(crate) fn signing(e: impl std::fmt::Display) -> Self {
        Error::Signing(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
