/// Failures reported by an external session runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to connect session '{identity}': {reason}")]
    Connect { identity: String, reason: String },

    #[error("session '{0}' is not connected")]
    NotConnected(String),

    #[error("session '{0}' has no exchange in progress")]
    NoExchange(String),

    #[error("session '{identity}' stream ended before its statistics event")]
    StreamEnded { identity: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("disconnect failed for session '{identity}': {reason}")]
    Disconnect { identity: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl RuntimeError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::NotConnected(_) => "not_connected",
            Self::NoExchange(_) => "no_exchange",
            Self::StreamEnded { .. } => "stream_ended",
            Self::Protocol(_) => "protocol",
            Self::Disconnect { .. } => "disconnect",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(e: serde_json::Error) -> Self {
        RuntimeError::Protocol(e.to_string())
    }
}
