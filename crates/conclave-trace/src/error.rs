#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("no open turn: call start_turn before recording activity")]
    NoOpenTurn,

    #[error("turn already open for '{open}': end it before starting another")]
    TurnAlreadyOpen { open: String },

    #[error("trace io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("trace serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TraceError {
    /// Recorder contract violations, as opposed to persistence failures.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::NoOpenTurn | Self::TurnAlreadyOpen { .. })
    }
}
