use serde::{Deserialize, Serialize};

/// Final statistics a session reports at the end of an exchange.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub num_turns: u32,
    pub duration_ms: u64,
    pub duration_api_ms: u64,
    pub total_cost_usd: f64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
}

impl SessionStats {
    pub fn new(num_turns: u32, duration_ms: u64, duration_api_ms: u64, total_cost_usd: f64) -> Self {
        Self {
            num_turns,
            duration_ms,
            duration_api_ms,
            total_cost_usd,
            ..Default::default()
        }
    }

    pub fn with_tokens(mut self, input: u64, output: u64, cache_read: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self.cache_read_tokens = cache_read;
        self
    }
}
