use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const DEFAULT_MAX_TURNS: u32 = 10;

/// Construction parameters for one external agent session.
///
/// A spec is assembled with the `with_*` methods and never changes after
/// it is handed to a pool or strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSpec {
    identity: String,
    instructions: String,
    working_directory: PathBuf,
    max_turns: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    allowed_tools: Vec<String>,
    disallowed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    sub_sessions: BTreeMap<String, SessionSpec>,
    #[serde(default)]
    debug: bool,
}

impl SessionSpec {
    pub fn new(
        identity: impl Into<String>,
        instructions: impl Into<String>,
        working_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            identity: identity.into(),
            instructions: instructions.into(),
            working_directory: working_directory.into(),
            max_turns: DEFAULT_MAX_TURNS,
            model: None,
            allowed_tools: Vec::new(),
            disallowed_tools: Vec::new(),
            sub_sessions: BTreeMap::new(),
            debug: false,
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_disallowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disallowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Nested definitions, only meaningful for a primary that owns subordinates.
    pub fn with_sub_session(mut self, spec: SessionSpec) -> Self {
        self.sub_sessions.insert(spec.identity.clone(), spec);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn allowed_tools(&self) -> &[String] {
        &self.allowed_tools
    }

    pub fn disallowed_tools(&self) -> &[String] {
        &self.disallowed_tools
    }

    pub fn sub_sessions(&self) -> &BTreeMap<String, SessionSpec> {
        &self.sub_sessions
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Deny list wins; an empty allow list permits everything not denied.
    pub fn permits(&self, tool: &str) -> bool {
        if self.disallowed_tools.iter().any(|t| t == tool) {
            return false;
        }
        self.allowed_tools.is_empty() || self.allowed_tools.iter().any(|t| t == tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let spec = SessionSpec::new("critic", "review things", "/tmp/out");
        assert_eq!(spec.identity(), "critic");
        assert_eq!(spec.max_turns(), DEFAULT_MAX_TURNS);
        assert!(spec.model().is_none());
        assert!(spec.permits("Bash"));
    }

    #[test]
    fn deny_list_wins_over_allow_list() {
        let spec = SessionSpec::new("Leader", "", "/tmp")
            .with_allowed_tools(["communicate_with_agent", "Bash"])
            .with_disallowed_tools(["Bash"]);
        assert!(spec.permits("communicate_with_agent"));
        assert!(!spec.permits("Bash"));
        assert!(!spec.permits("Read"));
    }

    #[test]
    fn sub_sessions_keyed_by_identity() {
        let worker = SessionSpec::new("swe_1", "", "/tmp");
        let spec = SessionSpec::new("Leader", "", "/tmp").with_sub_session(worker.clone());
        assert_eq!(spec.sub_sessions().get("swe_1"), Some(&worker));
    }

    #[test]
    fn serde_roundtrip() {
        let spec = SessionSpec::new("Agent", "do it", "/work")
            .with_model("m")
            .with_max_turns(3)
            .with_allowed_tools(["Read"]);
        let json = serde_json::to_string(&spec).unwrap();
        let parsed: SessionSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, spec);
    }
}
