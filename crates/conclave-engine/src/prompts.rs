use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::EngineError;

/// Placeholder in a role template replaced by the environment guidelines.
pub const GUIDELINES_PLACEHOLDER: &str = "<cb_env_guidelines>";

static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(\w+)>").expect("open-tag pattern is valid"));

macro_rules! builtin_templates {
    ($($path:literal),* $(,)?) => {
        &[$(($path, include_str!(concat!("../prompts/", $path)))),*]
    };
}

const BUILTIN: &[(&str, &str)] = builtin_templates![
    "single_agent/sys_prompt.md",
    "leader/sys_prompt_leader.md",
    "leader/sys_prompt_agent.md",
    "builder_critic/sys_prompt_builder.md",
    "builder_critic/sys_prompt_critic.md",
    "voting/sys_prompt_organizer.md",
    "voting/sys_prompt_architect_agent.md",
    "voting/sys_prompt_coding_agent.md",
    "voting/sys_prompt_product_agent.md",
    "specialists/sys_prompt_coordinator.md",
    "specialists/sys_prompt_implementer.md",
    "specialists/sys_prompt_tester.md",
    "specialists/sys_prompt_reviewer.md",
    "human_eval_inst.md",
    "human_eval_env.md",
    "swe_bench_verified_inst.md",
    "swe_bench_env.md",
    "end_to_end_eval/finance_tracker_inst.md",
    "end_to_end_eval/finance_tracker_env.md",
    "end_to_end_eval/spam_classifier_inst.md",
    "end_to_end_eval/spam_classifier_env.md",
];

/// Prompt templates keyed by their path relative to a prompts directory.
#[derive(Clone, Debug)]
pub struct PromptLibrary {
    templates: HashMap<String, String>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptLibrary {
    /// Templates compiled into the binary.
    pub fn builtin() -> Self {
        let templates = BUILTIN
            .iter()
            .map(|(id, body)| (id.to_string(), body.to_string()))
            .collect();
        Self { templates }
    }

    /// Replace built-in templates with any same-named file under `dir`.
    pub fn with_overrides_from(mut self, dir: &Path) -> Result<Self, EngineError> {
        if !dir.is_dir() {
            return Err(EngineError::Prompt(format!(
                "prompts directory not found: {}",
                dir.display()
            )));
        }
        let mut overridden = 0usize;
        for (id, _) in BUILTIN {
            let path = dir.join(id);
            if !path.is_file() {
                continue;
            }
            let body = std::fs::read_to_string(&path).map_err(|e| {
                EngineError::Prompt(format!("failed to read {}: {e}", path.display()))
            })?;
            self.templates.insert((*id).to_string(), body);
            overridden += 1;
        }
        debug!(dir = %dir.display(), overridden, "prompt overrides loaded");
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Result<&str, EngineError> {
        self.templates
            .get(id)
            .map(String::as_str)
            .ok_or_else(|| EngineError::Prompt(format!("unknown prompt template: {id}")))
    }
}

/// `<name>content</name>` pairs in document order, content trimmed.
/// Sections do not nest; an opening tag with no matching close is skipped.
pub fn tagged_sections(text: &str) -> Vec<(String, String)> {
    let mut sections = Vec::new();
    let mut pos = 0;
    while let Some(caps) = OPEN_TAG.captures_at(text, pos) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let close = format!("</{}>", name.as_str());
        match text[whole.end()..].find(&close) {
            Some(offset) => {
                let content = &text[whole.end()..whole.end() + offset];
                sections.push((name.as_str().to_string(), content.trim().to_string()));
                pos = whole.end() + offset + close.len();
            }
            None => pos = whole.start() + 1,
        }
    }
    sections
}

/// Fill a role template.
///
/// Order matters: the guidelines go in first, then every tagged section of
/// `instructions` replaces its `<name>` placeholder, then each parameter
/// replaces `<key>`. Parameters therefore also reach placeholders that the
/// guidelines and sections introduced.
pub fn assemble(base: &str, instructions: &str, guidelines: &str, params: &[(&str, String)]) -> String {
    let mut prompt = base.replace(GUIDELINES_PLACEHOLDER, guidelines);
    for (name, content) in tagged_sections(instructions) {
        prompt = prompt.replace(&format!("<{name}>"), &content);
    }
    for (key, value) in params {
        prompt = prompt.replace(&format!("<{key}>"), value);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_are_extracted_in_order_and_trimmed() {
        let text = "<a>\n  first \n</a> noise <b>second</b><open>never closed";
        assert_eq!(
            tagged_sections(text),
            [
                ("a".to_string(), "first".to_string()),
                ("b".to_string(), "second".to_string())
            ]
        );
    }

    #[test]
    fn unmatched_open_tag_does_not_hide_later_sections() {
        let text = "<x> <y>inner</y>";
        assert_eq!(tagged_sections(text), [("y".to_string(), "inner".to_string())]);
    }

    #[test]
    fn close_must_match_name() {
        assert!(tagged_sections("<a>text</b>").is_empty());
    }

    #[test]
    fn assemble_applies_guidelines_sections_then_params() {
        let base = "Do it.\n<output_instructions>\n<cb_env_guidelines>\nTurns: <max_turn>";
        let instructions = "<output_instructions>Write to <output_dir_param>/out.py</output_instructions>";
        let guidelines = "Use <container_name_param>";
        let prompt = assemble(
            base,
            instructions,
            guidelines,
            &[
                ("output_dir_param", "/work".to_string()),
                ("container_name_param", "box".to_string()),
                ("max_turn", "15".to_string()),
            ],
        );
        assert_eq!(prompt, "Do it.\nWrite to /work/out.py\nUse box\nTurns: 15");
    }

    #[test]
    fn builtin_has_every_template() {
        let lib = PromptLibrary::builtin();
        for (id, _) in BUILTIN {
            assert!(!lib.get(id).unwrap().is_empty(), "{id}");
        }
        assert!(matches!(lib.get("nope.md"), Err(EngineError::Prompt(_))));
    }

    #[test]
    fn overrides_replace_only_present_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("leader")).unwrap();
        std::fs::write(dir.path().join("leader/sys_prompt_leader.md"), "custom leader").unwrap();

        let lib = PromptLibrary::builtin().with_overrides_from(dir.path()).unwrap();
        assert_eq!(lib.get("leader/sys_prompt_leader.md").unwrap(), "custom leader");
        assert_eq!(
            lib.get("leader/sys_prompt_agent.md").unwrap(),
            PromptLibrary::builtin().get("leader/sys_prompt_agent.md").unwrap()
        );
    }

    #[test]
    fn missing_override_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PromptLibrary::builtin()
            .with_overrides_from(&dir.path().join("absent"))
            .unwrap_err();
        assert!(matches!(err, EngineError::Prompt(_)));
    }
}
