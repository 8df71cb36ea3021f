//! Prompt templates for ChatPye.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub rag: RagPrompts,
    pub analysis: AnalysisPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// Prompts for answering questions, grounded in transcript segments or directly from the video.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagPrompts {
    /// System prompt when transcript segments are available.
    pub grounded_system: String,
    /// User prompt when transcript segments are available.
    pub grounded_user: String,
    /// System prompt when the model is given the video itself.
    pub direct_system: String,
    /// User prompt when the model is given the video itself.
    pub direct_user: String,
}

impl Default for RagPrompts {
    fn default() -> Self {
        Self {
            grounded_system: r#"You are ChatPye, an AI-powered video learning companion. Your goal is to give intelligent, helpful answers based on the provided transcript segments of a video.

Guidelines:
- Answer the QUESTION using only the given TRANSCRIPT SEGMENTS
- When your answer relies on a segment, cite its timestamp as [startSeconds s - endSeconds s], e.g. "the speaker defines the term at [123s - 128s]"
- Stay accurate and do not bring in outside knowledge
- Be comprehensive yet concise, and use Markdown to structure longer answers
- If the segments do not contain the answer, say clearly that it is not in the provided context"#.to_string(),

            grounded_user: r#"TRANSCRIPT SEGMENTS:
{{context}}

QUESTION:
{{question}}

Answer (formatted in Markdown):"#.to_string(),

            direct_system: r#"You are ChatPye, an AI-powered video learning companion. No transcript is available for this video, so you are answering from the video itself.

Guidelines:
- Answer the QUESTION about the referenced video
- Cite approximate timestamps as [MM:SS] whenever you refer to a specific moment
- If you cannot access or see the video content, say so instead of guessing
- Use Markdown to structure longer answers"#.to_string(),

            direct_user: r#"VIDEO: {{video_url}}

QUESTION:
{{question}}

Answer (formatted in Markdown):"#.to_string(),
        }
    }
}

/// Prompts for pre-computed video analyses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisPrompts {
    /// Instruction used to produce the summary/topics/takeaways analysis.
    pub summary_topics_takeaways: String,
}

impl Default for AnalysisPrompts {
    fn default() -> Self {
        Self {
            summary_topics_takeaways: r#"Analyze this video and respond in Markdown with three sections:

## Summary
A short paragraph describing what the video is about.

## Key Topics
A bulleted list of the main topics, each with the timestamp where it is discussed.

## Takeaways
A bulleted list of the most useful lessons or conclusions."#.to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let rag_path = custom_path.join("rag.toml");
            if rag_path.exists() {
                let content = std::fs::read_to_string(&rag_path)?;
                prompts.rag = toml::from_str(&content)?;
            }

            let analysis_path = custom_path.join("analysis.toml");
            if analysis_path.exists() {
                let content = std::fs::read_to_string(&analysis_path)?;
                prompts.analysis = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompts() {
        let prompts = Prompts::default();
        assert!(prompts.rag.grounded_user.contains("{{context}}"));
        assert!(prompts.rag.direct_user.contains("{{video_url}}"));
        assert!(!prompts.analysis.summary_topics_takeaways.is_empty());
    }

    #[test]
    fn test_render_template() {
        let template = "Hello {{name}}, you have {{count}} messages.";
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "Alice".to_string());
        vars.insert("count".to_string(), "5".to_string());

        let result = Prompts::render(template, &vars);
        assert_eq!(result, "Hello Alice, you have 5 messages.");
    }

    #[test]
    fn test_custom_variables_are_overridden_by_call_vars() {
        let mut prompts = Prompts::default();
        prompts.variables.insert("audience".to_string(), "students".to_string());
        prompts.variables.insert("question".to_string(), "ignored".to_string());

        let mut vars = HashMap::new();
        vars.insert("question".to_string(), "What is Rust?".to_string());

        let out = prompts.render_with_custom("{{audience}}: {{question}}", &vars);
        assert_eq!(out, "students: What is Rust?");
    }

    #[test]
    fn test_load_custom_rag_prompts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("rag.toml"),
            "grounded_user = \"Q: {{question}}\"\n",
        )
        .unwrap();

        let prompts = Prompts::load(dir.path().to_str(), None).unwrap();
        assert_eq!(prompts.rag.grounded_user, "Q: {{question}}");
        // Unspecified fields keep their defaults.
        assert!(prompts.rag.direct_user.contains("{{video_url}}"));
    }
}
