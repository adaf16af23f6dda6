//! Analysis subsystem: one language-model call per chapter.
//!
//! The call itself is untrusted: the reply is parsed leniently into an
//! [`Analysis`], with `key_concepts` left as raw JSON for the memory's own
//! boundary validation.

pub mod prompt;

pub use prompt::{AnalysisPrompts, PromptBuilder};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::{LlmProvider, ProviderError};
use crate::subsystems::source::Chapter;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("unparseable analysis reply: {0}")]
    Parse(String),
}

/// Parsed analysis reply. Every field is optional in the reply and defaults
/// to empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    pub summary: String,
    /// Raw `key_concepts` value; see `Observation::parse_batch`.
    pub key_concepts: Value,
    pub tags: Vec<String>,
    /// Connections to earlier concepts. Also accepted as `connections`.
    pub analysis: String,
    pub reflection: Option<String>,
    pub quotes: Vec<String>,
}

impl Analysis {
    /// Parse a model reply. Tolerates a surrounding Markdown code fence and
    /// prose around the JSON object.
    pub fn parse(text: &str) -> Result<Self, AnalysisError> {
        let body = strip_fence(text);
        let value: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(first) => embedded_object(body)
                .and_then(|s| serde_json::from_str(s).ok())
                .ok_or_else(|| AnalysisError::Parse(first.to_string()))?,
        };
        let Value::Object(obj) = value else {
            return Err(AnalysisError::Parse(format!(
                "expected a JSON object, got {}",
                short(&value.to_string())
            )));
        };
        Ok(Self::from_object(obj))
    }

    fn from_object(mut obj: Map<String, Value>) -> Self {
        let analysis = obj
            .get("analysis")
            .and_then(Value::as_str)
            .or_else(|| obj.get("connections").and_then(Value::as_str))
            .unwrap_or_default()
            .trim()
            .to_string();
        Self {
            summary: text_field(&obj, "summary").unwrap_or_default(),
            key_concepts: obj.remove("key_concepts").unwrap_or(Value::Null),
            tags: string_list(&obj, "tags"),
            analysis,
            reflection: text_field(&obj, "reflection"),
            quotes: string_list(&obj, "quotes"),
        }
    }
}

/// Analyse one chapter with `context` as the memory digest.
pub async fn analyze_chapter(
    provider: &LlmProvider,
    prompts: &AnalysisPrompts,
    chapter: &Chapter,
    context: &str,
) -> Result<Analysis, AnalysisError> {
    let user = prompts.user(&chapter.title, &chapter.content, context);
    debug!(
        unit = %chapter.id,
        provider = provider.name(),
        prompt_chars = user.chars().count(),
        "requesting chapter analysis"
    );
    let response = provider.complete(&user, Some(prompts.system())).await?;
    if let Some(usage) = response.usage {
        debug!(
            unit = %chapter.id,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "analysis usage"
        );
    }
    Analysis::parse(&response.text).inspect_err(|e| {
        warn!(unit = %chapter.id, error = %e, reply = %short(&response.text), "analysis reply rejected");
    })
}

fn strip_fence(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    // Drop the info string (`json`, `JSON`, ...) up to the first newline.
    let rest = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn embedded_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_list(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn short(s: &str) -> String {
    const MAX: usize = 120;
    if s.chars().count() <= MAX {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(MAX).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::scripted::ScriptedProvider;
    use serde_json::json;

    #[test]
    fn parses_full_reply() {
        let reply = json!({
            "summary": " 概要 ",
            "key_concepts": [{"name": "矛盾", "definition": "对立统一"}],
            "tags": ["哲学", 3, "辩证法"],
            "analysis": "延续了前文",
            "reflection": "启示",
            "quotes": ["一句话"]
        })
        .to_string();
        let a = Analysis::parse(&reply).unwrap();
        assert_eq!(a.summary, "概要");
        assert_eq!(a.key_concepts[0]["name"], "矛盾");
        assert_eq!(a.tags, vec!["哲学", "辩证法"]);
        assert_eq!(a.analysis, "延续了前文");
        assert_eq!(a.reflection.as_deref(), Some("启示"));
        assert_eq!(a.quotes, vec!["一句话"]);
    }

    #[test]
    fn strips_code_fence_and_accepts_connections_alias() {
        let reply = "```json\n{\"summary\": \"s\", \"connections\": \"links\"}\n```";
        let a = Analysis::parse(reply).unwrap();
        assert_eq!(a.summary, "s");
        assert_eq!(a.analysis, "links");
        assert!(a.key_concepts.is_null());
        assert!(a.reflection.is_none());
    }

    #[test]
    fn finds_object_inside_prose() {
        let a = Analysis::parse("Here you go:\n{\"summary\": \"x\"}\nThanks").unwrap();
        assert_eq!(a.summary, "x");
    }

    #[test]
    fn empty_object_is_all_defaults() {
        let a = Analysis::parse("{}").unwrap();
        assert_eq!(a, Analysis::default());
    }

    #[test]
    fn rejects_non_object_and_garbage() {
        assert!(matches!(Analysis::parse("[1, 2]"), Err(AnalysisError::Parse(_))));
        assert!(matches!(Analysis::parse("not json"), Err(AnalysisError::Parse(_))));
        assert!(matches!(Analysis::parse(""), Err(AnalysisError::Parse(_))));
    }

    fn chapter() -> Chapter {
        Chapter {
            id: "001".into(),
            title: "实践论".into(),
            content: "认识从实践始".into(),
            parts: vec![],
            date: None,
        }
    }

    #[tokio::test]
    async fn analyze_chapter_sends_context_and_parses() {
        let scripted = ScriptedProvider::new([Ok(r#"{"summary": "ok"}"#.to_string())]);
        let provider = LlmProvider::Scripted(scripted.clone());
        let prompts = AnalysisPrompts::load("/nonexistent", "book", 3000);

        let a = analyze_chapter(&provider, &prompts, &chapter(), "CTX-MARKER")
            .await
            .unwrap();
        assert_eq!(a.summary, "ok");
        let sent = scripted.prompts();
        assert!(sent[0].contains("CTX-MARKER"));
        assert!(sent[0].contains("认识从实践始"));
    }

    #[tokio::test]
    async fn provider_failure_is_provider_error() {
        let provider = LlmProvider::Scripted(ScriptedProvider::new([Err("timeout".to_string())]));
        let prompts = AnalysisPrompts::load("/nonexistent", "book", 3000);
        let err = analyze_chapter(&provider, &prompts, &chapter(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Provider(_)));
    }
}
