//! Dummy LLM provider: answers every prompt with an empty but well-formed
//! analysis object. Backs `--dry-run`, which walks the chapters without an
//! API key or network access.

use serde_json::json;

use crate::llm::{LlmResponse, ProviderError};

/// Characters of the prompt echoed back in the `summary` field.
const ECHO_CHARS: usize = 60;

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    pub async fn complete(
        &self,
        content: &str,
        _system: Option<&str>,
    ) -> Result<LlmResponse, ProviderError> {
        let echo: String = content.trim().chars().take(ECHO_CHARS).collect();
        let body = json!({
            "summary": format!("[dry run] {echo}"),
            "key_concepts": [],
            "tags": ["dry-run"],
            "analysis": "",
            "quotes": [],
        });
        Ok(LlmResponse {
            text: body.to_string(),
            usage: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_returns_json_object() {
        let p = DummyProvider;
        let text = p.complete("hello", None).await.unwrap().text;
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["summary"], "[dry run] hello");
        assert!(v["key_concepts"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn complete_truncates_echo_by_chars() {
        let p = DummyProvider;
        let long = "矛".repeat(200);
        let text = p.complete(&long, None).await.unwrap().text;
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        let summary = v["summary"].as_str().unwrap();
        assert_eq!(summary.chars().count(), "[dry run] ".len() + ECHO_CHARS);
    }

    #[tokio::test]
    async fn complete_usage_is_none() {
        let p = DummyProvider;
        assert!(p.complete("test", None).await.unwrap().usage.is_none());
    }
}
