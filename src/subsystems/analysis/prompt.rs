//! Layered prompt builder for the chapter analysis call.
//!
//! Prompts are assembled from plain-text template fragments stored under the
//! configured prompts directory (`config/prompts/` by default). Each layer is
//! appended in order; a missing file falls back to the built-in text so the
//! binary works without any prompt files on disk.
//!
//! ```text
//! analysis_system.md: role, output contract (JSON fields)
//! analysis_user.md  : per-chapter body: {{context}}, {{title}}, {{text}}
//! ```
//!
//! Variable substitution uses `{{key}}` syntax and is applied once at
//! [`build()`](PromptBuilder::build) time, in a single pass: substituted
//! values are never re-scanned, so chapter text containing `{{...}}` is
//! passed through verbatim.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

const SEPARATOR: &str = "\n\n";

pub const SYSTEM_FILE: &str = "analysis_system.md";
pub const USER_FILE: &str = "analysis_user.md";

const TRUNCATION_NOTE: &str = "\n\n[… chapter truncated …]";

const DEFAULT_SYSTEM: &str = r#"You are a careful reader and analyst working through the book "{{book}}" one chapter at a time.

Do not write a flat summary. Trace how ideas develop across chapters and how each chapter relates to concepts introduced earlier.

Reply with a single JSON object, in the language of the book, with these fields:
- "summary": the core argument of the chapter (at most 300 words)
- "key_concepts": [{"name": "concept name", "definition": "its meaning in this chapter"}]
- "tags": a few short topical tags
- "analysis": how this chapter connects to the known concepts (extends, refutes, makes concrete...)
- "reflection": what the chapter offers today, beyond its own context
- "quotes": up to three short verbatim quotations from the chapter"#;

const DEFAULT_USER: &str = r#"{{context}}

---
Chapter: {{title}}

{{text}}
---

Analyse the chapter against the known concepts above. When it returns to a concept seen earlier, point out how the concept evolves within the book."#;

/// Fluent builder that assembles a layered prompt from template files.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    prompts_dir: PathBuf,
    parts: Vec<String>,
    vars: HashMap<String, String>,
}

impl PromptBuilder {
    /// Create a builder rooted at `prompts_dir` (e.g. `"config/prompts"`).
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: prompts_dir.into(),
            parts: Vec::new(),
            vars: HashMap::new(),
        }
    }

    /// Append a layer loaded from `filename` in the prompts directory, or
    /// `fallback` when the file is missing or blank. An empty result adds
    /// no layer.
    pub fn layer_or(mut self, filename: &str, fallback: &str) -> Self {
        let path = self.prompts_dir.join(filename);
        let text = match fs::read_to_string(&path) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                debug!(path = %path.display(), "prompt layer is blank; using fallback");
                fallback.to_string()
            }
            Err(_) => {
                debug!(path = %path.display(), "prompt layer not found; using fallback");
                fallback.to_string()
            }
        };
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.parts.push(trimmed.to_string());
        }
        self
    }

    /// Register a single variable.
    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// Join all layers with blank lines and substitute variables.
    pub fn build(&self) -> String {
        substitute(&self.parts.join(SEPARATOR), &self.vars)
    }
}

/// Replace every `{{key}}` whose key is in `vars`. Unknown placeholders are
/// left as they are.
fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        match vars.get(after[..end].trim()) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Cut `text` to at most `max_chars` characters, appending a note when
/// anything was dropped.
pub fn truncate_chapter(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_NOTE}", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

/// The two prompts of the analysis call, loaded once per run.
#[derive(Debug, Clone)]
pub struct AnalysisPrompts {
    system: String,
    user: PromptBuilder,
    max_chapter_chars: usize,
}

impl AnalysisPrompts {
    pub fn load(prompts_dir: impl AsRef<Path>, book: &str, max_chapter_chars: usize) -> Self {
        let dir = prompts_dir.as_ref();
        let system = PromptBuilder::new(dir)
            .layer_or(SYSTEM_FILE, DEFAULT_SYSTEM)
            .var("book", book)
            .build();
        let user = PromptBuilder::new(dir)
            .layer_or(USER_FILE, DEFAULT_USER)
            .var("book", book);
        Self {
            system,
            user,
            max_chapter_chars,
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    /// User prompt for one chapter, with the memory digest as `context`.
    pub fn user(&self, title: &str, text: &str, context: &str) -> String {
        let text = truncate_chapter(text, self.max_chapter_chars);
        self.user
            .clone()
            .var("title", title)
            .var("context", context)
            .var("text", text)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn builder_assembles_layers_in_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.md"), "first\n").unwrap();
        fs::write(dir.path().join("b.md"), "  second").unwrap();
        let result = PromptBuilder::new(dir.path())
            .layer_or("a.md", "")
            .layer_or("b.md", "")
            .build();
        assert_eq!(result, "first\n\nsecond");
    }

    #[test]
    fn builder_skips_missing_file_without_fallback() {
        let result = PromptBuilder::new("/nonexistent")
            .layer_or("nonexistent_file_xyz.md", "")
            .layer_or("also_missing.md", "hello")
            .build();
        assert_eq!(result, "hello");
    }

    #[test]
    fn blank_file_uses_fallback() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x.md"), "  \n").unwrap();
        let result = PromptBuilder::new(dir.path()).layer_or("x.md", "fallback").build();
        assert_eq!(result, "fallback");
    }

    #[test]
    fn substitution_is_single_pass() {
        let result = PromptBuilder::new("/nonexistent")
            .layer_or("missing.md", "A={{a}} B={{ b }} C={{c}}")
            .var("a", "{{b}}")
            .var("b", "2")
            .build();
        assert_eq!(result, "A={{b}} B=2 C={{c}}");
    }

    #[test]
    fn unterminated_placeholder_is_kept() {
        let vars = HashMap::from([("x".to_string(), "1".to_string())]);
        assert_eq!(substitute("{{x}} and {{x", &vars), "1 and {{x");
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate_chapter("短文本", 10), "短文本");
        let cut = truncate_chapter("一二三四五", 3);
        assert!(cut.starts_with("一二三"));
        assert!(!cut.contains('四'));
        assert!(cut.ends_with("chapter truncated …]"));
    }

    #[test]
    fn builtin_prompts_carry_all_vars() {
        let p = AnalysisPrompts::load("/nonexistent", "实践论", 3000);
        assert!(p.system().contains("实践论"));
        assert!(p.system().contains("key_concepts"));
        let user = p.user("第一章", "正文 {{context}}", "Known concepts so far:\n- 矛盾: x");
        assert!(user.contains("第一章"));
        assert!(user.contains("- 矛盾: x"));
        // Placeholders inside chapter text are not expanded.
        assert!(user.contains("正文 {{context}}"));
        assert!(!user.contains("{{title}}"));
    }

    #[test]
    fn prompt_files_override_builtins() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(SYSTEM_FILE), "Custom system for {{book}}").unwrap();
        fs::write(dir.path().join(USER_FILE), "T={{title}} X={{text}}").unwrap();
        let p = AnalysisPrompts::load(dir.path(), "B", 2);
        assert_eq!(p.system(), "Custom system for B");
        assert!(p.user("t", "abcdef", "ctx").starts_with("T=t X=ab"));
    }
}
