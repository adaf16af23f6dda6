//! Raw TOML deserialization types.
//!
//! These structs mirror the TOML file shape and use `serde` defaults.
//! The `load` module converts them into the public `types` structs.

use serde::Deserialize;

// ── Top-level ────────────────────────────────────────────────────────────────

/// Raw TOML shape: serde target before resolution.
#[derive(Deserialize, Default)]
pub(super) struct RawConfig {
    #[serde(default)]
    pub pipeline: RawPipeline,
    #[serde(default)]
    pub source: RawSource,
    #[serde(default)]
    pub memory: RawMemory,
    #[serde(default)]
    pub llm: RawLlm,
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawPipeline {
    #[serde(default = "default_book_name")]
    pub book_name: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_max_chapter_chars")]
    pub max_chapter_chars: usize,
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: String,
}

impl Default for RawPipeline {
    fn default() -> Self {
        Self {
            book_name: default_book_name(),
            output_dir: default_output_dir(),
            log_level: default_log_level(),
            log_file: None,
            delay_ms: default_delay_ms(),
            max_chapter_chars: default_max_chapter_chars(),
            prompts_dir: default_prompts_dir(),
        }
    }
}

// ── Source ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawSource {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_min_chapter_chars")]
    pub min_chapter_chars: usize,
}

impl Default for RawSource {
    fn default() -> Self {
        Self {
            path: None,
            min_chapter_chars: default_min_chapter_chars(),
        }
    }
}

// ── Memory ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawMemory {
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,
    #[serde(default = "default_definition_preview_chars")]
    pub definition_preview_chars: usize,
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,
}

impl Default for RawMemory {
    fn default() -> Self {
        Self {
            context_limit: default_context_limit(),
            definition_preview_chars: default_definition_preview_chars(),
            snapshot_file: default_snapshot_file(),
        }
    }
}

// ── LLM ─────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawLlm {
    #[serde(rename = "default", default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            openai: RawOpenAiConfig::default(),
        }
    }
}

#[derive(Deserialize)]
pub(super) struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_openai_temperature")]
    pub temperature: f32,
    #[serde(default = "default_openai_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub json_mode: bool,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_openai_temperature(),
            timeout_seconds: default_openai_timeout_seconds(),
            json_mode: true,
        }
    }
}

// ── Default functions (used by serde) ────────────────────────────────────────

fn default_true() -> bool {
    true
}

pub(super) fn default_book_name() -> String {
    "book".to_string()
}
pub(super) fn default_output_dir() -> String {
    "output".to_string()
}
pub(super) fn default_log_level() -> String {
    "info".to_string()
}
pub(super) fn default_delay_ms() -> u64 {
    1000
}
pub(super) fn default_max_chapter_chars() -> usize {
    3000
}
pub(super) fn default_prompts_dir() -> String {
    "config/prompts".to_string()
}
pub(super) fn default_min_chapter_chars() -> usize {
    500
}
pub(super) fn default_context_limit() -> usize {
    20
}
pub(super) fn default_definition_preview_chars() -> usize {
    80
}
pub(super) fn default_snapshot_file() -> String {
    "knowledge_graph.json".to_string()
}
pub(super) fn default_llm_provider() -> String {
    "dummy".to_string()
}
pub(super) fn default_openai_api_base_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
pub(super) fn default_openai_model() -> String {
    "gpt-4o".to_string()
}
pub(super) fn default_openai_temperature() -> f32 {
    0.3
}
pub(super) fn default_openai_timeout_seconds() -> u64 {
    120
}
