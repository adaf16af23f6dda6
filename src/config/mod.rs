//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `CHAPTERWISE_OUTPUT_DIR`, `CHAPTERWISE_LOG_LEVEL`,
//! `LLM_BASE_URL` and `LLM_MODEL` env overrides.
//!
//! # Module layout
//!
//! - **types**: Public configuration structs consumed by subsystems
//!   (`Config`, `PipelineConfig`, `MemoryConfig`, etc.).
//! - **raw**: Raw TOML deserialization types (`RawConfig`, `RawLlm`, …).
//!   These mirror the file shape and use serde defaults; kept private.
//! - **load**: Loading logic: `merge_toml`, `load_raw_merged`, `load`,
//!   `load_from`, `expand_home`.

mod load;
mod raw;
mod types;

pub use load::{Overrides, expand_home, load, load_from};
pub use types::*;

impl Config {
    /// Safe `Config` for tests: dummy LLM, no API keys, output under `output_dir`.
    ///
    /// Public, not `#[cfg(test)]`, because the integration tests under
    /// `tests/` link the library as a normal dependency. The binary never
    /// calls it.
    pub fn test_default(output_dir: &std::path::Path) -> Self {
        Self {
            log_level: "info".into(),
            log_file: None,
            pipeline: PipelineConfig {
                book_name: "test-book".into(),
                output_dir: output_dir.to_path_buf(),
                delay_ms: 0,
                max_chapter_chars: raw::default_max_chapter_chars(),
                prompts_dir: output_dir.join("prompts"),
            },
            source: SourceConfig {
                path: None,
                min_chapter_chars: 0,
            },
            memory: MemoryConfig {
                context_limit: raw::default_context_limit(),
                definition_preview_chars: raw::default_definition_preview_chars(),
                snapshot_file: raw::default_snapshot_file(),
            },
            llm: LlmConfig {
                provider: "dummy".into(),
                openai: OpenAiConfig {
                    api_base_url: "http://localhost:0/v1/chat/completions".into(),
                    model: "test-model".into(),
                    temperature: 0.0,
                    timeout_seconds: 1,
                    json_mode: true,
                },
            },
            llm_api_key: None,
        }
    }
}
