//! Public configuration types.
//!
//! These are the resolved, ready-to-use structs that subsystems consume.
//! Raw TOML deserialization types live in `raw.rs`.

use std::path::PathBuf;

// ── Pipeline ─────────────────────────────────────────────────────────────────

/// Chapter pipeline configuration (`[pipeline]`).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Book name; also the name of the output sub-directory.
    pub book_name: String,
    /// Root output directory (already expanded, no `~`).
    pub output_dir: PathBuf,
    /// Pause between two analysed chapters, in milliseconds.
    pub delay_ms: u64,
    /// Chapter text is cut to this many characters before prompting.
    pub max_chapter_chars: usize,
    /// Directory holding the prompt templates.
    pub prompts_dir: PathBuf,
}

impl PipelineConfig {
    /// `<output_dir>/<book_name>`: every artifact of one book lives here.
    pub fn book_dir(&self) -> PathBuf {
        self.output_dir.join(&self.book_name)
    }
}

// ── Source ───────────────────────────────────────────────────────────────────

/// Chapter source configuration (`[source]`).
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Directory of chapter files or a JSON manifest.
    pub path: Option<PathBuf>,
    /// Chapters shorter than this (in characters) are dropped.
    pub min_chapter_chars: usize,
}

// ── Memory ───────────────────────────────────────────────────────────────────

/// Concept memory configuration (`[memory]`).
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// How many concepts the context summary carries into the next prompt.
    pub context_limit: usize,
    /// Definitions longer than this are cut in the context summary.
    pub definition_preview_chars: usize,
    /// Snapshot file name inside the book directory.
    pub snapshot_file: String,
}

// ── LLM ──────────────────────────────────────────────────────────────────────

/// OpenAI / OpenAI-compatible provider configuration.
/// Populated from `[llm.openai]` in the TOML.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Model name passed in the request body.
    pub model: String,
    /// Sampling temperature (ignored for models that forbid it).
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
    /// Ask the endpoint for a JSON object response.
    pub json_mode: bool,
}

/// LLM configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active (e.g. `"dummy"`, `"openai"`).
    pub provider: String,
    /// Config for the OpenAI / OpenAI-compatible provider (`[llm.openai]`).
    pub openai: OpenAiConfig,
}

// ── Config (root) ────────────────────────────────────────────────────────────

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Optional log file; stderr when `None`.
    pub log_file: Option<PathBuf>,
    pub pipeline: PipelineConfig,
    pub source: SourceConfig,
    pub memory: MemoryConfig,
    pub llm: LlmConfig,
    /// API key from `LLM_API_KEY` env var: never sourced from TOML.
    pub llm_api_key: Option<String>,
}

impl Config {
    /// Path of the concept memory snapshot for the configured book.
    pub fn snapshot_path(&self) -> PathBuf {
        self.pipeline.book_dir().join(&self.memory.snapshot_file)
    }
}
