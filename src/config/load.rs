//! Configuration loading with env-var overrides.
//!
//! Reads TOML files, supports `[meta] base = "..."` inheritance chains,
//! and applies `CHAPTERWISE_*` and `LLM_*` env overrides.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AppError;

use super::raw::RawConfig;
use super::types::*;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Values that override the TOML after merging.
///
/// [`load`] fills this from the environment; tests build it directly instead
/// of mutating process env vars.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// `CHAPTERWISE_OUTPUT_DIR`
    pub output_dir: Option<String>,
    /// `CHAPTERWISE_LOG_LEVEL`
    pub log_level: Option<String>,
    /// `LLM_BASE_URL`
    pub llm_base_url: Option<String>,
    /// `LLM_MODEL`
    pub llm_model: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            output_dir: env::var("CHAPTERWISE_OUTPUT_DIR").ok(),
            log_level: env::var("CHAPTERWISE_LOG_LEVEL").ok(),
            llm_base_url: env::var("LLM_BASE_URL").ok(),
            llm_model: env::var("LLM_MODEL").ok(),
        }
    }
}

/// Deep-merge two TOML values.
/// Tables are merged recursively: the overlay only needs to specify keys that
/// differ from the base. For every other type (string, integer, array, …)
/// the overlay value replaces the base value wholesale.
fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, ov_val) in overlay_tbl {
                let merged = match base_tbl.remove(&key) {
                    Some(base_val) => merge_toml(base_val, ov_val),
                    None => ov_val,
                };
                base_tbl.insert(key, merged);
            }
            toml::Value::Table(base_tbl)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file, follow any `[meta] base = "..."` chain, and return the
/// fully merged `toml::Value`. `visited` carries canonicalized paths already
/// seen in this chain so circular references are caught early.
fn load_raw_merged(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<toml::Value, AppError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        return Err(AppError::Config(format!(
            "circular base reference detected at: {}",
            path.display()
        )));
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let overlay_val: toml::Value = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    if let Some(base_str) = overlay_val
        .get("meta")
        .and_then(|m| m.get("base"))
        .and_then(|b| b.as_str())
    {
        let base_path = if Path::new(base_str).is_absolute() {
            PathBuf::from(base_str)
        } else {
            path.parent().unwrap_or(Path::new(".")).join(base_str)
        };
        let base_val = load_raw_merged(&base_path, visited)?;
        Ok(merge_toml(base_val, overlay_val))
    } else {
        Ok(overlay_val)
    }
}

/// Load config from the given path, or `config/default.toml`, then apply env-var overrides.
/// If no path is given and `config/default.toml` does not exist, the built-in defaults are used.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let overrides = Overrides::from_env();

    if let Some(path) = config_path {
        return load_from(Path::new(path), &overrides);
    }

    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        load_from(default_path, &overrides)
    } else {
        Ok(resolve(RawConfig::default(), &overrides))
    }
}

/// Internal loader: accepts an explicit path and overrides.
/// Follows `[meta] base = "..."` inheritance chains before resolving.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let merged_val = load_raw_merged(path, &mut HashSet::new())?;

    let parsed: RawConfig = Deserialize::deserialize(merged_val).map_err(|e: toml::de::Error| {
        AppError::Config(format!("config error in {}: {e}", path.display()))
    })?;

    let config = resolve(parsed, overrides);
    validate(&config)?;
    Ok(config)
}

/// Turn the raw file shape into resolved types, applying overrides.
fn resolve(parsed: RawConfig, overrides: &Overrides) -> Config {
    let p = parsed.pipeline;

    let output_dir = expand_home(overrides.output_dir.as_deref().unwrap_or(&p.output_dir));
    let log_level = overrides.log_level.clone().unwrap_or(p.log_level);

    Config {
        log_level,
        log_file: p.log_file.as_deref().map(expand_home),
        pipeline: PipelineConfig {
            book_name: p.book_name,
            output_dir,
            delay_ms: p.delay_ms,
            max_chapter_chars: p.max_chapter_chars.max(1),
            prompts_dir: expand_home(&p.prompts_dir),
        },
        source: SourceConfig {
            path: parsed.source.path.as_deref().map(expand_home),
            min_chapter_chars: parsed.source.min_chapter_chars,
        },
        memory: MemoryConfig {
            context_limit: parsed.memory.context_limit,
            definition_preview_chars: parsed.memory.definition_preview_chars.max(1),
            snapshot_file: parsed.memory.snapshot_file,
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            openai: OpenAiConfig {
                api_base_url: overrides
                    .llm_base_url
                    .clone()
                    .unwrap_or(parsed.llm.openai.api_base_url),
                model: overrides.llm_model.clone().unwrap_or(parsed.llm.openai.model),
                temperature: parsed.llm.openai.temperature,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
                json_mode: parsed.llm.openai.json_mode,
            },
        },
        llm_api_key: env::var("LLM_API_KEY").ok().filter(|k| !k.trim().is_empty()),
    }
}

fn validate(config: &Config) -> Result<(), AppError> {
    if config.pipeline.book_name.trim().is_empty() {
        return Err(AppError::Config("pipeline.book_name must not be empty".into()));
    }
    if config.memory.snapshot_file.trim().is_empty() {
        return Err(AppError::Config("memory.snapshot_file must not be empty".into()));
    }
    Ok(())
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
