//! Chapter source: turn a book on disk into an ordered list of [`Chapter`]s.
//!
//! Two layouts are accepted:
//!
//! - a **directory** of chapter files, walked recursively and ordered by
//!   relative path (`01-part/003-chapter.md`). Sub-directories become the
//!   chapter's `parts`;
//! - a **JSON manifest** (`*.json`): an array of
//!   `{id?, title, content? | file?, parts?, date?}` records, kept in array
//!   order. Relative `file` paths resolve against the manifest's directory.
//!
//! Allowed file extensions: `.md`, `.txt`, `.html`, `.htm`, `.xhtml`. HTML is
//! converted to Markdown first. Hidden entries are never descended into.
//! Files larger than [`MAX_FILE_BYTES`] or not valid UTF-8 are skipped with a
//! warning. Chapters shorter than `min_chapter_chars` are dropped: they are
//! usually a table of contents or a copyright page.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::{fs, io};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::error::AppError;
use crate::subsystems::render::sanitize_file_name;

/// Maximum size of a single chapter file.
pub const MAX_FILE_BYTES: u64 = 2_000_000; // 2 MB

const ALLOWED_EXTENSIONS: &[&str] = &["md", "txt", "html", "htm", "xhtml"];
const HTML_EXTENSIONS: &[&str] = &["html", "htm", "xhtml"];

/// Longest title taken from a chapter's first line.
const MAX_TITLE_CHARS: usize = 120;

/// One unit of work for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    /// Stable identifier; also the chapter note's file stem.
    pub id: String,
    pub title: String,
    pub content: String,
    /// Enclosing parts / sections, outermost first.
    pub parts: Vec<String>,
    pub date: Option<String>,
}

/// Load every chapter under `path` (directory or manifest), in book order.
pub fn load_chapters(path: &Path, config: &SourceConfig) -> Result<Vec<Chapter>, AppError> {
    let meta = fs::metadata(path)
        .map_err(|e| AppError::Source(format!("cannot open {}: {e}", path.display())))?;

    let raw = if meta.is_dir() {
        let mut files = Vec::new();
        collect_chapter_files(path, path, &mut files)?;
        files.sort_by(|a, b| a.0.cmp(&b.0));
        files
            .into_iter()
            .filter_map(|(rel, abs)| chapter_from_file(&rel, &abs))
            .collect()
    } else if has_extension(path, &["json"]) {
        load_manifest(path)?
    } else {
        return Err(AppError::Source(format!(
            "{} is neither a directory nor a .json manifest",
            path.display()
        )));
    };

    let total = raw.len();
    // Ids are settled before filtering so they do not depend on
    // `min_chapter_chars`.
    let chapters: Vec<Chapter> = dedupe_ids(raw)
        .into_iter()
        .filter(|c| {
            let chars = c.content.trim().chars().count();
            let keep = chars >= config.min_chapter_chars;
            if !keep {
                debug!(unit = %c.id, chars, "chapter below minimum length; dropped");
            }
            keep
        })
        .collect();

    info!(
        source = %path.display(),
        found = total,
        kept = chapters.len(),
        "chapters loaded"
    );
    Ok(chapters)
}

/// Recursively walk `current_dir` and push `(relative_path, absolute_path)`
/// for every allowed chapter file.
fn collect_chapter_files(
    source_root: &Path,
    current_dir: &Path,
    out: &mut Vec<(PathBuf, PathBuf)>,
) -> Result<(), AppError> {
    let read = fs::read_dir(current_dir)
        .map_err(|e| AppError::Source(format!("read_dir {}: {e}", current_dir.display())))?;

    for entry in read {
        let entry = entry.map_err(|e| AppError::Source(format!("dir entry error: {e}")))?;
        let path = entry.path();

        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            continue;
        }

        if path.is_dir() {
            collect_chapter_files(source_root, &path, out)?;
            continue;
        }
        if !path.is_file() || !has_extension(&path, ALLOWED_EXTENSIONS) {
            continue;
        }

        let rel = path
            .strip_prefix(source_root)
            .map_err(|_| AppError::Source(format!("strip_prefix failed for {}", path.display())))?
            .to_path_buf();
        out.push((rel, path));
    }
    Ok(())
}

fn chapter_from_file(rel: &Path, abs: &Path) -> Option<Chapter> {
    let content = read_chapter_text(abs)?;
    let stem = rel
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let parts: Vec<String> = rel
        .parent()
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();

    let id_source = parts
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(stem.as_str()))
        .collect::<Vec<_>>()
        .join("-");

    Some(Chapter {
        id: sanitize_file_name(&id_source),
        title: title_of(&content).unwrap_or_else(|| stem.clone()),
        content,
        parts,
        date: None,
    })
}

/// Read one chapter file as text, converting HTML. `None` (with a warning)
/// when the file is too large, unreadable or not UTF-8.
fn read_chapter_text(path: &Path) -> Option<String> {
    match fs::metadata(path) {
        Ok(m) if m.len() > MAX_FILE_BYTES => {
            warn!(
                path = %path.display(),
                bytes = m.len(),
                limit = MAX_FILE_BYTES,
                "chapter file too large; skipped"
            );
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot stat chapter file; skipped");
            return None;
        }
        _ => {}
    }

    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            warn!(path = %path.display(), "chapter file is not valid UTF-8; skipped");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read chapter file; skipped");
            return None;
        }
    };

    if !has_extension(path, HTML_EXTENSIONS) {
        return Some(text);
    }
    match htmd::convert(&text) {
        Ok(md) => Some(md),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "HTML conversion failed; skipped");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(default)]
    id: Option<String>,
    title: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    file: Option<PathBuf>,
    #[serde(default)]
    parts: Vec<String>,
    #[serde(default)]
    date: Option<String>,
}

fn load_manifest(path: &Path) -> Result<Vec<Chapter>, AppError> {
    let text = fs::read_to_string(path)
        .map_err(|e| AppError::Source(format!("cannot read manifest {}: {e}", path.display())))?;
    let entries: Vec<ManifestEntry> = serde_json::from_str(&text)
        .map_err(|e| AppError::Source(format!("malformed manifest {}: {e}", path.display())))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let mut chapters = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let content = match (entry.content, &entry.file) {
            (Some(c), _) => c,
            (None, Some(file)) => {
                let file = if file.is_absolute() {
                    file.clone()
                } else {
                    base.join(file)
                };
                match read_chapter_text(&file) {
                    Some(c) => c,
                    None => continue,
                }
            }
            (None, None) => {
                warn!(index, title = %entry.title, "manifest entry has neither content nor file; skipped");
                continue;
            }
        };
        let id = entry
            .id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| entry.title.clone());
        chapters.push(Chapter {
            id: sanitize_file_name(&id),
            title: entry.title,
            content,
            parts: entry.parts,
            date: entry.date,
        });
    }
    Ok(chapters)
}

/// First Markdown heading, else first non-empty line.
fn title_of(content: &str) -> Option<String> {
    let heading = content
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with('#'))
        .map(|l| l.trim_start_matches('#').trim())
        .filter(|l| !l.is_empty());
    heading
        .or_else(|| content.lines().map(str::trim).find(|l| !l.is_empty()))
        .map(|l| l.chars().take(MAX_TITLE_CHARS).collect())
}

/// Suffix repeated ids with `-2`, `-3`, … in order of appearance.
fn dedupe_ids(mut chapters: Vec<Chapter>) -> Vec<Chapter> {
    let mut taken: HashSet<String> = HashSet::new();
    for c in &mut chapters {
        if taken.insert(c.id.clone()) {
            continue;
        }
        let mut n = 2;
        let mut candidate = format!("{}-{n}", c.id);
        while taken.contains(&candidate) {
            n += 1;
            candidate = format!("{}-{n}", c.id);
        }
        warn!(unit = %c.id, renamed = %candidate, "duplicate chapter id");
        taken.insert(candidate.clone());
        c.id = candidate;
    }
    chapters
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .is_some_and(|ext| allowed.contains(&ext.as_str()))
}
