//! Rendering: Markdown notes for a linked-notes vault.
//!
//! ```text
//! {output_dir}/{book}/
//! ├── index.md
//! ├── chapters/
//! │   └── {unit_id}.md      one per analysed chapter; doubles as the
//! │                         pipeline's completion marker
//! └── concepts/
//!     └── {concept}.md      rebuilt wholesale from the concept memory
//! ```
//!
//! Links use `[[target]]` / `[[target|label]]` wiki syntax.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tracing::{debug, info};

use crate::error::AppError;
use crate::subsystems::analysis::Analysis;
use crate::subsystems::memory::{ConceptMemory, Observation};
use crate::subsystems::source::Chapter;

pub const CHAPTERS_DIRNAME: &str = "chapters";
pub const CONCEPTS_DIRNAME: &str = "concepts";
pub const INDEX_FILENAME: &str = "index.md";

const MAX_FILE_NAME_CHARS: usize = 120;
const INDEX_TOP_CONCEPTS: usize = 30;

/// Make `name` safe as a file name on every common filesystem.
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed: String = replaced
        .trim_matches(|c: char| c == '.' || c.is_whitespace())
        .chars()
        .take(MAX_FILE_NAME_CHARS)
        .collect();
    let trimmed = trimmed.trim_end_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn chapter_note_path(book_dir: &Path, unit_id: &str) -> PathBuf {
    book_dir
        .join(CHAPTERS_DIRNAME)
        .join(format!("{}.md", sanitize_file_name(unit_id)))
}

/// Card file stem for every concept in `memory`. Names that sanitize to the
/// same stem (ignoring case) get `-2`, `-3`… suffixes in insertion order.
pub fn card_stems(memory: &ConceptMemory) -> HashMap<String, String> {
    let mut taken = HashSet::new();
    let mut stems = HashMap::with_capacity(memory.len());
    for (name, _) in memory.iter() {
        let base = sanitize_file_name(name);
        let mut stem = base.clone();
        let mut n = 2;
        while !taken.insert(stem.to_lowercase()) {
            stem = format!("{base}-{n}");
            n += 1;
        }
        if stem != base {
            debug!(concept = %name, file = %stem, "concept card name disambiguated");
        }
        stems.insert(name.to_string(), stem);
    }
    stems
}

/// Render one chapter note. Concept links resolve through `stems`.
pub fn render_chapter_note(
    chapter: &Chapter,
    analysis: &Analysis,
    stems: &HashMap<String, String>,
    processed_at: &str,
) -> String {
    let mut out = String::new();

    out.push_str("---\n");
    let _ = writeln!(out, "title: {}", yaml_str(&chapter.title));
    let _ = writeln!(out, "unit: {}", yaml_str(&chapter.id));
    yaml_list(&mut out, "parts", &chapter.parts);
    if let Some(date) = &chapter.date {
        let _ = writeln!(out, "date: {}", yaml_str(date));
    }
    yaml_list(&mut out, "tags", &analysis.tags);
    let _ = writeln!(out, "processed_at: {}", yaml_str(processed_at));
    out.push_str("---\n\n");

    let _ = writeln!(out, "# {}\n", chapter.title);

    if !analysis.summary.is_empty() {
        out.push_str("> [!summary] Summary\n");
        for line in analysis.summary.lines() {
            let _ = writeln!(out, "> {line}");
        }
        out.push('\n');
    }

    let (concepts, _) = Observation::parse_batch(&analysis.key_concepts);
    if !concepts.is_empty() {
        out.push_str("## Key concepts\n\n");
        for c in &concepts {
            let _ = writeln!(out, "- **{}**: {}", concept_link(&c.name, stems), c.definition);
        }
        out.push('\n');
    }

    if !analysis.analysis.is_empty() {
        let _ = writeln!(out, "## Connections\n\n{}\n", analysis.analysis);
    }

    if let Some(reflection) = &analysis.reflection {
        let _ = writeln!(out, "## Reflection\n\n{reflection}\n");
    }

    if !analysis.quotes.is_empty() {
        out.push_str("## Quotes\n\n");
        for q in &analysis.quotes {
            for line in q.lines() {
                let _ = writeln!(out, "> {line}");
            }
            out.push('\n');
        }
    }

    out
}

/// Write the chapter note. Goes through a temp file so a half-written note
/// never counts as done.
pub fn write_chapter_note(
    book_dir: &Path,
    chapter: &Chapter,
    analysis: &Analysis,
    memory: &ConceptMemory,
) -> Result<PathBuf, AppError> {
    let processed_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let path = chapter_note_path(book_dir, &chapter.id);
    let note = render_chapter_note(chapter, analysis, &card_stems(memory), &processed_at);
    write_atomic(&path, &note)?;
    debug!(unit = %chapter.id, path = %path.display(), "chapter note written");
    Ok(path)
}

/// Render one concept card.
pub fn render_concept_card(name: &str, definition: &str, units: &[String]) -> String {
    let mut out = String::new();
    out.push_str("---\n");
    let _ = writeln!(out, "concept: {}", yaml_str(name));
    let _ = writeln!(out, "appearances: {}", units.len());
    out.push_str("---\n\n");
    let _ = writeln!(out, "# {name}\n");
    let _ = writeln!(out, "{definition}\n");
    out.push_str("## Appears in\n\n");
    for unit in units {
        let _ = writeln!(out, "- [[{}]]", sanitize_file_name(unit));
    }
    out
}

/// Rebuild `concepts/` from scratch. Returns the number of cards written.
pub fn write_concept_cards(book_dir: &Path, memory: &ConceptMemory) -> Result<usize, AppError> {
    let dir = book_dir.join(CONCEPTS_DIRNAME);
    if dir.exists() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "md") {
                fs::remove_file(&path)?;
            }
        }
    } else {
        fs::create_dir_all(&dir)?;
    }

    let stems = card_stems(memory);
    let mut written = 0;
    for (name, definition) in memory.iter() {
        let stem = &stems[name];
        let card = render_concept_card(name, definition, memory.appearances_of(name));
        fs::write(dir.join(format!("{stem}.md")), card)?;
        written += 1;
    }
    info!(cards = written, dir = %dir.display(), "concept cards rebuilt");
    Ok(written)
}

/// Render the book index.
pub fn render_index(
    book_name: &str,
    chapters: &[Chapter],
    done: &HashSet<String>,
    memory: &ConceptMemory,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {book_name}\n");
    let _ = writeln!(
        out,
        "{} of {} chapters analysed · {} concepts\n",
        chapters.iter().filter(|c| done.contains(&c.id)).count(),
        chapters.len(),
        memory.len()
    );

    out.push_str("## Chapters\n\n");
    let mut current_parts: &[String] = &[];
    for chapter in chapters {
        if chapter.parts.as_slice() != current_parts {
            if let Some(part) = chapter.parts.last() {
                let _ = writeln!(out, "\n### {part}\n");
            }
            current_parts = &chapter.parts;
        }
        let link = wiki_link(&sanitize_file_name(&chapter.id), &chapter.title);
        if done.contains(&chapter.id) {
            let _ = writeln!(out, "- {link}");
        } else {
            let _ = writeln!(out, "- {link} *(pending)*");
        }
    }

    let top = memory.top_concepts(INDEX_TOP_CONCEPTS);
    if !top.is_empty() {
        let stems = card_stems(memory);
        out.push_str("\n## Top concepts\n\n");
        for (name, count) in top {
            let _ = writeln!(out, "- {} ({count})", concept_link(name, &stems));
        }
    }
    out
}

/// Write `index.md`. A chapter counts as done when its note exists.
pub fn write_index(
    book_dir: &Path,
    book_name: &str,
    chapters: &[Chapter],
    memory: &ConceptMemory,
) -> Result<PathBuf, AppError> {
    let done: HashSet<String> = chapters
        .iter()
        .filter(|c| chapter_note_path(book_dir, &c.id).exists())
        .map(|c| c.id.clone())
        .collect();
    let path = book_dir.join(INDEX_FILENAME);
    write_atomic(&path, &render_index(book_name, chapters, &done, memory))?;
    debug!(path = %path.display(), "index written");
    Ok(path)
}

fn write_atomic(path: &Path, text: &str) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        AppError::Render(format!("cannot move note into place at {}: {e}", path.display()))
    })
}

fn concept_link(name: &str, stems: &HashMap<String, String>) -> String {
    match stems.get(name) {
        Some(stem) => wiki_link(stem, name),
        None => wiki_link(&sanitize_file_name(name), name),
    }
}

fn wiki_link(target: &str, label: &str) -> String {
    let label = label.replace(['[', ']', '|'], " ");
    let label = label.trim();
    if label.is_empty() || label == target {
        format!("[[{target}]]")
    } else {
        format!("[[{target}|{label}]]")
    }
}

/// Double-quoted YAML scalar; JSON string escaping is valid YAML.
fn yaml_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn yaml_list(out: &mut String, key: &str, items: &[String]) {
    if items.is_empty() {
        let _ = writeln!(out, "{key}: []");
        return;
    }
    let _ = writeln!(out, "{key}:");
    for item in items {
        let _ = writeln!(out, "  - {}", yaml_str(item));
    }
}
