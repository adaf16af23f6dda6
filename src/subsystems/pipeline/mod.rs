//! Chapter pipeline: drives source, analysis, memory and rendering.
//!
//! Per chapter, strictly in source order:
//!
//! 1. chapter note exists → already done, skip (unless forced);
//! 2. purge the unit's earlier contributions from a working copy of the
//!    memory;
//! 3. analyse with the working copy's context summary;
//! 4. record the returned concepts in the working copy and adopt it;
//! 5. save the snapshot;
//! 6. write the chapter note, which marks the unit as done.
//!
//! A failed or interrupted analysis drops the working copy, so the memory
//! is left exactly as it was. The snapshot is always saved before the note
//! is written: a crash in between, or a failed save, leaves a unit that is
//! re-analysed (and purged first) on the next run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::llm::LlmProvider;
use crate::subsystems::analysis::{AnalysisPrompts, analyze_chapter};
use crate::subsystems::memory::{ConceptMemory, PurgeOutcome, UnitId};
use crate::subsystems::render;
use crate::subsystems::source::Chapter;

/// Per-run switches, usually from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Units re-analysed even when their note already exists.
    pub force: HashSet<String>,
    /// Stop after this many analysis attempts.
    pub max_chapters: Option<usize>,
    /// Analyse but write nothing to disk.
    pub dry_run: bool,
}

/// What one [`Pipeline::run`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Units analysed and recorded.
    pub processed: Vec<String>,
    /// Units skipped because their note already existed.
    pub skipped_done: usize,
    /// `(unit id, reason)` for every unit whose analysis failed.
    pub failed: Vec<(String, String)>,
    /// Stopped early by the shutdown token.
    pub interrupted: bool,
}

impl RunReport {
    fn attempted(&self) -> usize {
        self.processed.len() + self.failed.len()
    }
}

enum UnitOutcome {
    Done,
    Failed(String),
    Interrupted,
}

pub struct Pipeline {
    book_name: String,
    book_dir: PathBuf,
    snapshot_path: PathBuf,
    context_limit: usize,
    preview_chars: usize,
    delay: Duration,
    provider: LlmProvider,
    prompts: AnalysisPrompts,
    memory: ConceptMemory,
}

impl Pipeline {
    /// Build a pipeline for the configured book, loading its memory snapshot
    /// (an unusable snapshot degrades to an empty memory).
    pub fn new(config: &Config, provider: LlmProvider) -> Self {
        let snapshot_path = config.snapshot_path();
        let memory = ConceptMemory::load_or_default(&snapshot_path);
        Self {
            book_name: config.pipeline.book_name.clone(),
            book_dir: config.pipeline.book_dir(),
            snapshot_path,
            context_limit: config.memory.context_limit,
            preview_chars: config.memory.definition_preview_chars,
            delay: Duration::from_millis(config.pipeline.delay_ms),
            prompts: AnalysisPrompts::load(
                &config.pipeline.prompts_dir,
                &config.pipeline.book_name,
                config.pipeline.max_chapter_chars,
            ),
            provider,
            memory,
        }
    }

    pub fn memory(&self) -> &ConceptMemory {
        &self.memory
    }

    pub fn book_dir(&self) -> &Path {
        &self.book_dir
    }

    /// Current digest, as the next chapter would see it.
    pub fn context_summary(&self) -> String {
        self.memory
            .context_summary(self.context_limit, self.preview_chars)
    }

    pub fn is_done(&self, unit: &str) -> bool {
        render::chapter_note_path(&self.book_dir, unit).exists()
    }

    /// Analyse every pending chapter, then rebuild concept cards and the
    /// index. Per-chapter failures are reported, not returned.
    pub async fn run(
        &mut self,
        chapters: &[Chapter],
        options: &RunOptions,
        shutdown: &CancellationToken,
    ) -> Result<RunReport, AppError> {
        let mut report = RunReport::default();
        info!(
            book = %self.book_name,
            chapters = chapters.len(),
            provider = self.provider.name(),
            dry_run = options.dry_run,
            "pipeline starting"
        );

        for (index, chapter) in chapters.iter().enumerate() {
            if shutdown.is_cancelled() {
                report.interrupted = true;
                break;
            }

            if self.is_done(&chapter.id) && !options.force.contains(&chapter.id) {
                debug!(unit = %chapter.id, "already analysed; skipped");
                report.skipped_done += 1;
                continue;
            }

            if options.max_chapters.is_some_and(|max| report.attempted() >= max) {
                info!(max = ?options.max_chapters, "chapter limit reached; stopping");
                break;
            }

            if report.attempted() > 0 && !self.delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => {}
                    _ = shutdown.cancelled() => {
                        report.interrupted = true;
                        break;
                    }
                }
            }

            info!(
                unit = %chapter.id,
                title = %chapter.title,
                position = index + 1,
                total = chapters.len(),
                "analysing chapter"
            );
            match self.process(chapter, options.dry_run, shutdown).await {
                UnitOutcome::Done => report.processed.push(chapter.id.clone()),
                UnitOutcome::Failed(reason) => {
                    warn!(unit = %chapter.id, %reason, "chapter skipped");
                    report.failed.push((chapter.id.clone(), reason));
                }
                UnitOutcome::Interrupted => {
                    report.interrupted = true;
                    break;
                }
            }
        }

        if report.interrupted {
            warn!("interrupted; progress up to the last completed chapter is saved");
        }

        if !options.dry_run {
            self.render(chapters)?;
        }

        info!(
            processed = report.processed.len(),
            skipped_done = report.skipped_done,
            failed = report.failed.len(),
            concepts = self.memory.len(),
            "pipeline finished"
        );
        Ok(report)
    }

    async fn process(
        &mut self,
        chapter: &Chapter,
        dry_run: bool,
        shutdown: &CancellationToken,
    ) -> UnitOutcome {
        let unit = match UnitId::new(chapter.id.as_str()) {
            Ok(u) => u,
            Err(e) => return UnitOutcome::Failed(e.to_string()),
        };

        let mut working = self.memory.clone();
        let purged = working.purge(unit.as_str());
        if !purged.is_noop() {
            info!(
                unit = %unit,
                detached = purged.detached,
                removed = purged.removed,
                "earlier contributions purged before re-analysis"
            );
        }

        let context = working.context_summary(self.context_limit, self.preview_chars);
        let analysis = tokio::select! {
            result = analyze_chapter(&self.provider, &self.prompts, chapter, &context) => result,
            _ = shutdown.cancelled() => return UnitOutcome::Interrupted,
        };
        let analysis = match analysis {
            Ok(a) => a,
            Err(e) => return UnitOutcome::Failed(e.to_string()),
        };

        let outcome = working.update_from_value(&analysis.key_concepts, &unit);
        info!(
            unit = %unit,
            recorded = outcome.recorded,
            new_concepts = outcome.new_concepts,
            skipped = outcome.skipped,
            concepts = working.len(),
            "concepts recorded"
        );
        self.memory = working;

        if dry_run {
            return UnitOutcome::Done;
        }

        // The adopted state stays in memory; the next successful save
        // catches up. Without a note the unit is re-analysed next run.
        if let Err(e) = self.memory.save(&self.snapshot_path) {
            error!(unit = %unit, error = %e, "snapshot save failed; chapter note not written");
            return UnitOutcome::Failed(format!("snapshot save failed: {e}"));
        }

        match render::write_chapter_note(&self.book_dir, chapter, &analysis, &self.memory) {
            Ok(_) => UnitOutcome::Done,
            Err(e) => UnitOutcome::Failed(format!("cannot write chapter note: {e}")),
        }
    }

    /// Remove `units` from the memory and delete their notes, so the next
    /// run analyses them again. Saves the snapshot and rebuilds the cards
    /// and index.
    pub fn purge_units(
        &mut self,
        units: &[String],
        chapters: &[Chapter],
    ) -> Result<Vec<(String, PurgeOutcome)>, AppError> {
        let mut outcomes = Vec::with_capacity(units.len());
        for unit in units {
            let outcome = self.memory.purge(unit);
            let note = render::chapter_note_path(&self.book_dir, unit);
            let note_removed = match std::fs::remove_file(&note) {
                Ok(()) => true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => return Err(e.into()),
            };
            info!(
                unit = %unit,
                detached = outcome.detached,
                removed = outcome.removed,
                note_removed,
                "unit purged"
            );
            outcomes.push((unit.clone(), outcome));
        }
        self.memory.save(&self.snapshot_path)?;
        self.render(chapters)?;
        Ok(outcomes)
    }

    /// Rebuild concept cards, and the index when the chapter list is known.
    pub fn render(&self, chapters: &[Chapter]) -> Result<(), AppError> {
        render::write_concept_cards(&self.book_dir, &self.memory)?;
        if chapters.is_empty() {
            debug!("no chapter list; index not rebuilt");
        } else {
            render::write_index(&self.book_dir, &self.book_name, chapters, &self.memory)?;
        }
        Ok(())
    }
}
