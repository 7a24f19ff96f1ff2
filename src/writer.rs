//! First stage: raw trace in, classified trace out.
//!
//! Metadata lookups dominate the run time, so lines are resolved on a worker
//! pool. Results carry their line index and are put back in input order
//! before classification, so the output does not depend on scheduling.
//! A line that fails anywhere is counted, logged with its index, and left
//! out; nothing a single line does can stop the run.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc::channel;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use workerpool::thunk::{Thunk, ThunkWorker};
use workerpool::Pool;

use crate::classify::classify;
use crate::inventory::OverlayInventory;
use crate::resolve::Resolver;
use crate::trace::{ClassifiedRecord, DropReason, RawTraceRecord};

/// Per-run counts for the classification stage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassifyStats {
    pub total: usize,
    pub written: usize,
    pub malformed: usize,
    pub unresolved: usize,
    pub reserved: usize,
    pub unclassified: usize,
    /// Lines whose worker died before reporting back.
    pub failed: usize,
}

impl ClassifyStats {
    fn record_drop(&mut self, line: usize, reason: &DropReason) {
        match reason {
            DropReason::Malformed(_) => {
                self.malformed += 1;
                tracing::warn!(line, "Skipping line: {}", reason);
            }
            DropReason::BlockNotFound { .. } | DropReason::PathNotFound { .. } => {
                self.unresolved += 1;
                tracing::debug!(line, "Dropping line: {}", reason);
            }
            DropReason::ReservedInode { .. } => {
                self.reserved += 1;
                tracing::debug!(line, "Dropping line: {}", reason);
            }
            DropReason::Unclassified { .. } => {
                self.unclassified += 1;
                tracing::debug!(line, "Dropping line: {}", reason);
            }
        }
    }

    pub fn dropped(&self) -> usize {
        self.total - self.written
    }
}

/// Progress bar over `total` lines, or a hidden one.
pub fn progress_bar(total: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    match ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} lines ({percent}%, {eta})",
    ) {
        Ok(style) => pb.set_style(style.progress_chars("#>-")),
        Err(e) => tracing::debug!("Falling back to default progress style: {}", e),
    }
    pb
}

/// Resolve every line on `jobs` workers, returning outcomes in line order.
///
/// A slot stays `None` if its worker panicked.
fn resolve_all(
    lines: &[String],
    resolver: &Resolver,
    jobs: usize,
    pb: &ProgressBar,
) -> Vec<Option<Result<String, DropReason>>> {
    let pool = Pool::<ThunkWorker<(usize, Result<String, DropReason>)>>::new(jobs.max(1));
    let (tx, rx) = channel();

    for (idx, line) in lines.iter().enumerate() {
        let resolver = resolver.clone();
        let line = line.clone();
        pool.execute_to(
            tx.clone(),
            Thunk::of(move || (idx, resolver.resolve_line(&line))),
        );
    }
    // Each job owns a sender; the channel closes once the last one finishes.
    drop(tx);

    let mut outcomes: Vec<Option<Result<String, DropReason>>> = vec![None; lines.len()];
    for (idx, outcome) in rx.iter() {
        outcomes[idx] = Some(outcome);
        pb.inc(1);
    }
    pool.join();
    outcomes
}

/// Resolve and classify `lines`, returning the classified trace lines in
/// input order.
pub fn classify_lines(
    lines: &[String],
    resolver: &Resolver,
    inventory: &OverlayInventory,
    jobs: usize,
    pb: &ProgressBar,
) -> (Vec<String>, ClassifyStats) {
    let mut stats = ClassifyStats {
        total: lines.len(),
        ..Default::default()
    };
    let mut output = Vec::new();

    let outcomes = resolve_all(lines, resolver, jobs, pb);
    for (idx, (line, outcome)) in lines.iter().zip(outcomes).enumerate() {
        let Some(outcome) = outcome else {
            stats.failed += 1;
            tracing::warn!(line = idx, "Skipping line: resolution worker failed");
            continue;
        };

        let classified = outcome.and_then(|path| {
            let raw = RawTraceRecord::parse(line)?;
            match classify(&path, inventory) {
                Some(classification) => Ok(ClassifiedRecord {
                    raw,
                    path,
                    classification,
                }),
                None => Err(DropReason::Unclassified { path }),
            }
        });

        match classified {
            Ok(record) => {
                output.push(record.to_line());
                stats.written += 1;
            }
            Err(reason) => stats.record_drop(idx, &reason),
        }
    }
    (output, stats)
}

/// Classify the raw trace at `input` and write the result to `output`.
///
/// Only a missing input or an unwritable output is fatal.
pub fn classify_trace(
    input: &Path,
    output: &Path,
    resolver: &Resolver,
    inventory: &OverlayInventory,
    jobs: usize,
    progress: bool,
) -> Result<ClassifyStats> {
    let text = fs::read_to_string(input)
        .with_context(|| format!("Failed to read raw trace {}", input.display()))?;
    let file = File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let mut writer = BufWriter::new(file);

    let lines: Vec<String> = text.lines().map(str::to_string).collect();
    tracing::info!(
        "Classifying {} lines from {} with {} workers",
        lines.len(),
        input.display(),
        jobs.max(1)
    );

    let pb = progress_bar(lines.len(), progress);
    let (classified, stats) = classify_lines(&lines, resolver, inventory, jobs, &pb);
    pb.finish_and_clear();

    for line in &classified {
        writeln!(writer, "{line}")
            .with_context(|| format!("Failed to write {}", output.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", output.display()))?;

    tracing::info!(
        total = stats.total,
        written = stats.written,
        malformed = stats.malformed,
        unresolved = stats.unresolved,
        reserved = stats.reserved,
        unclassified = stats.unclassified,
        failed = stats.failed,
        "Classification finished"
    );
    Ok(stats)
}
