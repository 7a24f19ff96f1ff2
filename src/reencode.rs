//! Second stage: classified trace in, replay trace out.
//!
//! Works from the classified trace file alone, so it can be rerun without
//! the device, the containers, or the first stage. The output is a pure
//! function of the input: running it twice gives identical bytes.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::classify::Layer;
use crate::trace::{
    parse_container_tag, parse_digits, sector_tokens, FinalTraceEvent, MalformedRecord,
    TIMESTAMP_FIELD,
};

/// Seconds in the trace, nanoseconds in the output.
const NANOS_PER_SEC: f64 = 1e9;

/// Per-run counts for the re-encoding stage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReencodeStats {
    pub total: usize,
    pub emitted: usize,
    /// Lines that parsed but carry no container tag.
    pub unlabeled: usize,
    pub malformed: usize,
}

/// Parse one classified trace line.
///
/// `Ok(None)` is a well-formed line without a container tag; such lines
/// are not replayed.
pub fn parse_classified_line(line: &str) -> Result<Option<FinalTraceEvent>, MalformedRecord> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let required = TIMESTAMP_FIELD + 1;
    if tokens.len() < required {
        return Err(MalformedRecord::TooFewFields {
            found: tokens.len(),
            required,
        });
    }

    let ts = tokens[TIMESTAMP_FIELD];
    let seconds: f64 = ts
        .parse()
        .map_err(|_| MalformedRecord::BadTimestamp(ts.to_string()))?;
    if !seconds.is_finite() {
        return Err(MalformedRecord::BadTimestamp(ts.to_string()));
    }
    // Truncate toward zero.
    let time_ns = (seconds * NANOS_PER_SEC) as i64;

    let (sector, size) = sector_tokens(&tokens)?;
    let sector =
        parse_digits(sector).ok_or_else(|| MalformedRecord::BadSector(sector.to_string()))?;
    let size = parse_digits(size).ok_or_else(|| MalformedRecord::BadSize(size.to_string()))?;

    let layer = Layer::from_tag(tokens[tokens.len() - 2]);
    let Some(container) = parse_container_tag(tokens[tokens.len() - 1])? else {
        return Ok(None);
    };

    Ok(Some(FinalTraceEvent {
        time_ns,
        sector,
        size,
        layer,
        container,
    }))
}

/// Re-encode classified trace text into replay trace text, preserving order.
pub fn reencode_str(input: &str) -> (String, ReencodeStats) {
    let mut stats = ReencodeStats::default();
    let mut output = String::new();

    for (idx, line) in input.lines().enumerate() {
        stats.total += 1;
        match parse_classified_line(line) {
            Ok(Some(event)) => {
                output.push_str(&event.to_string());
                output.push('\n');
                stats.emitted += 1;
            }
            Ok(None) => {
                stats.unlabeled += 1;
                tracing::debug!(line = idx, "Skipping line without container tag");
            }
            Err(e) => {
                stats.malformed += 1;
                tracing::warn!(line = idx, "Skipping line: {}", e);
            }
        }
    }
    (output, stats)
}

/// Re-encode the classified trace at `input` into the replay trace at
/// `output`.
pub fn reencode_trace(input: &Path, output: &Path) -> Result<ReencodeStats> {
    let text = fs::read_to_string(input)
        .with_context(|| format!("Failed to read classified trace {}", input.display()))?;
    let file = File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let (encoded, stats) = reencode_str(&text);

    let mut writer = BufWriter::new(file);
    writer
        .write_all(encoded.as_bytes())
        .and_then(|_| writer.flush())
        .with_context(|| format!("Failed to write {}", output.display()))?;

    tracing::info!(
        total = stats.total,
        emitted = stats.emitted,
        unlabeled = stats.unlabeled,
        malformed = stats.malformed,
        "Re-encoding finished"
    );
    Ok(stats)
}
