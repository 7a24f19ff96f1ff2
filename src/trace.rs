//! Line formats of the three traces the pipeline touches.
//!
//! - Raw blkparse output, one I/O event per line. The sector and size sit
//!   on either side of a lone `+` token; everything before it varies in
//!   width, so fields are located relative to the separator.
//! - The classified trace: the raw line followed by tab-separated resolved
//!   path, layer tag and container tag.
//! - The replay trace: `time opcode flag sector size layer container`.

use std::fmt;

use crate::classify::{Classification, Layer};

/// 512-byte sectors per 4096-byte filesystem block.
pub const SECTORS_PER_BLOCK: u64 = 8;

/// Token separating the start sector from the sector count.
pub const SECTOR_SEPARATOR: &str = "+";

/// Index of the timestamp (seconds) among the whitespace-separated tokens.
pub const TIMESTAMP_FIELD: usize = 3;

/// Shortest raw blkparse line that carries a sector range.
pub const MIN_RAW_FIELDS: usize = 10;

/// A line that does not have the shape its trace format requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedRecord {
    TooFewFields { found: usize, required: usize },
    MissingSeparator,
    BadSector(String),
    BadSize(String),
    BadTimestamp(String),
    BadContainerTag(String),
}

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedRecord::TooFewFields { found, required } => {
                write!(f, "expected at least {required} fields, found {found}")
            }
            MalformedRecord::MissingSeparator => {
                write!(f, "no '{SECTOR_SEPARATOR}' separator token")
            }
            MalformedRecord::BadSector(token) => write!(f, "invalid sector '{token}'"),
            MalformedRecord::BadSize(token) => write!(f, "invalid sector count '{token}'"),
            MalformedRecord::BadTimestamp(token) => write!(f, "invalid timestamp '{token}'"),
            MalformedRecord::BadContainerTag(token) => {
                write!(f, "invalid container tag '{token}'")
            }
        }
    }
}

impl std::error::Error for MalformedRecord {}

/// Why a record contributes nothing to a stage's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Malformed(MalformedRecord),
    /// No inode owns the block, or the query failed or timed out.
    BlockNotFound { block: u64 },
    /// The block belongs to filesystem metadata rather than a regular file.
    ReservedInode { block: u64 },
    /// The inode has no path, or the query failed or timed out.
    PathNotFound { inode: u64 },
    /// The path lies in none of the inventoried overlay layers.
    Unclassified { path: String },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Malformed(err) => write!(f, "malformed record: {err}"),
            DropReason::BlockNotFound { block } => write!(f, "no inode for block {block}"),
            DropReason::ReservedInode { block } => {
                write!(f, "block {block} belongs to the reserved metadata inode")
            }
            DropReason::PathNotFound { inode } => write!(f, "no path for inode {inode}"),
            DropReason::Unclassified { path } => {
                write!(f, "{path} is not inside any container layer")
            }
        }
    }
}

impl std::error::Error for DropReason {}

impl From<MalformedRecord> for DropReason {
    fn from(err: MalformedRecord) -> Self {
        DropReason::Malformed(err)
    }
}

/// Locate the `(sector, size)` tokens around the first separator.
pub fn sector_tokens<'a>(tokens: &[&'a str]) -> Result<(&'a str, &'a str), MalformedRecord> {
    let sep = tokens
        .iter()
        .position(|t| *t == SECTOR_SEPARATOR)
        .ok_or(MalformedRecord::MissingSeparator)?;
    if sep == 0 {
        return Err(MalformedRecord::BadSector(SECTOR_SEPARATOR.to_string()));
    }
    let size = tokens.get(sep + 1).copied().unwrap_or("");
    Ok((tokens[sep - 1], size))
}

/// Parse an unsigned decimal made only of ASCII digits (no sign, no spaces).
pub fn parse_digits(token: &str) -> Option<u64> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

/// One line of raw blkparse output.
///
/// Only the sector is needed to resolve the line; the timestamp and size are
/// kept when they parse, and the text is carried verbatim into the
/// classified trace.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTraceRecord<'a> {
    pub text: &'a str,
    pub timestamp: Option<f64>,
    pub sector: u64,
    pub size: Option<u64>,
}

impl<'a> RawTraceRecord<'a> {
    pub fn parse(line: &'a str) -> Result<Self, MalformedRecord> {
        let text = line.trim();
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.len() < MIN_RAW_FIELDS {
            return Err(MalformedRecord::TooFewFields {
                found: tokens.len(),
                required: MIN_RAW_FIELDS,
            });
        }

        let (sector, size) = sector_tokens(&tokens)?;
        let sector =
            parse_digits(sector).ok_or_else(|| MalformedRecord::BadSector(sector.to_string()))?;

        Ok(RawTraceRecord {
            text,
            timestamp: tokens[TIMESTAMP_FIELD].parse().ok(),
            sector,
            size: parse_digits(size),
        })
    }

    /// Filesystem block containing the first sector.
    pub fn block(&self) -> u64 {
        self.sector / SECTORS_PER_BLOCK
    }
}

/// A raw record with its resolved path and the layer that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRecord<'a> {
    pub raw: RawTraceRecord<'a>,
    pub path: String,
    pub classification: Classification,
}

impl ClassifiedRecord<'_> {
    /// Render as one line of the classified trace, without the newline.
    pub fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}",
            self.raw.text,
            self.path,
            self.classification.layer.tag(),
            container_tag(self.classification.container)
        )
    }
}

pub fn container_tag(container: usize) -> String {
    format!("[Container{container}]")
}

/// Container id from a `[ContainerN]` tag.
///
/// `Ok(None)` means the token is not a container tag at all; a token shaped
/// like one whose number does not parse is malformed.
pub fn parse_container_tag(token: &str) -> Result<Option<usize>, MalformedRecord> {
    let Some(inner) = token
        .strip_prefix("[Container")
        .and_then(|rest| rest.strip_suffix(']'))
    else {
        return Ok(None);
    };
    parse_digits(inner)
        .map(|id| Some(id as usize))
        .ok_or_else(|| MalformedRecord::BadContainerTag(token.to_string()))
}

/// One event of the replay trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalTraceEvent {
    pub time_ns: i64,
    pub sector: u64,
    pub size: u64,
    pub layer: Option<Layer>,
    pub container: usize,
}

impl FinalTraceEvent {
    /// Every event is replayed as a write.
    pub const OPCODE: u8 = 1;
    pub const FLAG: u8 = 0;

    /// `0` for the upper layer, `1` for a lower layer, `-1` when unknown.
    pub fn layer_flag(&self) -> i8 {
        self.layer.map_or(-1, |layer| layer.flag())
    }
}

impl fmt::Display for FinalTraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {}",
            self.time_ns,
            Self::OPCODE,
            Self::FLAG,
            self.sector,
            self.size,
            self.layer_flag(),
            self.container
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "  8,16   1        7     1.000000000  4242  Q  WS 123 + 8 [fio]\n";

    #[test]
    fn test_parse_raw_record() {
        let record = RawTraceRecord::parse(RAW).unwrap();
        assert_eq!(record.sector, 123);
        assert_eq!(record.size, Some(8));
        assert_eq!(record.timestamp, Some(1.0));
        assert_eq!(record.block(), 15);
        assert_eq!(
            record.text,
            "8,16   1        7     1.000000000  4242  Q  WS 123 + 8 [fio]"
        );
    }

    #[test]
    fn test_separator_located_after_variable_width_fields() {
        let line = "259,0 12 100 2.5 77 D W extra tokens here 4096 + 16 [kworker/u8:2]";
        let record = RawTraceRecord::parse(line).unwrap();
        assert_eq!(record.sector, 4096);
        assert_eq!(record.block(), 512);
        assert_eq!(record.size, Some(16));
    }

    #[test]
    fn test_raw_record_rejects_short_lines() {
        assert_eq!(
            RawTraceRecord::parse("8,16 1 7 1.0 123 + 8"),
            Err(MalformedRecord::TooFewFields {
                found: 7,
                required: MIN_RAW_FIELDS
            })
        );
    }

    #[test]
    fn test_raw_record_requires_separator() {
        let line = "8,16 1 7 1.0 4242 Q WS 123 8 [fio] more";
        assert_eq!(
            RawTraceRecord::parse(line),
            Err(MalformedRecord::MissingSeparator)
        );
    }

    #[test]
    fn test_raw_record_rejects_non_numeric_sector() {
        let line = "8,16 1 7 1.0 4242 Q WS -12 + 8 [fio]";
        assert_eq!(
            RawTraceRecord::parse(line),
            Err(MalformedRecord::BadSector("-12".to_string()))
        );
    }

    #[test]
    fn test_sector_below_one_block() {
        let line = "8,16 1 7 1.0 4242 Q WS 7 + 1 [fio]";
        assert_eq!(RawTraceRecord::parse(line).unwrap().block(), 0);
    }

    #[test]
    fn test_container_tags() {
        assert_eq!(container_tag(3), "[Container3]");
        assert_eq!(parse_container_tag("[Container3]"), Ok(Some(3)));
        assert_eq!(parse_container_tag("[Container12]"), Ok(Some(12)));
        assert_eq!(parse_container_tag("Container3"), Ok(None));
        assert_eq!(parse_container_tag("[LowerLayer]"), Ok(None));
        assert_eq!(
            parse_container_tag("[ContainerX]"),
            Err(MalformedRecord::BadContainerTag("[ContainerX]".to_string()))
        );
    }

    #[test]
    fn test_final_event_format() {
        let event = FinalTraceEvent {
            time_ns: 1_000_000_000,
            sector: 123,
            size: 8,
            layer: Some(Layer::Upper),
            container: 2,
        };
        assert_eq!(event.to_string(), "1000000000 1 0 123 8 0 2");

        let unknown = FinalTraceEvent {
            layer: None,
            ..event
        };
        assert_eq!(unknown.to_string(), "1000000000 1 0 123 8 -1 2");
    }
}
