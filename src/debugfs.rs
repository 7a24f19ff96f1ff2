//! Filesystem metadata lookups.
//!
//! The pipeline needs two questions answered about the traced device: which
//! inode owns a block, and which paths reference an inode. [`MetadataQuery`]
//! is that seam; [`Debugfs`] answers it by running e2fsprogs' `debugfs`
//! against the device image.
//!
//! # Output grammar
//!
//! `debugfs -R "icheck <block>" <dev>` prints a header and one row per block:
//!
//! ```text
//! Block   Inode number
//! 1234    50
//! ```
//!
//! An unowned block prints `1234    <block not found>` instead.
//!
//! `debugfs -R "ncheck <inode>" <dev>` prints a header and one row per link:
//!
//! ```text
//! Inode   Pathname
//! 50      /overlay2/abc/diff/etc/hosts
//! ```

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use crate::command::run_with_timeout;
use crate::trace::parse_digits;

/// Inode reserved for filesystem metadata (the ext4 journal).
pub const RESERVED_METADATA_INODE: u64 = 8;

/// Read-only filesystem metadata queries.
///
/// `None` means not found; implementations fold tool failures and
/// timeouts into it.
pub trait MetadataQuery: Send + Sync {
    fn inode_for_block(&self, block: u64) -> Option<u64>;

    /// Path fragments relative to the filesystem root, one per hard link.
    fn paths_for_inode(&self, inode: u64) -> Option<Vec<String>>;
}

/// [`MetadataQuery`] backed by the `debugfs` tool.
#[derive(Debug, Clone)]
pub struct Debugfs {
    bin: PathBuf,
    device: PathBuf,
    timeout: Duration,
}

impl Debugfs {
    pub fn new(bin: impl Into<PathBuf>, device: impl Into<PathBuf>, timeout: Duration) -> Self {
        Debugfs {
            bin: bin.into(),
            device: device.into(),
            timeout,
        }
    }

    fn request(&self, request: &str) -> Option<String> {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("-R").arg(request).arg(&self.device);
        match run_with_timeout(&mut cmd, self.timeout) {
            Ok(out) => Some(out),
            Err(e) => {
                tracing::debug!("debugfs '{}' on {:?} failed: {:#}", request, self.device, e);
                None
            }
        }
    }
}

impl MetadataQuery for Debugfs {
    fn inode_for_block(&self, block: u64) -> Option<u64> {
        parse_icheck_output(&self.request(&format!("icheck {block}"))?)
    }

    fn paths_for_inode(&self, inode: u64) -> Option<Vec<String>> {
        parse_ncheck_output(&self.request(&format!("ncheck {inode}"))?)
    }
}

/// Inode from the last line of `icheck` output.
pub fn parse_icheck_output(output: &str) -> Option<u64> {
    let last = output.lines().rev().find(|l| !l.trim().is_empty())?;
    parse_digits(last.split_whitespace().last()?)
}

/// Path fragments from `ncheck` output, in the order debugfs lists them.
///
/// Only rows led by an inode number count, which skips the header and any
/// diagnostics. Pathnames are taken as the row's last token.
pub fn parse_ncheck_output(output: &str) -> Option<Vec<String>> {
    let paths: Vec<String> = output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            parse_digits(tokens.next()?)?;
            tokens.last().map(str::to_string)
        })
        .collect();
    if paths.is_empty() {
        None
    } else {
        Some(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icheck_found() {
        let out = "Block\tInode number\n1234\t50\n";
        assert_eq!(parse_icheck_output(out), Some(50));
    }

    #[test]
    fn test_icheck_trailing_blank_lines() {
        let out = "Block\tInode number\n1234\t50\n\n  \n";
        assert_eq!(parse_icheck_output(out), Some(50));
    }

    #[test]
    fn test_icheck_not_found() {
        let out = "Block\tInode number\n1234\t<block not found>\n";
        assert_eq!(parse_icheck_output(out), None);
    }

    #[test]
    fn test_icheck_empty_or_header_only() {
        assert_eq!(parse_icheck_output(""), None);
        assert_eq!(parse_icheck_output("Block\tInode number\n"), None);
    }

    #[test]
    fn test_icheck_reserved_inode_is_reported() {
        // Filtering is the resolver's job; the parser reports what it sees.
        let out = "Block\tInode number\n40\t8\n";
        assert_eq!(parse_icheck_output(out), Some(RESERVED_METADATA_INODE));
    }

    #[test]
    fn test_ncheck_single_path() {
        let out = "Inode\tPathname\n50\t/overlay2/abc/diff/etc/hosts\n";
        assert_eq!(
            parse_ncheck_output(out),
            Some(vec!["/overlay2/abc/diff/etc/hosts".to_string()])
        );
    }

    #[test]
    fn test_ncheck_hard_links() {
        let out = "Inode\tPathname\n50\t/a/one\n50\t/b/two\n";
        assert_eq!(
            parse_ncheck_output(out),
            Some(vec!["/a/one".to_string(), "/b/two".to_string()])
        );
    }

    #[test]
    fn test_ncheck_header_only() {
        assert_eq!(parse_ncheck_output("Inode\tPathname\n"), None);
        assert_eq!(parse_ncheck_output(""), None);
    }

    #[test]
    fn test_missing_debugfs_is_not_found() {
        let fs = Debugfs::new(
            "/nonexistent/debugfs",
            "/dev/null",
            Duration::from_secs(1),
        );
        assert_eq!(fs.inode_for_block(1), None);
        assert_eq!(fs.paths_for_inode(50), None);
    }
}
