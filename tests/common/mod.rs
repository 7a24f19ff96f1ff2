//! Common test utilities for layertrace integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use layertrace::{MetadataQuery, OverlayEntry, OverlayInventory};

/// Canned debugfs answers: block -> inode, inode -> path fragments.
#[derive(Default)]
pub struct FixtureQuery {
    inodes: HashMap<u64, u64>,
    paths: HashMap<u64, Vec<String>>,
}

impl FixtureQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `block` to `inode` and `inode` to `path`.
    pub fn file(mut self, block: u64, inode: u64, path: &str) -> Self {
        self.inodes.insert(block, inode);
        self.paths.entry(inode).or_default().push(path.to_string());
        self
    }

    /// Map `block` to `inode` without giving the inode a path.
    pub fn orphan(mut self, block: u64, inode: u64) -> Self {
        self.inodes.insert(block, inode);
        self
    }
}

impl MetadataQuery for FixtureQuery {
    fn inode_for_block(&self, block: u64) -> Option<u64> {
        self.inodes.get(&block).copied()
    }

    fn paths_for_inode(&self, inode: u64) -> Option<Vec<String>> {
        self.paths.get(&inode).cloned()
    }
}

pub fn entry(name: &str, upper: &str, lowers: &[&str]) -> OverlayEntry {
    OverlayEntry {
        name: name.to_string(),
        upper_dir: upper.to_string(),
        lower_dirs: lowers.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn inventory(entries: Vec<OverlayEntry>) -> OverlayInventory {
    OverlayInventory {
        containers: entries,
    }
}

/// A blkparse line for an I/O at `seconds` covering `size` sectors from `sector`.
pub fn blkparse_line(seconds: &str, sector: u64, size: u64) -> String {
    format!("  8,16   1       12   {seconds}  3051  Q  WS {sector} + {size} [fio]")
}

pub fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
        .lines()
        .map(str::to_string)
        .collect()
}
