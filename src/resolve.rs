//! Map a raw trace record to the path of the file it touched.

use std::sync::Arc;

use crate::debugfs::{MetadataQuery, RESERVED_METADATA_INODE};
use crate::trace::{DropReason, RawTraceRecord};

/// Resolves sectors to absolute paths under the device's mount root.
///
/// Cheap to clone; clones share the metadata backend.
#[derive(Clone)]
pub struct Resolver {
    query: Arc<dyn MetadataQuery>,
    mount_root: String,
}

impl Resolver {
    pub fn new(query: Arc<dyn MetadataQuery>, mount_root: &str) -> Self {
        Resolver {
            query,
            mount_root: mount_root.trim_end_matches('/').to_string(),
        }
    }

    pub fn mount_root(&self) -> &str {
        &self.mount_root
    }

    /// Path of the file owning `block`, as seen from the mount root.
    ///
    /// When an inode has several links the last one debugfs lists is used.
    pub fn resolve_block(&self, block: u64) -> Result<String, DropReason> {
        let inode = self
            .query
            .inode_for_block(block)
            .ok_or(DropReason::BlockNotFound { block })?;
        if inode == RESERVED_METADATA_INODE {
            return Err(DropReason::ReservedInode { block });
        }

        let fragment = self
            .query
            .paths_for_inode(inode)
            .and_then(|paths| paths.into_iter().last())
            .ok_or(DropReason::PathNotFound { inode })?;

        if fragment.starts_with('/') {
            Ok(format!("{}{}", self.mount_root, fragment))
        } else {
            Ok(format!("{}/{}", self.mount_root, fragment))
        }
    }

    pub fn resolve(&self, record: &RawTraceRecord<'_>) -> Result<String, DropReason> {
        self.resolve_block(record.block())
    }

    /// Parse and resolve one raw trace line.
    pub fn resolve_line(&self, line: &str) -> Result<String, DropReason> {
        let record = RawTraceRecord::parse(line)?;
        self.resolve(&record)
    }
}
