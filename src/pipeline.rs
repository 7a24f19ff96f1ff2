//! Wiring of the two stages against a [`Config`].
//!
//! The stages only share the classified trace file, so each can be run on
//! its own.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::debugfs::{Debugfs, MetadataQuery};
use crate::inventory::{load_inventory, OverlayInventory};
use crate::reencode::{reencode_trace, ReencodeStats};
use crate::resolve::Resolver;
use crate::writer::{classify_trace, ClassifyStats};

/// Metadata backend described by `config`.
pub fn debugfs_query(config: &Config) -> Arc<dyn MetadataQuery> {
    Arc::new(Debugfs::new(
        &config.debugfs_bin,
        &config.device,
        config.query_timeout,
    ))
}

/// Run the classification stage with explicit collaborators.
pub fn classify_with(
    config: &Config,
    query: Arc<dyn MetadataQuery>,
    inventory: &OverlayInventory,
) -> Result<ClassifyStats> {
    if inventory.is_empty() {
        bail!("Overlay inventory is empty; nothing to classify against");
    }
    let paths = config.paths();
    let resolver = Resolver::new(query, &config.mount_root);
    classify_trace(
        &paths.raw_trace,
        &paths.classified_trace,
        &resolver,
        inventory,
        config.jobs,
        config.progress,
    )
}

/// Run the classification stage against debugfs and the configured inventory.
pub fn classify(config: &Config) -> Result<ClassifyStats> {
    let inventory = load_inventory(config)?;
    classify_with(config, debugfs_query(config), &inventory)
}

/// Run the re-encoding stage.
pub fn reencode(config: &Config) -> Result<ReencodeStats> {
    let paths = config.paths();
    reencode_trace(&paths.classified_trace, &paths.final_trace)
}

/// Both stages, back to back.
pub fn run_with(
    config: &Config,
    query: Arc<dyn MetadataQuery>,
    inventory: &OverlayInventory,
) -> Result<(ClassifyStats, ReencodeStats)> {
    let classified = classify_with(config, query, inventory)?;
    let reencoded = reencode(config)?;
    Ok((classified, reencoded))
}

pub fn run(config: &Config) -> Result<(ClassifyStats, ReencodeStats)> {
    let inventory = load_inventory(config)?;
    run_with(config, debugfs_query(config), &inventory)
}
