//! Overlay directories of the traced containers.
//!
//! Each container contributes one upper (writable) directory and an ordered
//! list of lower (image) directories. The inventory is gathered once per run
//! and is read-only afterwards. It can be saved as JSON and loaded back so a
//! trace can be reclassified after the containers are gone.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::command::run_with_timeout;
use crate::config::Config;

/// `"LowerDir": "<a:b:c>"` / `"UpperDir": "<dir>"` lines of `docker inspect`.
static OVERLAY_DIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(LowerDir|UpperDir)"\s*:\s*"([^"]*)""#)
        .expect("OVERLAY_DIR_RE is a valid regex")
});

/// Marker of the per-container bookkeeping layer docker stacks on the image.
const INIT_LAYER_MARKER: &str = "init";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayEntry {
    pub name: String,
    pub upper_dir: String,
    pub lower_dirs: Vec<String>,
}

/// Overlay entries indexed by container; `containers[0]` is container 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayInventory {
    pub containers: Vec<OverlayEntry>,
}

impl OverlayInventory {
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Entry of the container with the given 1-based index.
    #[cfg(test)]
    pub fn get(&self, container: usize) -> Option<&OverlayEntry> {
        container
            .checked_sub(1)
            .and_then(|idx| self.containers.get(idx))
    }

    /// Truncate or pad with empty named entries so exactly containers
    /// `1..=config.container_count` are classified against.
    pub fn fit_to(&mut self, config: &Config) {
        self.containers.truncate(config.container_count);
        for index in self.containers.len() + 1..=config.container_count {
            self.containers.push(OverlayEntry {
                name: config.container_name(index),
                ..Default::default()
            });
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let buf = fs::read_to_string(path)
            .with_context(|| format!("Failed to read inventory {}", path.display()))?;
        serde_json::from_str(&buf)
            .with_context(|| format!("Failed to parse inventory {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let buf = serde_json::to_string_pretty(self)?;
        fs::write(path, buf)
            .with_context(|| format!("Failed to write inventory {}", path.display()))
    }
}

/// Where overlay entries come from.
pub trait InventorySource {
    fn overlay_entry(&self, name: &str) -> Result<OverlayEntry>;
}

/// [`InventorySource`] that asks the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerInspect {
    bin: PathBuf,
    timeout: Duration,
}

impl DockerInspect {
    pub fn new(bin: impl Into<PathBuf>, timeout: Duration) -> Self {
        DockerInspect {
            bin: bin.into(),
            timeout,
        }
    }
}

impl InventorySource for DockerInspect {
    fn overlay_entry(&self, name: &str) -> Result<OverlayEntry> {
        let mut cmd = Command::new(&self.bin);
        cmd.args(["container", "inspect", name]);
        let out = run_with_timeout(&mut cmd, self.timeout)
            .with_context(|| format!("Failed to inspect container {name}"))?;
        Ok(parse_inspect_output(name, &out))
    }
}

/// Pull the overlay directories out of `docker container inspect` output.
///
/// Lower directories are the colon-separated `LowerDir` list minus any
/// `init` layer. A missing key leaves the field empty, which never matches
/// during classification.
pub fn parse_inspect_output(name: &str, output: &str) -> OverlayEntry {
    let mut entry = OverlayEntry {
        name: name.to_string(),
        ..Default::default()
    };

    for caps in output.lines().filter_map(|line| OVERLAY_DIR_RE.captures(line)) {
        let value = &caps[2];
        match &caps[1] {
            "LowerDir" => {
                entry.lower_dirs = value
                    .split(':')
                    .filter(|dir| !dir.is_empty() && !dir.contains(INIT_LAYER_MARKER))
                    .map(str::to_string)
                    .collect();
            }
            _ => entry.upper_dir = value.to_string(),
        }
    }
    entry
}

/// Gather overlay entries for containers `1..=config.container_count`.
///
/// A container that cannot be inspected gets an empty entry so the indices
/// of the others stay put.
pub fn collect_inventory(source: &dyn InventorySource, config: &Config) -> OverlayInventory {
    let containers = (1..=config.container_count)
        .map(|index| {
            let name = config.container_name(index);
            match source.overlay_entry(&name) {
                Ok(entry) => {
                    if entry.upper_dir.is_empty() {
                        tracing::warn!("Container {} has no UpperDir", name);
                    }
                    tracing::debug!(
                        "Container {}: upper {:?}, {} lower layers",
                        name,
                        entry.upper_dir,
                        entry.lower_dirs.len()
                    );
                    entry
                }
                Err(e) => {
                    tracing::warn!("Skipping container {}: {:#}", name, e);
                    OverlayEntry {
                        name,
                        ..Default::default()
                    }
                }
            }
        })
        .collect();
    OverlayInventory { containers }
}

/// Inventory for `config`: the JSON snapshot if one is configured,
/// otherwise whatever docker reports.
pub fn load_inventory(config: &Config) -> Result<OverlayInventory> {
    match &config.inventory_file {
        Some(path) => {
            let mut inventory = OverlayInventory::load(path)?;
            if inventory.is_empty() {
                bail!("Inventory {} lists no containers", path.display());
            }
            if inventory.len() != config.container_count {
                tracing::warn!(
                    "Inventory {} lists {} containers, using {}",
                    path.display(),
                    inventory.len(),
                    config.container_count
                );
                inventory.fit_to(config);
            }
            Ok(inventory)
        }
        None => {
            let docker = DockerInspect::new(&config.docker_bin, config.query_timeout);
            Ok(collect_inventory(&docker, config))
        }
    }
}
