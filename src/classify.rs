//! Attribute a resolved path to the overlay layer that holds it.

use crate::inventory::OverlayInventory;

/// Which side of an overlay mount a path lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// The container's private, writable directory.
    Upper,
    /// One of the read-only image layers.
    Lower,
}

impl Layer {
    /// Tag used in the classified trace.
    pub fn tag(self) -> &'static str {
        match self {
            Layer::Upper => "[UpperLayer]",
            Layer::Lower => "[LowerLayer]",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "[UpperLayer]" => Some(Layer::Upper),
            "[LowerLayer]" => Some(Layer::Lower),
            _ => None,
        }
    }

    /// Layer flag used in the replay trace.
    pub fn flag(self) -> i8 {
        match self {
            Layer::Upper => 0,
            Layer::Lower => 1,
        }
    }
}

/// A layer together with the 1-based index of the container that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub layer: Layer,
    pub container: usize,
}

/// Find the first container, in ascending index order, whose layers hold
/// `path`.
///
/// For each container the upper directory is tried first, as a path prefix.
/// Lower directories are matched as substrings since image layers are
/// shared between containers and need not sit under a common root. The
/// first hit wins, so overlapping inventories resolve to the lowest index.
pub fn classify(path: &str, inventory: &OverlayInventory) -> Option<Classification> {
    for (index, entry) in inventory.containers.iter().enumerate() {
        let container = index + 1;
        if !entry.upper_dir.is_empty() && path.starts_with(&entry.upper_dir) {
            return Some(Classification {
                layer: Layer::Upper,
                container,
            });
        }
        if entry
            .lower_dirs
            .iter()
            .any(|lower| !lower.is_empty() && path.contains(lower.as_str()))
        {
            return Some(Classification {
                layer: Layer::Lower,
                container,
            });
        }
    }
    None
}
