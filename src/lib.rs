//! layertrace - attribute block-layer I/O to container overlay layers.
//!
//! A raw blkparse trace is turned into a replay trace in two stages that
//! communicate only through a text file:
//!
//! 1. [`writer`] resolves each I/O's sector to a file path via filesystem
//!    metadata ([`debugfs`], [`resolve`]) and attributes the path to a
//!    container's upper or lower overlay layer ([`inventory`], [`classify`]).
//! 2. [`reencode`] turns the classified trace into
//!    `time opcode flag sector size layer container` tuples.
//!
//! # Example
//!
//! ```no_run
//! use layertrace::{pipeline, Config};
//!
//! let config = Config {
//!     result_dir: "./results".into(),
//!     ..Config::from_env()
//! };
//! let (classified, reencoded) = pipeline::run(&config).expect("pipeline failed");
//! println!("{} of {} lines replayed", reencoded.emitted, classified.total);
//! ```

pub mod classify;
pub mod command;
pub mod config;
pub mod debugfs;
pub mod inventory;
pub mod logging;
pub mod pipeline;
pub mod reencode;
pub mod resolve;
pub mod trace;
pub mod writer;

pub use classify::{classify, Classification, Layer};
pub use config::{Config, ResultPaths};
pub use debugfs::{Debugfs, MetadataQuery};
pub use inventory::{InventorySource, OverlayEntry, OverlayInventory};
pub use reencode::ReencodeStats;
pub use resolve::Resolver;
pub use trace::{DropReason, MalformedRecord};
pub use writer::ClassifyStats;
