use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};

use layertrace::inventory::load_inventory;
use layertrace::{logging, pipeline, ClassifyStats, Config, ReencodeStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Stage {
    /// Classify the raw trace, then re-encode it
    Run,
    /// Only write the classified trace
    Classify,
    /// Only re-encode an existing classified trace
    Reencode,
    /// Print the overlay inventory as JSON
    Inventory,
}

#[derive(Debug, Parser)]
#[command(name = "layertrace")]
#[command(about = "Attribute block I/O traces to container overlay layers")]
#[command(version)]
struct Command {
    /// Directory holding result.txt; result_path.txt and io.ascii are written next to it
    result_dir: Option<PathBuf>,
    /// Which part of the pipeline to run
    #[arg(short, long, value_enum, default_value = "run")]
    stage: Stage,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Number of containers to classify against [default: $USE_CONTAINERS or 6]
    #[arg(short, long)]
    containers: Option<usize>,
    /// Container name prefix; names are the prefix followed by 1..=N
    #[arg(long)]
    container_prefix: Option<String>,
    /// Device image to query with debugfs
    #[arg(long)]
    device: Option<PathBuf>,
    /// Mount point of the device, prefixed to resolved paths
    #[arg(long)]
    mount_root: Option<String>,
    /// Worker threads for metadata queries
    #[arg(short, long)]
    jobs: Option<usize>,
    /// Timeout for each debugfs or docker invocation, in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Load the overlay inventory from a JSON snapshot instead of docker
    #[arg(long)]
    inventory: Option<PathBuf>,
    /// Do not draw a progress bar
    #[arg(long)]
    no_progress: bool,
}

impl Command {
    fn into_config(self) -> Result<Config> {
        let mut config = Config::from_env();
        if let Some(dir) = self.result_dir {
            config.result_dir = dir;
        }
        if let Some(count) = self.containers {
            if count == 0 {
                bail!("--containers must be at least 1");
            }
            config.container_count = count;
        }
        if let Some(prefix) = self.container_prefix {
            config.container_prefix = prefix;
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        if let Some(root) = self.mount_root {
            config.mount_root = root;
        }
        if let Some(jobs) = self.jobs {
            if jobs == 0 {
                bail!("--jobs must be at least 1");
            }
            config.jobs = jobs;
        }
        if let Some(secs) = self.timeout_secs {
            config.query_timeout = Duration::from_secs(secs);
        }
        config.inventory_file = self.inventory;
        config.progress = !self.no_progress;
        Ok(config)
    }
}

fn report_classify(config: &Config, stats: &ClassifyStats) {
    eprintln!(
        "Classified {}/{} lines ({} malformed, {} unresolved, {} metadata, {} outside containers)",
        stats.written,
        stats.total,
        stats.malformed,
        stats.unresolved,
        stats.reserved,
        stats.unclassified
    );
    println!(
        "Processing complete! Result written to {}",
        config.paths().classified_trace.display()
    );
}

fn report_reencode(config: &Config, stats: &ReencodeStats) {
    eprintln!(
        "Re-encoded {}/{} lines ({} without container, {} malformed)",
        stats.emitted, stats.total, stats.unlabeled, stats.malformed
    );
    println!("Done. Trace written to {}", config.paths().final_trace.display());
}

fn main() -> Result<()> {
    let opts = Command::parse();
    logging::init(opts.verbose);
    let stage = opts.stage;
    let config = opts.into_config()?;

    match stage {
        Stage::Run => {
            let (classified, reencoded) = pipeline::run(&config)?;
            report_classify(&config, &classified);
            report_reencode(&config, &reencoded);
        }
        Stage::Classify => {
            let stats = pipeline::classify(&config)?;
            report_classify(&config, &stats);
        }
        Stage::Reencode => {
            let stats = pipeline::reencode(&config)?;
            report_reencode(&config, &stats);
        }
        Stage::Inventory => {
            let inventory = load_inventory(&config)?;
            println!("{}", serde_json::to_string_pretty(&inventory)?);
        }
    }
    Ok(())
}
