//! Pipeline configuration and result-directory layout.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the default container count.
pub const CONTAINER_COUNT_ENV: &str = "USE_CONTAINERS";

const DEFAULT_CONTAINER_COUNT: usize = 6;
const DEFAULT_JOBS: usize = 4;
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings shared by both pipeline stages.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the traced device image is mounted; prefixed to every resolved path
    pub mount_root: String,
    /// Device image queried for block and inode metadata
    pub device: PathBuf,
    /// Container names are this prefix followed by the 1-based index
    pub container_prefix: String,
    /// Number of containers to inventory and classify against
    pub container_count: usize,
    /// Directory holding the raw, classified and final traces
    pub result_dir: PathBuf,
    /// Worker threads used for metadata queries
    pub jobs: usize,
    /// Upper bound on a single external query
    pub query_timeout: Duration,
    /// debugfs executable
    pub debugfs_bin: PathBuf,
    /// docker executable
    pub docker_bin: PathBuf,
    /// Load the overlay inventory from this JSON snapshot instead of docker
    pub inventory_file: Option<PathBuf>,
    /// Draw a progress bar while classifying
    pub progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mount_root: "/mnt/docker_tmp".to_string(),
            device: PathBuf::from("/dev/vdb"),
            container_prefix: "docker_blktest".to_string(),
            container_count: DEFAULT_CONTAINER_COUNT,
            result_dir: PathBuf::from("./results"),
            jobs: DEFAULT_JOBS,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            debugfs_bin: PathBuf::from("debugfs"),
            docker_bin: PathBuf::from("docker"),
            inventory_file: None,
            progress: true,
        }
    }
}

impl Config {
    /// Default configuration with the container count taken from
    /// `USE_CONTAINERS` when it is set to a valid number.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Some(count) = container_count_from(std::env::var(CONTAINER_COUNT_ENV).ok()) {
            config.container_count = count;
        }
        config
    }

    /// Name of the container at the given 1-based index.
    pub fn container_name(&self, index: usize) -> String {
        format!("{}{}", self.container_prefix, index)
    }

    pub fn paths(&self) -> ResultPaths {
        ResultPaths::new(&self.result_dir)
    }
}

fn container_count_from(value: Option<String>) -> Option<usize> {
    let value = value?;
    match value.trim().parse::<usize>() {
        Ok(count) if count > 0 => Some(count),
        _ => {
            tracing::warn!(
                "Ignoring invalid {}={:?}, using {}",
                CONTAINER_COUNT_ENV,
                value,
                DEFAULT_CONTAINER_COUNT
            );
            None
        }
    }
}

/// Files produced and consumed inside a result directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultPaths {
    /// Raw blkparse output
    pub raw_trace: PathBuf,
    /// Classified trace written by the first stage
    pub classified_trace: PathBuf,
    /// Replay trace written by the second stage
    pub final_trace: PathBuf,
}

impl ResultPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            raw_trace: dir.join("result.txt"),
            classified_trace: dir.join("result_path.txt"),
            final_trace: dir.join("io.ascii"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_names_are_one_based() {
        let config = Config::default();
        assert_eq!(config.container_name(1), "docker_blktest1");
        assert_eq!(config.container_name(6), "docker_blktest6");
    }

    #[test]
    fn test_container_count_override() {
        assert_eq!(container_count_from(Some("3".to_string())), Some(3));
        assert_eq!(container_count_from(Some(" 12\n".to_string())), Some(12));
        assert_eq!(container_count_from(Some("0".to_string())), None);
        assert_eq!(container_count_from(Some("many".to_string())), None);
        assert_eq!(container_count_from(None), None);
    }

    #[test]
    fn test_result_paths() {
        let paths = ResultPaths::new(Path::new("/tmp/run1"));
        assert_eq!(paths.raw_trace, PathBuf::from("/tmp/run1/result.txt"));
        assert_eq!(
            paths.classified_trace,
            PathBuf::from("/tmp/run1/result_path.txt")
        );
        assert_eq!(paths.final_trace, PathBuf::from("/tmp/run1/io.ascii"));
    }
}
