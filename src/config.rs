//! Pipeline configuration
//!
//! Execution mode and worker count are plain values passed into the
//! ingestion engine; nothing here is process-global.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Default directory for per-table diagnostic dumps
pub const DEFAULT_DIAGNOSTICS_DIR: &str = "regression";

/// Fallback worker count when hardware parallelism cannot be queried
const FALLBACK_WORKERS: usize = 4;

/// How sheets are ingested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Rows are applied directly to the shared context, in order
    SingleThread,
    /// Rows are partitioned across workers and merged afterwards
    MultiThread,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(ExecutionMode::SingleThread),
            "multi" => Ok(ExecutionMode::MultiThread),
            other => Err(format!("unknown core_type: {}", other)),
        }
    }
}

/// Settings threaded through a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mode: ExecutionMode,

    /// Worker threads used in multi-threaded mode
    pub workers: usize,

    /// Where `Registry::print` writes its per-table dumps
    pub diagnostics_dir: PathBuf,

    /// Dump every table right after it is built
    pub print_after_ingest: bool,
}

impl PipelineConfig {
    /// Effective worker count (always 1 in single-threaded mode)
    pub fn effective_workers(&self) -> usize {
        match self.mode {
            ExecutionMode::SingleThread => 1,
            ExecutionMode::MultiThread => self.workers.max(1),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::MultiThread,
            workers: default_workers(),
            diagnostics_dir: PathBuf::from(DEFAULT_DIAGNOSTICS_DIR),
            print_after_ingest: true,
        }
    }
}

/// Available hardware parallelism, or a small fixed pool if unknown
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_WORKERS)
}
