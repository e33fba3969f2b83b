//! Reserve Engine - concurrent table ingestion and commutation-based premiums
//!
//! This library provides:
//! - A registry of named tables built incrementally from streamed records
//! - Parallel, partition-and-merge ingestion of sheet ranges and text tables
//! - Policy, expense and output tables joined from the ingested data
//! - Commutation functions, term premiums and lapse/mortality distribution
//! - A JSON scenario runner driving all of the above

pub mod commutation;
pub mod config;
pub mod error;
pub mod ingest;
pub mod registry;
pub mod scenario;
pub mod source;
pub mod tables;

// Re-export commonly used types
pub use commutation::{compute_commutation, compute_term_premium, CommutationFunctions, DiscountCurve, Sex};
pub use config::{ExecutionMode, PipelineConfig};
pub use error::{PipelineError, Result};
pub use ingest::{IngestEngine, IngestSummary};
pub use registry::{Registry, RegistryEntry, SharedContext};
pub use scenario::{Scenario, ScenarioRunner};
pub use tables::{Field, TableBuilder, TableContext, TableKind};
