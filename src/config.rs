//! Configuration for the backfill job
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::path::PathBuf;

/// points-backfill - one-time retroactive points grant
#[derive(Parser, Debug, Clone)]
#[command(name = "points-backfill")]
#[command(about = "Seeds retroactive point balances from historical submissions")]
pub struct Args {
    /// MongoDB connection URI (transactions require a replica set)
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "salarydata")]
    pub mongodb_db: String,

    /// Catalog definition file (JSON); built-in defaults when omitted
    #[arg(long, env = "CATALOG_PATH")]
    pub catalog_path: Option<PathBuf>,

    /// Compute and log grants without writing anything
    #[arg(long, env = "DRY_RUN", default_value = "false")]
    pub dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}
