//! points-backfill - seeds retroactive balances from historical submissions

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use points_ledger::backfill::{BackfillReconciler, MongoSubmissionSource};
use points_ledger::catalog::Catalog;
use points_ledger::config::Args;
use points_ledger::db::MongoClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("points_ledger={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("======================================");
    info!("  points-backfill");
    info!("======================================");
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Database: {}", args.mongodb_db);
    info!("Mode: {}", if args.dry_run { "DRY RUN" } else { "LIVE" });

    let catalog = match args.catalog_path {
        Some(ref path) => {
            info!("Catalog: {}", path.display());
            Catalog::from_json_file(path)?
        }
        None => {
            info!("Catalog: built-in defaults");
            Catalog::builtin()
        }
    };

    let mongo = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
    let reconciler =
        BackfillReconciler::new(mongo.clone(), catalog.backfill_rates().clone()).await?;
    let source = MongoSubmissionSource::new(mongo);

    let summary = reconciler.run(&source, args.dry_run).await?;

    info!("======================================");
    info!("Users seen:               {}", summary.users_seen);
    info!("Users granted:            {}", summary.users_granted);
    info!("Skipped (no submissions): {}", summary.users_skipped_zero);
    info!("Already reconciled:       {}", summary.users_already_reconciled);
    info!("Points granted:           {}", summary.points_granted);
    info!("======================================");

    Ok(())
}
