use anyhow::Result;
use clap::{Parser, Subcommand};
use mongomigra::db::RelationalStore;
use mongomigra::{
    Collection, DescriptorRegistry, JsonLinesProvider, LogProgress, MemoryStore, MigrationConfig,
    MigratorRegistry, Orchestrator, PgStore, SourceProvider,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mongomigra")]
#[command(about = "Migrate MongoDB collection exports into PostgreSQL, one collection at a time")]
struct Cli {
    /// Directory holding `<collection>.json` exports (or set MIGRATION_SOURCE_DIR)
    #[arg(long, global = true)]
    source_dir: Option<PathBuf>,

    /// Rows buffered per table before a flush (or set MIGRATION_BATCH_SIZE)
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Run against an in-memory store instead of PostgreSQL
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Migrate the named collections (full name or schema name)
    Migrate {
        #[arg(required = true)]
        collections: Vec<String>,
    },
    /// Migrate every collection in dependency order
    All,
    /// Print the migration order with kinds and dependencies
    Order,
    /// Print the completion ledger
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = MigrationConfig::from_env()?
        .with_source_dir(cli.source_dir)
        .with_batch_size(cli.batch_size)?;

    let descriptors = DescriptorRegistry::standard()?;
    let migrators = MigratorRegistry::standard();

    if let Command::Order = cli.command {
        print_order(&descriptors)?;
        return Ok(());
    }

    let mut store: Box<dyn RelationalStore> = if cli.dry_run {
        warn!("Dry run: writing to an in-memory store, nothing reaches PostgreSQL");
        Box::new(MemoryStore::with_tables(migrators.all_tables()))
    } else {
        Box::new(PgStore::connect(config.require_database_url()?, config.max_connections).await?)
    };

    let orchestrator = Orchestrator::new(&descriptors, &migrators, config.pipeline_options());
    let sources = JsonLinesProvider::new(config.source_dir.clone());
    let mut observer = LogProgress;

    match cli.command {
        Command::Migrate { collections } => {
            let collections = collections
                .iter()
                .map(|name| name.parse::<Collection>())
                .collect::<Result<Vec<_>, _>>()?;
            for collection in collections {
                let mut source = sources.open(collection).await?;
                orchestrator
                    .migrate(source.as_mut(), store.as_mut(), &mut observer)
                    .await?;
            }
        }
        Command::All => {
            let summaries = orchestrator
                .migrate_all(&sources, store.as_mut(), &mut observer)
                .await?;
            let rows: u64 = summaries.iter().map(|s| s.total_rows()).sum();
            info!("🎉 {} rows written across {} collections", rows, summaries.len());
        }
        Command::Status => print_status(&descriptors, store.as_mut()).await?,
        Command::Order => {}
    }

    Ok(())
}

fn print_order(descriptors: &DescriptorRegistry) -> Result<()> {
    println!("\n=== Migration Order ===");
    for (position, collection) in descriptors.migration_order().iter().enumerate() {
        let descriptor = descriptors.get(*collection)?;
        let depends = descriptor
            .depends_on
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{:>2}. {} → {} [{}]{}",
            position + 1,
            collection,
            descriptor.schema,
            descriptor.kind,
            if depends.is_empty() {
                String::new()
            } else {
                format!(" after {}", depends)
            }
        );
    }
    Ok(())
}

async fn print_status(descriptors: &DescriptorRegistry, store: &mut dyn RelationalStore) -> Result<()> {
    let records = store.completion_records().await?;
    println!("\n=== Migration Status ===");
    for collection in descriptors.migration_order() {
        match records.iter().find(|r| r.collection == *collection) {
            Some(record) => println!(
                "✅ {} completed {} ({} documents, {} rows, run {})",
                collection,
                record.completed_at.format("%Y-%m-%d %H:%M:%S"),
                record.documents_read,
                record.rows_written,
                record.run_id
            ),
            None => println!("⏳ {} pending", collection),
        }
    }
    Ok(())
}
