use std::{fs, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shared::{
    domain::{missing_required_fields, EntityKind},
    protocol::{ListQuery, RecordDocument},
};
use storage::Storage;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/site.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert the records of a JSON array file into a collection.
    Seed {
        collection: EntityKind,
        file: PathBuf,
        /// Empty the collection first.
        #[arg(long)]
        replace: bool,
    },
    List {
        collection: EntityKind,
    },
    /// Record counts of every collection.
    Count,
    Purge {
        collection: EntityKind,
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url)
        .await
        .with_context(|| format!("failed to open database '{}'", cli.database_url))?;

    match cli.command {
        Command::Seed {
            collection,
            file,
            replace,
        } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let docs = parse_seed(collection, &raw)?;
            if replace {
                let removed = storage.purge_collection(collection).await?;
                info!(%collection, removed, "collection emptied before seeding");
            }
            for doc in &docs {
                let record = storage.insert_record(collection, doc).await?;
                println!("created {collection} id={} slug={}", record.id, record.slug);
            }
            println!("seeded {} {collection}", docs.len());
        }
        Command::List { collection } => {
            for record in storage
                .list_records(collection, &ListQuery::default())
                .await?
            {
                println!(
                    "{:>4} {:>5} {} {:<24} added {}",
                    record.order,
                    record.id,
                    if record.active { "on " } else { "off" },
                    record.slug,
                    record.created_at.format("%Y-%m-%d")
                );
            }
        }
        Command::Count => {
            for kind in EntityKind::ALL {
                println!("{:<16} {}", kind, storage.count_records(kind).await?);
            }
        }
        Command::Purge { collection, yes } => {
            if !yes {
                bail!("refusing to purge {collection} without --yes");
            }
            let removed = storage.purge_collection(collection).await?;
            println!("removed {removed} {collection}");
        }
    }

    Ok(())
}

/// Seed files hold a JSON array of flat records. Ids are assigned on insert.
fn parse_seed(kind: EntityKind, raw: &str) -> Result<Vec<RecordDocument>> {
    let mut docs: Vec<RecordDocument> =
        serde_json::from_str(raw).context("seed file must be a JSON array of records")?;
    for (index, doc) in docs.iter_mut().enumerate() {
        let missing = missing_required_fields(kind, &doc.to_flat_object());
        if !missing.is_empty() {
            bail!(
                "seed record #{index} is missing {}",
                missing.join(", ")
            );
        }
        doc.id = None;
    }
    Ok(docs)
}
