use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use mauboussin_twin_core::{
    scrape_sources, DbSettings, EmbeddingModelConfig, IngestionOptions, MetadataStore, QdrantConnection,
    ScraperConfig, VectorStore, DEFAULT_COLLECTION_NAME, DEFAULT_CURATOR, DEFAULT_METADATA_FILE,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "mauboussin-twin", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory for downloaded PDFs, rendered pages and the metadata file
    #[arg(long, env = "DATA_DIR", default_value = "data", global = true)]
    data_dir: PathBuf,

    /// Metadata file; defaults to <data-dir>/extraction_metadata.json
    #[arg(long, env = "METADATA_FILE", global = true)]
    metadata_file: Option<PathBuf>,

    /// Author recorded for scraped documents and assumed for records without one
    #[arg(long, env = "CURATOR_NAME", default_value = DEFAULT_CURATOR, global = true)]
    curator: String,
}

#[derive(Args)]
struct ModelArgs {
    /// Vision embedding model (fastembed model code)
    #[arg(long, env = "VISION_EMBEDDING_MODEL")]
    vision_model: Option<String>,

    /// Text embedding model (fastembed model code)
    #[arg(long, env = "TEXT_EMBEDDING_MODEL")]
    text_model: Option<String>,

    /// Prefix prepended to queries for the text model
    #[arg(long, env = "TEXT_QUERY_PREFIX")]
    text_query_prefix: Option<String>,

    /// Where model weights are cached
    #[arg(long, env = "MODEL_CACHE_DIR", default_value = ".fastembed_cache")]
    model_cache_dir: PathBuf,

    /// Talk to Qdrant Cloud instead of a local server
    #[arg(long, env = "USE_QDRANT_CLOUD", default_value_t = false)]
    use_qdrant_cloud: bool,

    /// Local Qdrant host
    #[arg(long, env = "QDRANT_DATABASE_HOST", default_value = "localhost")]
    qdrant_host: String,

    /// Local Qdrant REST port
    #[arg(long, env = "QDRANT_DATABASE_PORT", default_value = "6333")]
    qdrant_port: u16,

    /// Qdrant Cloud URL
    #[arg(long, env = "QDRANT_CLOUD_URL", default_value = "http://localhost:6333")]
    qdrant_cloud_url: String,

    /// Qdrant Cloud API key
    #[arg(long, env = "QDRANT_APIKEY", hide_env_values = true)]
    qdrant_api_key: Option<String>,

    /// Qdrant collection
    #[arg(long, env = "QDRANT_COLLECTION", default_value = DEFAULT_COLLECTION_NAME)]
    collection: String,
}

impl ModelArgs {
    /// Fails before any I/O unless exactly one model family is configured.
    fn db_settings(self, data_dir: PathBuf) -> anyhow::Result<DbSettings> {
        let embedding = EmbeddingModelConfig::from_options(self.vision_model, self.text_model, self.text_query_prefix)?;
        let connection = if self.use_qdrant_cloud {
            QdrantConnection::Cloud {
                url: self.qdrant_cloud_url,
                api_key: self.qdrant_api_key,
            }
        } else {
            QdrantConnection::Local {
                host: self.qdrant_host,
                port: self.qdrant_port,
            }
        };

        Ok(DbSettings {
            embedding,
            connection,
            collection_name: self.collection,
            model_cache_dir: self.model_cache_dir,
            data_dir,
        })
    }
}

#[derive(Subcommand)]
enum Command {
    /// Scrape the research listing and article series, appending to the metadata file.
    Scrape {
        /// Listing page with the research links
        #[arg(long, env = "LISTING_URL")]
        listing_url: Option<String>,
        /// Show the browser window while scraping the series
        #[arg(long, default_value_t = false)]
        headed: bool,
    },
    /// Split every scraped PDF into pages, embed them and upsert them into Qdrant.
    Ingest {
        #[command(flatten)]
        model: ModelArgs,
        /// Pages per embedding/upsert batch
        #[arg(long, default_value = "5")]
        batch_size: usize,
        /// Attempts per batch upsert
        #[arg(long, default_value = "3")]
        max_attempts: usize,
        /// Drop and recreate the collection first
        #[arg(long, default_value_t = false)]
        recreate: bool,
        /// Hide the progress bar
        #[arg(long, default_value_t = false)]
        no_progress: bool,
    },
    /// Embed a query and print the closest pages.
    Query {
        #[command(flatten)]
        model: ModelArgs,
        /// Search query
        #[arg(long)]
        query: String,
        /// Number of pages to return
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let metadata_file = cli
        .metadata_file
        .clone()
        .unwrap_or_else(|| cli.data_dir.join(DEFAULT_METADATA_FILE));

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "mauboussin-twin boot"
    );

    match cli.command {
        Command::Scrape { listing_url, headed } => {
            let mut config = ScraperConfig {
                data_dir: cli.data_dir,
                curator: cli.curator,
                ..ScraperConfig::default()
            };
            if let Some(listing_url) = listing_url {
                config.listing_url = listing_url;
            }
            config.browser.headless = !headed;

            let records = scrape_sources(&config).await?;
            let total = MetadataStore::new(&metadata_file).save(&records)?;
            println!(
                "{} records scraped, {} in {}",
                records.len(),
                total,
                metadata_file.display()
            );
        }
        Command::Ingest {
            model,
            batch_size,
            max_attempts,
            recreate,
            no_progress,
        } => {
            let settings = model.db_settings(cli.data_dir)?;
            let options = IngestionOptions {
                batch_size,
                max_upsert_attempts: max_attempts,
                show_progress: !no_progress,
                curator: cli.curator,
                ..IngestionOptions::default()
            };
            options.validate()?;

            let store = VectorStore::from_pretrained(&settings, options, recreate).await?;
            let report = store.ingest(&metadata_file).await?;

            for skipped in &report.skipped {
                warn!(path = %skipped.pdf_path.display(), reason = %skipped.reason, "skipped record");
            }
            for failure in &report.failed_batches {
                warn!(%failure, "batch not stored");
            }

            println!(
                "{} points built, {} stored, {} failed batches, {} skipped records at {}",
                report.points.len(),
                report.stored_points(),
                report.failed_batches.len(),
                report.skipped.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Query { model, query, top_k } => {
            let settings = model.db_settings(cli.data_dir)?;
            let options = IngestionOptions {
                show_progress: false,
                ..IngestionOptions::default()
            };

            let store = VectorStore::from_pretrained(&settings, options, false).await?;
            let results = store.query(&query, top_k).await?;

            println!("query: {query}");
            for (rank, result) in results.iter().enumerate() {
                let metadata = &result.metadata;
                println!(
                    "{}. score={:.4} title={} date={} url={}",
                    rank + 1,
                    result.score,
                    metadata.title,
                    metadata.date.as_deref().unwrap_or("-"),
                    metadata.source_url
                );
                if let Some(text) = &metadata.text {
                    let preview: String = text.chars().take(200).collect();
                    println!("   {preview}");
                }
            }
        }
    }

    Ok(())
}
