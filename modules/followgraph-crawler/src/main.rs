use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use followgraph_common::Config;
use followgraph_crawler::{CrawlConfig, CrawlOutcome, Crawler, IdlePolicy};
use followgraph_graph::export::{DEFAULT_EDGES_FILE, DEFAULT_NODES_FILE};
use followgraph_graph::{
    export, import, ExportConfig, GraphClient, GraphStore, ImportConfig, Neo4jStore, TracingObserver,
};
use twitter_client::TwitterClient;

#[derive(Parser)]
#[command(name = "followgraph", about = "Crawl a follow graph into Neo4j and move it in and out as JSON lines")]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl following lists, highest reference score first
    Crawl {
        /// API bearer token (falls back to TWITTER_BEARER_TOKEN)
        #[arg(long)]
        token: Option<String>,
        /// Username to seed the graph with; repeatable
        #[arg(long = "seed")]
        seeds: Vec<String>,
        /// Only crawl accounts with more followers than this
        #[arg(long)]
        min_followers: Option<i64>,
        /// Keep polling this often when no candidate is left instead of exiting
        #[arg(long)]
        idle_poll_secs: Option<u64>,
    },
    /// Load a nodes file and an edges file into an empty store
    Import {
        #[arg(long, default_value = DEFAULT_NODES_FILE)]
        nodes: PathBuf,
        #[arg(long, default_value = DEFAULT_EDGES_FILE)]
        edges: PathBuf,
        /// Records per transaction
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Write every node and edge out as JSON lines
    Export {
        #[arg(long, default_value = DEFAULT_NODES_FILE)]
        nodes: PathBuf,
        #[arg(long, default_value = DEFAULT_EDGES_FILE)]
        edges: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env()
        .add_directive("followgraph=info".parse()?)
        .add_directive("twitter_client=info".parse()?);
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if cli.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = Config::from_env().context("Failed to load configuration")?;
    config.log_redacted();

    let client = GraphClient::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
        .await
        .with_context(|| format!("Could not reach Neo4j at {}", config.neo4j_uri))?;
    let store = Neo4jStore::new(client);

    match cli.command {
        Command::Crawl {
            token,
            seeds,
            min_followers,
            idle_poll_secs,
        } => {
            let Some(token) = token.or_else(|| config.twitter_bearer_token.clone()) else {
                bail!("crawl needs an API token: pass --token or set TWITTER_BEARER_TOKEN");
            };

            let mut crawl_config = CrawlConfig::from_config(&config);
            if let Some(min) = min_followers {
                crawl_config.min_followers = min;
            }
            if let Some(secs) = idle_poll_secs {
                crawl_config.idle = IdlePolicy::Poll(Duration::from_secs(secs));
            }

            let crawler = Crawler::new(Arc::new(store), TwitterClient::new(token), crawl_config);
            crawler.setup().await.context("Crawl setup failed")?;
            crawler.seed(&seeds).await.context("Seeding failed")?;

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, stopping after the current step");
                    let _ = cancel_tx.send(true);
                }
            });

            let report = crawler.run(cancel_rx).await?;
            if report.outcome == CrawlOutcome::Exhausted {
                info!("Nothing left to crawl");
            }
        }

        Command::Import {
            nodes,
            edges,
            batch_size,
        } => {
            let before = store.counts().await?;
            if before.nodes > 0 {
                tracing::warn!(nodes = before.nodes, "Importing into a store that already has nodes");
            }

            let import_config = ImportConfig::new(nodes, edges)
                .with_batch_size(batch_size.unwrap_or(config.import_batch_size))
                .with_tx_timeout(config.bulk_tx_timeout);
            let stats = import(&store, &import_config, &TracingObserver).await?;
            info!(?stats, "Import finished");
        }

        Command::Export { nodes, edges } => {
            let export_config = ExportConfig::new(nodes, edges).with_tx_timeout(config.bulk_tx_timeout);
            let stats = export(&store, &export_config, &TracingObserver).await?;
            info!(nodes = stats.nodes, edges = stats.edges, "Export finished");
        }
    }

    Ok(())
}
