use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dualrag::app::{AppContext, RebuildTarget};
use dualrag::config::Config;
use dualrag::embedder::download;
use dualrag::mcp::server::McpServer;

#[derive(Parser, Debug)]
#[command(name = "dualrag", version, about = "Static + live-data RAG retrieval core")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, global = true, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the MCP tools over stdio
    Serve,
    /// Fully rebuild knowledge bases from their source directories
    Rebuild {
        #[arg(value_enum, default_value = "all")]
        target: RebuildTarget,
    },
    /// Retrieve context for a query and print it as JSON
    Query {
        text: String,
        /// Search the static base
        #[arg(long = "static")]
        use_static: bool,
        /// Search the dynamic base
        #[arg(long = "dynamic")]
        use_dynamic: bool,
        /// Let the keyword policy choose the bases
        #[arg(long, conflicts_with_all = ["use_static", "use_dynamic"])]
        auto: bool,
        /// Chunks per knowledge base (default: search_top_k)
        #[arg(short)]
        k: Option<usize>,
    },
    /// Print the raw ranked chunks for a query as JSON
    Search {
        text: String,
        /// Which bases to search
        #[arg(long, value_enum, default_value = "all")]
        target: RebuildTarget,
        /// Maximum hits to return
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Print per-base statistics as JSON
    Stats,
    /// Download the ONNX embedding model from HuggingFace
    DownloadModel {
        /// HuggingFace repository
        #[arg(long, default_value = download::DEFAULT_HF_REPO)]
        repo: String,
        /// Target directory (default: model.model_dir)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn load_config(path: &str) -> Result<Config> {
    let config = Config::load(path)?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout belongs to the MCP transport
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Serve => {
            info!("Starting dualrag MCP server...");
            let ctx = tokio::task::spawn_blocking(move || AppContext::from_config(config))
                .await
                .context("startup task failed")??;
            McpServer::new(Arc::new(ctx)).start().await?;
        }
        Command::Rebuild { target } => {
            let outcomes = tokio::task::spawn_blocking(move || -> Result<_> {
                let ctx = AppContext::from_config(config)?;
                Ok(ctx.rebuild(target))
            })
            .await
            .context("rebuild task failed")??;
            print_json(&outcomes)?;
            if outcomes.iter().any(|o| o.error.is_some()) {
                anyhow::bail!("one or more knowledge bases failed to rebuild");
            }
        }
        Command::Query {
            text,
            use_static,
            use_dynamic,
            auto,
            k,
        } => {
            let bundle = tokio::task::spawn_blocking(move || -> Result<_> {
                let ctx = AppContext::from_config(config)?;
                let k = k.unwrap_or(ctx.config.search_top_k);
                let bundle = if auto {
                    ctx.router.route_and_query(&text, k, ctx.policy.as_ref())
                } else if !use_static && !use_dynamic {
                    ctx.router.query(&text, k, true, false)
                } else {
                    ctx.router.query(&text, k, use_static, use_dynamic)
                };
                Ok(bundle)
            })
            .await
            .context("query task failed")??;
            print_json(&bundle)?;
        }
        Command::Search {
            text,
            target,
            limit,
        } => {
            let hits = tokio::task::spawn_blocking(move || -> Result<_> {
                Ok(AppContext::from_config(config)?.search(&text, limit, target))
            })
            .await
            .context("search task failed")??;
            print_json(&hits)?;
        }
        Command::Stats => {
            let status = tokio::task::spawn_blocking(move || -> Result<_> {
                Ok(AppContext::from_config(config)?.status())
            })
            .await
            .context("stats task failed")??;
            print_json(&status)?;
        }
        Command::DownloadModel { repo, dir } => {
            let dir = dir.unwrap_or_else(|| PathBuf::from(&config.model.model_dir));
            tokio::task::spawn_blocking(move || download::download_model_files(&dir, &repo))
                .await
                .context("download task failed")??;
        }
    }

    Ok(())
}
