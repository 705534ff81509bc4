//! # pagewise CLI
//!
//! Ask questions about a set of PDF documents and get answers with page
//! citations.
//!
//! ## Usage
//!
//! ```bash
//! pagewise --config ./config/pagewise.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pagewise ingest <pdf|dir>...` | Extract, chunk, embed, and append PDFs to the index |
//! | `pagewise ingest --rebuild <pdf|dir>...` | Replace the index with these PDFs only |
//! | `pagewise ask "<question>"` | Answer a question with citations |
//! | `pagewise search "<query>"` | Show the nearest chunks without calling the model |
//! | `pagewise stats` | Describe the live index |
//! | `pagewise serve` | Start the HTTP server |
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pagewise::config::{self, Config};
use pagewise::extract::collect_pdf_paths;
use pagewise::ingest::IngestMode;
use pagewise::pipeline::Pipeline;
use pagewise::retrieve::RetrieveError;
use pagewise::server;

const DEFAULT_CONFIG_PATH: &str = "./config/pagewise.toml";

#[derive(Parser)]
#[command(
    name = "pagewise",
    about = "Grounded question answering over PDF documents with page citations",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When the default path does not exist, built-in defaults are used.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract and index PDF files.
    ///
    /// Directories are searched recursively for `*.pdf` files.
    Ingest {
        /// PDF files or directories.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Discard the existing index instead of appending to it.
        #[arg(long)]
        rebuild: bool,
    },

    /// Answer a question from the indexed documents.
    Ask {
        query: String,
    },

    /// List the chunks nearest to a query.
    Search {
        query: String,

        /// Number of chunks to return (defaults to `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Show index statistics.
    Stats,

    /// Start the HTTP server on `server.bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = resolve_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { paths, rebuild } => {
            let files = collect_pdf_paths(&paths)?;
            if files.is_empty() {
                bail!("No PDF files found in the given paths");
            }
            let mode = if rebuild {
                IngestMode::Rebuild
            } else {
                IngestMode::Append
            };
            let pipeline = Pipeline::from_config(&cfg).await?;
            let (pages, report) = pipeline.ingest_pdf_files(&files, mode).await?;

            println!("ingest{}", if rebuild { " (rebuild)" } else { "" });
            println!("  files: {}", files.len());
            println!("  pages: {}", pages);
            println!("  chunks added: {}", report.chunks_added);
            println!("  documents processed: {}", report.documents_processed);
            println!("ok");
        }
        Commands::Ask { query } => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            match pipeline.answer(&query).await {
                Ok(answer) => println!("{}", answer.formatted()),
                Err(RetrieveError::IndexUnusable(reason)) => {
                    bail!("The index is unusable ({}). Run `pagewise ingest --rebuild`.", reason)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Search { query, top_k } => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            let hits = pipeline.retrieve(&query, top_k).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.4}] {} p.{}",
                    i + 1,
                    hit.distance,
                    hit.metadata.source,
                    hit.metadata.page_number
                );
                println!("    {}", snippet(&hit.text, 160));
            }
        }
        Commands::Stats => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            let stats = pipeline.stats();
            println!("index: {}", cfg.storage.dir.display());
            println!("  status: {}", stats.status);
            if let Some(generation) = &stats.generation {
                println!("  generation: {}", generation);
            }
            println!("  model: {}", stats.model);
            println!("  dims: {}", stats.dims);
            println!("  chunks: {}", stats.chunks);
            println!("  documents: {}", stats.documents);
            if let Some(problem) = &stats.problem {
                println!("  problem: {}", problem);
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn resolve_config(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
        tracing::debug!("no config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    config::load_config(path)
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
