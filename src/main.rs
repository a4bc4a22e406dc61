//! # Polymath CLI (`polymath`)
//!
//! Import writing into libraries, serve them, and query many library
//! servers at once.
//!
//! ## Usage
//!
//! ```bash
//! polymath --config ./config/polymath.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `polymath init` | Create the SQLite library schema |
//! | `polymath import <importer> <source>` | Build a library file from an export |
//! | `polymath upload <file>` | Load a library file into the configured backend |
//! | `polymath inspect <file>` | Print library file statistics |
//! | `polymath serve` | Start the library HTTP server |
//! | `polymath query "<text>"` | Query every configured library server |
//!
//! ## Examples
//!
//! ```bash
//! # Import published Medium posts, embed them, and upload to Pinecone
//! polymath import medium ./medium-export --upload
//!
//! # Import drafts only
//! polymath import medium ./medium-export --medium-include drafts
//!
//! # Random sample from two servers, reproducibly
//! polymath query --random --seed 7 \
//!     --server http://127.0.0.1:8080/ --server http://127.0.0.1:8081/
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use polymath::config::{self, Config};
use polymath::importer::medium::MediumInclude;
use polymath::ingest::{self, ImportOptions};
use polymath::{federate, inspect, logging, migrate, server};

/// Polymath: federated context retrieval over libraries of writing.
///
/// All commands accept `--config`. When the file does not exist, built-in
/// defaults are used.
#[derive(Parser)]
#[command(
    name = "polymath",
    about = "Polymath: import, serve, and federate libraries of embedded text",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/polymath.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the SQLite library schema.
    ///
    /// Requires `[library.sqlite]`. Safe to run repeatedly.
    Init,

    /// Import documents into a library file.
    ///
    /// Writes `<ingest.output_dir>/<base>.json`, where the base name is
    /// chosen by the importer (e.g. `medium-alice-published`).
    Import {
        /// Importer name: `medium` or `filesystem`.
        importer: String,

        /// Export directory to read.
        source: PathBuf,

        /// Which Medium posts to import (overrides `[importers.medium]`).
        #[arg(long, value_enum)]
        medium_include: Option<MediumInclude>,

        /// Also upload the library to the configured backend.
        #[arg(long)]
        upload: bool,
    },

    /// Upload a library file to the configured backend.
    Upload {
        /// Library JSON file written by `import`.
        file: PathBuf,
    },

    /// Print statistics for a library file.
    Inspect {
        /// Library JSON file.
        file: PathBuf,
    },

    /// Serve the configured library over HTTP on `[server].bind`.
    Serve,

    /// Query library servers and print the merged context.
    Query {
        /// Query text (embedded once, sent to every server).
        text: Option<String>,

        /// Ask for a random sample instead of similarity results.
        #[arg(long)]
        random: bool,

        /// Seed for `--random`.
        #[arg(long, requires = "random")]
        seed: Option<u64>,

        /// Library server URL; repeat for several. Defaults to `[client].servers`.
        #[arg(long = "server")]
        servers: Vec<String>,

        /// Token budget per server (overrides `[client].token_count`).
        #[arg(long)]
        count: Option<usize>,
    },
}

fn load(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    // inspect only reads the file it is given
    if let Commands::Inspect { file } = &cli.command {
        return inspect::run_inspect(file);
    }

    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let Some(sqlite) = &cfg.library.sqlite else {
                bail!("polymath init needs a [library.sqlite] section");
            };
            migrate::run_migrations(&sqlite.path).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import {
            importer,
            source,
            medium_include,
            upload,
        } => {
            let options = ImportOptions {
                medium_include,
                upload,
            };
            let summary = ingest::run_import(&cfg, &importer, &source, &options).await?;
            println!("Imported {} bits to {}", summary.bits, summary.output.display());
            if summary.embedded > 0 {
                println!("  embedded: {}", summary.embedded);
            }
            if summary.skipped_documents > 0 {
                println!("  skipped documents: {}", summary.skipped_documents);
            }
            if let Some(uploaded) = summary.uploaded {
                println!("  uploaded: {}", uploaded);
            }
        }
        Commands::Upload { file } => {
            let uploaded = ingest::run_upload(&cfg, &file).await?;
            println!("Uploaded {} bits from {}", uploaded, file.display());
        }
        Commands::Inspect { .. } => {}
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Query {
            text,
            random,
            seed,
            servers,
            count,
        } => {
            federate::run_query(&cfg, text.as_deref(), random, seed, &servers, count).await?;
        }
    }

    Ok(())
}
