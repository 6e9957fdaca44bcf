//! # Retrieval Harness CLI (`rtx`)
//!
//! Thin command-line front end over [`retrieval_harness::client`].
//!
//! ## Usage
//!
//! ```bash
//! rtx --config ./config/rtx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rtx retrieve "<question>"` | Retrieve documents and print them as JSON |
//! | `rtx health` | Probe the endpoint; exits non-zero when unhealthy |
//! | `rtx completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! rtx retrieve "how are API keys rotated?" --num-results 3
//! rtx retrieve "deploy steps" --no-rerank --filter team=infra
//! RTX_LOG=retrieval_harness=debug rtx health
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use retrieval_harness::{config, observability, retrieve};
use std::path::PathBuf;

/// Retrieval Harness CLI: resilient queries against a hosted retrieval pipeline.
#[derive(Parser)]
#[command(
    name = "rtx",
    about = "Retrieval Harness: resilient queries against a hosted retrieval pipeline",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rtx.toml`. The API key may be supplied via
    /// `RETRIEVAL_API_KEY` instead of the file.
    #[arg(long, global = true, default_value = "./config/rtx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve documents for a question.
    ///
    /// Failed attempts are retried according to `[retrieval]` settings.
    /// Results are printed to stdout as JSON, highest score first.
    Retrieve {
        /// The question to ask.
        question: String,

        /// Number of documents to return (1-20). Defaults to
        /// `retrieval.num_results_default`.
        #[arg(long)]
        num_results: Option<u32>,

        /// Disable server-side reranking.
        #[arg(long)]
        no_rerank: bool,

        /// Metadata filter as `key=value`. Repeatable.
        #[arg(long = "filter", value_parser = parse_key_val)]
        filters: Vec<(String, String)>,

        /// Correlation id to propagate. A random UUID when omitted.
        #[arg(long)]
        correlation_id: Option<String>,
    },

    /// Check that the retrieval endpoint answers.
    Health {
        /// Correlation id to propagate. A random UUID when omitted.
        #[arg(long)]
        correlation_id: Option<String>,
    },

    /// Print shell completions to stdout.
    Completions {
        shell: Shell,
    },
}

/// Parse a `key=value` pair for `--filter` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    if pos == 0 {
        return Err(format!("invalid KEY=VALUE: empty key in '{}'", s));
    }
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "rtx", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    observability::init_tracing(&cfg.logging)?;

    match cli.command {
        Commands::Retrieve {
            question,
            num_results,
            no_rerank,
            filters,
            correlation_id,
        } => {
            let cid = correlation_id.unwrap_or_else(new_correlation_id);
            retrieve::run_retrieve(&cfg, &question, num_results, !no_rerank, filters, &cid)
                .await?;
        }
        Commands::Health { correlation_id } => {
            let cid = correlation_id.unwrap_or_else(new_correlation_id);
            if !retrieve::run_health(&cfg, &cid).await? {
                std::process::exit(1);
            }
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
