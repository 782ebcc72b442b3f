// Copyright 2026 Casewatch Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use casewatch_runtime::cli;
use casewatch_runtime::config::RuntimeConfig;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "casewatch",
    about = "Casewatch: validated COVID-19 statistics snapshots per country",
    version,
    after_help = "Run 'casewatch <command> --help' for details on each command."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Directory holding the store and run feed (overrides CASEWATCH_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, validate and store fresh snapshots
    Run {
        /// Countries to run (e.g. "Germany" "Poland")
        countries: Vec<String>,
        /// Run every known country
        #[arg(long, conflicts_with = "countries")]
        all: bool,
        /// Consecutive rejections before alerting (overrides CASEWATCH_FAILED_LIMIT)
        #[arg(long)]
        failed_limit: Option<u32>,
    },
    /// Show the latest stored snapshot of a country
    Latest {
        /// Country name
        country: String,
    },
    /// Show the stored history of a country
    History {
        /// Country name
        country: String,
        /// Only the most recent N entries
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List known countries and their stored state
    Countries,
    /// Serve the read-only HTTP API
    Serve {
        /// Port to listen on (127.0.0.1)
        #[arg(long, default_value = "7710")]
        port: u16,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global flags via environment variables so all modules can check them
    if cli.json {
        std::env::set_var("CASEWATCH_JSON", "1");
    }
    if cli.quiet {
        std::env::set_var("CASEWATCH_QUIET", "1");
    }
    if cli.verbose {
        std::env::set_var("CASEWATCH_VERBOSE", "1");
    }
    cli::init_tracing(cli.verbose, cli.json);

    let config = RuntimeConfig::from_env().with_data_dir(cli.data_dir);

    let result = match cli.command {
        Commands::Run {
            countries,
            all,
            failed_limit,
        } => {
            let config = config.with_failed_limit(failed_limit);
            cli::run_cmd::run(&countries, all, &config).await
        }
        Commands::Latest { country } => cli::show_cmd::run_latest(&country, &config).map(|_| 0),
        Commands::History { country, limit } => {
            cli::show_cmd::run_history(&country, limit, &config).map(|_| 0)
        }
        Commands::Countries => cli::show_cmd::run_countries(&config).map(|_| 0),
        Commands::Serve { port } => cli::serve_cmd::run(port, &config).await.map(|_| 0),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "casewatch", &mut std::io::stdout());
            Ok(0)
        }
    };

    // Exit codes: 0=success, 1=error or failed run, 2=rejected, 3=alert
    match result {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            if cli::output::is_json() {
                cli::output::print_json(&serde_json::json!({
                    "error": true,
                    "message": format!("{e:#}"),
                }));
            } else if !cli::output::is_quiet() {
                eprintln!("  Error: {e:#}");
            }
            std::process::exit(1);
        }
    }
}
