//! Abridge CLI - command-line client for the summarisation server
//!
//! Examples:
//!   abridge pull                          # Download facebook/bart-large-cnn
//!   abridge summarise article.txt         # Summarise a file
//!   cat article.txt | abridge summarise - # Summarise stdin
//!   abridge summarise --url https://...   # Summarise a web page
//!   abridge status                        # Show server status

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod http;

/// Abridge - abstractive text summarisation
#[derive(Parser)]
#[command(
    name = "abridge",
    about = "Summarise text with facebook/bart-large-cnn",
    version = env!("CARGO_PKG_VERSION"),
    arg_required_else_help = true,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Server URL for API commands
    #[arg(
        long,
        global = true,
        value_name = "URL",
        default_value = "http://localhost:8000",
        env = "ABRIDGE_SERVER"
    )]
    pub server: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except results
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download the model from HuggingFace
    ///
    /// Fetches the checkpoint into the local cache so the server can start
    /// without network access.
    #[command(name = "pull", alias = "download")]
    Pull {
        /// Models directory
        #[arg(short, long, env = "ABRIDGE_MODELS_DIR")]
        models_dir: Option<PathBuf>,
    },

    /// Summarise a file, stdin or a web page
    #[command(name = "summarise", alias = "summarize")]
    Summarise {
        /// Input file ("-" or omitted reads stdin)
        input: Option<PathBuf>,

        /// Summarise the page at this URL instead (fetched by the server)
        #[arg(long, value_name = "URL", conflicts_with = "input")]
        url: Option<String>,

        /// Maximum summary length in tokens (30-500)
        #[arg(long, value_parser = clap::value_parser!(u32).range(30..=500))]
        max_length: Option<u32>,

        /// Minimum summary length in tokens (10-200)
        #[arg(long, value_parser = clap::value_parser!(u32).range(10..=200))]
        min_length: Option<u32>,
    },

    /// Show model and job status of the server
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "abridge_core=debug".into()),
            )
            .init();
    }

    match cli.command {
        Commands::Pull { models_dir } => {
            commands::pull::execute(models_dir, cli.quiet).await?;
        }

        Commands::Summarise {
            input,
            url,
            max_length,
            min_length,
        } => {
            commands::summarise::execute(
                commands::summarise::SummariseArgs {
                    input,
                    url,
                    max_length,
                    min_length,
                    json: cli.json,
                    quiet: cli.quiet,
                },
                &cli.server,
            )
            .await?;
        }

        Commands::Status => {
            commands::status::execute(&cli.server, cli.json).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_summarise_bounds() {
        let cli = Cli::try_parse_from([
            "abridge",
            "summarise",
            "article.txt",
            "--max-length",
            "120",
            "--server",
            "http://summary.local:9000",
        ])
        .unwrap();

        assert_eq!(cli.server, "http://summary.local:9000");
        match cli.command {
            Commands::Summarise {
                input, max_length, ..
            } => {
                assert_eq!(input, Some(PathBuf::from("article.txt")));
                assert_eq!(max_length, Some(120));
            }
            _ => panic!("expected summarise"),
        }
    }

    #[test]
    fn test_url_conflicts_with_input_file() {
        let cli =
            Cli::try_parse_from(["abridge", "summarise", "--url", "https://example.com/a"]).unwrap();
        match cli.command {
            Commands::Summarise { input, url, .. } => {
                assert_eq!(input, None);
                assert_eq!(url.as_deref(), Some("https://example.com/a"));
            }
            _ => panic!("expected summarise"),
        }

        assert!(Cli::try_parse_from([
            "abridge",
            "summarise",
            "article.txt",
            "--url",
            "https://example.com/a"
        ])
        .is_err());
    }

    #[test]
    fn test_rejects_out_of_range_bounds() {
        assert!(Cli::try_parse_from(["abridge", "summarise", "--max-length", "20"]).is_err());
        assert!(Cli::try_parse_from(["abridge", "summarise", "--min-length", "500"]).is_err());
    }
}
