use clap::{Parser, Subcommand};
use ragpipe::Result;
use ragpipe::commands::{
    ask_question, delete_run, ingest_files, list_runs, query_chunks, show_run_status,
};
use ragpipe::config::{run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ragpipe")]
#[command(about = "Chunk, embed, index, and query documents with pluggable vector stores")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure connection and pipeline settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Ingest local files: chunk, embed, and index them
    Ingest {
        /// Files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Retrieve the chunks most similar to a query
    Query {
        /// Query text
        text: String,
        /// How many chunks to return
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        /// Only search chunks from this document name
        #[arg(long)]
        doc: Option<String>,
    },
    /// Answer a question from indexed context
    Ask {
        /// The question to answer
        question: String,
        /// How many chunks to retrieve as context
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
    /// List recorded pipeline runs
    Runs,
    /// Show one pipeline run in detail
    Status {
        /// Run ID to inspect
        run_id: String,
    },
    /// Delete a run record and drop the vector index
    Delete {
        /// Run ID to delete
        run_id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::Ingest { files } => {
            ingest_files(files).await?;
        }
        Commands::Query { text, top_k, doc } => {
            query_chunks(&text, top_k, doc).await?;
        }
        Commands::Ask { question, top_k } => {
            ask_question(&question, top_k).await?;
        }
        Commands::Runs => {
            list_runs().await?;
        }
        Commands::Status { run_id } => {
            show_run_status(&run_id).await?;
        }
        Commands::Delete { run_id, yes } => {
            delete_run(&run_id, yes).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["ragpipe", "runs"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            matches!(parsed.command, Commands::Runs);
        }
    }

    #[test]
    fn ingest_requires_files() {
        let cli = Cli::try_parse_from(["ragpipe", "ingest"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        }
    }

    #[test]
    fn ingest_collects_files() {
        let cli = Cli::try_parse_from(["ragpipe", "ingest", "notes.md", "guide.txt"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ingest { files } = parsed.command {
                assert_eq!(files.len(), 2);
                assert_eq!(files[0], PathBuf::from("notes.md"));
            }
        }
    }

    #[test]
    fn query_with_flags() {
        let cli = Cli::try_parse_from([
            "ragpipe",
            "query",
            "how do I configure the store",
            "--top-k",
            "3",
            "--doc",
            "guide.md",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Query { text, top_k, doc } = parsed.command {
                assert_eq!(text, "how do I configure the store");
                assert_eq!(top_k, 3);
                assert_eq!(doc, Some("guide.md".to_string()));
            }
        }
    }

    #[test]
    fn query_defaults_top_k() {
        let cli = Cli::try_parse_from(["ragpipe", "query", "anything"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Query { top_k, doc, .. } = parsed.command {
                assert_eq!(top_k, 5);
                assert_eq!(doc, None);
            }
        }
    }

    #[test]
    fn delete_with_yes_flag() {
        let cli = Cli::try_parse_from(["ragpipe", "delete", "some-run-id", "--yes"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Delete { run_id, yes } = parsed.command {
                assert_eq!(run_id, "some-run-id");
                assert!(yes);
            }
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["ragpipe", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["ragpipe", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["ragpipe", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
