//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Batch text generation over a pool of completion-service credentials.
#[derive(Debug, Parser)]
#[command(
    name = "promptpool",
    about = "Run prompt batches against a pooled set of API credentials",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Process a JSONL prompt batch, appending results as they land.
    Run {
        /// Task file, one `{"<id>": {"instruction", "input"}}` per line.
        #[arg(short, long)]
        input: PathBuf,

        /// Result file, appended as `{"<id>": <text or null>}` records.
        #[arg(short, long)]
        output: PathBuf,

        /// Key config TOML. Falls back to PROMPTPOOL_CONFIG, then keys.toml.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Upper bound on concurrent requests.
        #[arg(long, default_value_t = dispatch::DEFAULT_CONCURRENCY)]
        concurrency: usize,

        /// Client calls to spend per task before recording a failure.
        #[arg(
            long,
            default_value_t = dispatch::DEFAULT_MAX_RETRIES,
            value_parser = clap::value_parser!(u32).range(1..)
        )]
        max_retries: u32,

        /// Seconds a rate-limited credential sits out before reuse.
        #[arg(long, default_value_t = dispatch::DEFAULT_COOLDOWN.as_secs())]
        cooldown_secs: u64,
    },

    /// Send one prompt through the pool and print the completion to stdout.
    Ask {
        /// System message guiding the generation.
        #[arg(short, long)]
        instruction: String,

        /// User text the instruction applies to.
        #[arg(short, long)]
        text: String,

        /// Key config TOML. Falls back to PROMPTPOOL_CONFIG, then keys.toml.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Join a task file with its result file by id into one JSONL file.
    Merge {
        /// Task file the batch was run from.
        #[arg(short, long)]
        input: PathBuf,

        /// Result file produced by `run`.
        #[arg(short, long)]
        output: PathBuf,

        /// Destination for `{"<id>": {"instruction", "input", "output"}}`.
        #[arg(short, long)]
        merged: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_default_to_the_dispatcher_knobs() {
        let cli = Cli::try_parse_from(["promptpool", "run", "-i", "in.jsonl", "-o", "out.jsonl"])
            .unwrap();
        match cli.command {
            Commands::Run {
                concurrency,
                max_retries,
                cooldown_secs,
                config,
                ..
            } => {
                assert_eq!(concurrency, dispatch::DEFAULT_CONCURRENCY);
                assert_eq!(max_retries, dispatch::DEFAULT_MAX_RETRIES);
                assert_eq!(cooldown_secs, dispatch::DEFAULT_COOLDOWN.as_secs());
                assert!(config.is_none());
            }
            other => panic!("expected run, parsed {other:?}"),
        }
    }

    #[test]
    fn max_retries_must_be_at_least_one() {
        let zero = Cli::try_parse_from([
            "promptpool",
            "run",
            "-i",
            "in.jsonl",
            "-o",
            "out.jsonl",
            "--max-retries",
            "0",
        ]);
        assert!(zero.is_err());

        let one = Cli::try_parse_from([
            "promptpool",
            "run",
            "-i",
            "in.jsonl",
            "-o",
            "out.jsonl",
            "--max-retries",
            "1",
        ]);
        assert!(one.is_ok());
    }

    #[test]
    fn ask_takes_instruction_and_text() {
        let cli = Cli::try_parse_from([
            "promptpool",
            "ask",
            "--instruction",
            "Translate to English",
            "--text",
            "bonjour",
        ])
        .unwrap();
        match cli.command {
            Commands::Ask {
                instruction, text, ..
            } => {
                assert_eq!(instruction, "Translate to English");
                assert_eq!(text, "bonjour");
            }
            other => panic!("expected ask, parsed {other:?}"),
        }
    }

    #[test]
    fn merge_requires_all_three_paths() {
        let err = Cli::try_parse_from(["promptpool", "merge", "-i", "in.jsonl", "-o", "out.jsonl"]);
        assert!(err.is_err());
    }
}
