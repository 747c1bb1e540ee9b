use clap::{Parser, Subcommand};
use std::path::PathBuf;
use anyhow::Result;

use crate::core::Engine;

#[derive(Parser)]
#[command(name = "scanchain")]
#[command(about = "Extract scan chain topology from a hierarchical design")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter configuration file
    Init {
        /// Target file or directory (defaults to ./scanchain.toml)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Trace scan chains and write the ChainG document
    Trace {
        /// Design file (.toml or .json)
        #[arg(short, long)]
        design: Option<PathBuf>,

        /// Top-level cell, `library:cell` or `cell`
        #[arg(short, long)]
        top: Option<String>,

        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Inline every entity instead of declaring shared ones
        #[arg(long)]
        flat: bool,
    },

    /// Trace scan chains and report problems without writing a document
    Validate {
        /// Design file (.toml or .json)
        #[arg(short, long)]
        design: Option<PathBuf>,

        /// Top-level cell, `library:cell` or `cell`
        #[arg(short, long)]
        top: Option<String>,

        /// Fail on warnings too
        #[arg(long)]
        strict: bool,
    },
}

impl Cli {
    pub async fn execute(self, engine: Engine) -> Result<()> {
        match self.command {
            Commands::Init { path, force } => {
                engine.init(path, force).await
            }
            Commands::Trace { design, top, output, flat } => {
                engine.trace(design, top, output, flat).await
            }
            Commands::Validate { design, top, strict } => {
                engine.validate(design, top, strict).await
            }
        }
    }
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
    fn test_trace_arguments() {
        let cli = Cli::parse_from([
            "scanchain", "-c", "chip.toml", "trace", "--design", "d.toml", "--top", "work:top", "--flat",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("chip.toml")));
        match cli.command {
            Commands::Trace { design, top, output, flat } => {
                assert_eq!(design, Some(PathBuf::from("d.toml")));
                assert_eq!(top.as_deref(), Some("work:top"));
                assert!(output.is_none());
                assert!(flat);
            }
            _ => panic!("expected trace"),
        }
    }
}
