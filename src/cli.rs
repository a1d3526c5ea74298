use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// bao-planner - Plan an OpenBao server installation
#[derive(Parser)]
#[command(name = "bao-planner")]
#[command(about = "Derives the resources needed to install and run an OpenBao server")]
#[command(version)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Parameter and fact inputs shared by the planning commands
#[derive(clap::Args, Debug, Clone)]
pub struct Inputs {
    /// Module parameters (JSON object)
    #[arg(short, long)]
    pub params: PathBuf,

    /// Host facts (JSON object); detected from the running host when omitted
    #[arg(short, long)]
    pub facts: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the resource plan in apply order
    Plan {
        #[command(flatten)]
        inputs: Inputs,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Summary)]
        format: OutputFormat,
    },
    /// Print a rendered file
    Render {
        #[command(subcommand)]
        target: RenderTarget,
    },
    /// Check parameters and facts without printing a plan
    Validate {
        #[command(flatten)]
        inputs: Inputs,
    },
    /// Print the detected host facts as JSON
    Facts {
        /// Server binary to query for the installed version
        #[arg(long, default_value = "/usr/local/bin/bao")]
        binary: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum RenderTarget {
    /// The server's config.json
    Config {
        #[command(flatten)]
        inputs: Inputs,
    },
    /// The systemd unit file
    Unit {
        #[command(flatten)]
        inputs: Inputs,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable numbered list
    Summary,
    /// JSON export for the convergence engine
    Json,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Log filter directive for the requested verbosity
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
