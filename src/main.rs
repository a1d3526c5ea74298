//! bao-planner - command-line harness for the OpenBao install planner
//!
//! Reads module parameters (and optionally host facts) from JSON files and
//! prints the plan or one of the rendered files. Logs go to stderr so that
//! stdout can be piped straight into the convergence engine.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use bao_planner::cli::{Cli, Commands, Inputs, OutputFormat, RenderTarget};
use bao_planner::params::DEFAULT_BINARY_NAME;
use bao_planner::platform::ARCHIVE_BIN_DIR;
use bao_planner::{ModuleParams, OsFacts, plan_detailed};

/// Initialize the tracing subscriber; `RUST_LOG` overrides the CLI level.
fn init_logger(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logger(cli.log_level());
    debug!("CLI arguments parsed");

    match cli.command {
        Commands::Plan { inputs, format } => {
            let (params, facts) = load_inputs(&inputs)?;
            let outcome = plan_detailed(&params, &facts)?;
            match format {
                OutputFormat::Summary => println!("{}", outcome.plan.summary()?),
                OutputFormat::Json => print!("{}", outcome.plan.to_json()?),
            }
        }
        Commands::Render { target } => match target {
            RenderTarget::Config { inputs } => {
                let (params, facts) = load_inputs(&inputs)?;
                print!("{}", plan_detailed(&params, &facts)?.config_content);
            }
            RenderTarget::Unit { inputs } => {
                let (params, facts) = load_inputs(&inputs)?;
                print!("{}", plan_detailed(&params, &facts)?.unit_content);
            }
        },
        Commands::Validate { inputs } => {
            info!("Validating parameters: {:?}", inputs.params);
            let (params, facts) = load_inputs(&inputs)?;
            match plan_detailed(&params, &facts) {
                Ok(outcome) => {
                    info!("Parameters are valid");
                    println!(
                        "✓ Parameters are valid: {} resources planned ({})",
                        outcome.plan.len(),
                        outcome.source
                    );
                }
                Err(e) => {
                    error!("Parameter validation failed: {}", e);
                    eprintln!("✗ Parameter validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Facts { binary } => {
            let facts = OsFacts::detect(Some(binary.as_path()))?;
            println!("{}", serde_json::to_string_pretty(&facts)?);
        }
    }

    Ok(())
}

/// Load parameters, and facts from a file or the running host.
fn load_inputs(inputs: &Inputs) -> Result<(ModuleParams, OsFacts)> {
    let params = ModuleParams::load_from_file(&inputs.params)?;

    let facts = match &inputs.facts {
        Some(path) => OsFacts::load_from_file(path)?,
        None => {
            let binary = params
                .bin_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(ARCHIVE_BIN_DIR))
                .join(params.binary_name.as_deref().unwrap_or(DEFAULT_BINARY_NAME));
            OsFacts::detect(Some(binary.as_path())).context("Failed to detect host facts")?
        }
    };
    debug!("Using facts: {}", facts);

    Ok((params, facts))
}
