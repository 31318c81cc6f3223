mod cmd;
mod logging;
mod output;
mod sim;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;
use wheelctl_core::Config;

const DEFAULT_CONFIG_FILE: &str = "wheelctl.yaml";

#[derive(Parser)]
#[command(
    name = "wheelctl",
    about = "Drive a wheel actuator: commands, velocity sweeps, and telemetry",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ./wheelctl.yaml, built-in defaults if absent)
    #[arg(long, global = true, env = "WHEELCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Log to the console at debug level
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Run the velocity loop against the simulated actuator (Ctrl-C stops it)
    Sweep(cmd::sweep::SweepArgs),

    /// Stream paced telemetry from the simulated actuator
    Monitor {
        /// How long to listen, in seconds
        #[arg(long, default_value = "5")]
        seconds: f64,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = load_config(cli.config.as_ref()).and_then(|config| {
        logging::init(&config.app.logging, cli.verbose)?;
        match cli.command {
            Commands::Config { subcommand } => cmd::config::run(&config, subcommand, cli.json),
            Commands::Sweep(args) => cmd::sweep::run(&config, args, cli.json),
            Commands::Monitor { seconds } => cmd::monitor::run(&config, seconds, cli.json),
        }
    });

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let path = path
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    Config::load(&path).with_context(|| format!("failed to load config from {}", path.display()))
}
