//! nbiot - NB-IoT protocol core tools
//!
//! Decodes downlink frames, builds uplink frames, and replays captured
//! module output through the AT report routing.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{TlvArg, UplinkOptions};
use nbiot_link::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nbiot")]
#[command(about = "NB-IoT frame codec and AT session tools")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "NBIOT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a hex frame and print it as JSON
    Decode {
        /// Frame as hex, e.g. the payload of a +M2MCLIRECV report
        hex: String,
    },

    /// Build a frame and print it as hex
    Uplink {
        /// Message id
        #[arg(short, long, default_value = "0")]
        msg_id: u8,

        /// Correlation tag
        #[arg(short, long, default_value = "0")]
        tag: u16,

        /// Entry as TYPE:FORMAT:VALUE (byte, short, int32, long64, float,
        /// double, bool, enum, string, hex)
        #[arg(long = "tlv", value_parser = commands::parse_tlv)]
        tlvs: Vec<TlvArg>,

        /// Build a command response instead of an uplink report
        #[arg(long)]
        response: bool,

        /// Battery level in percent
        #[arg(long)]
        battery: Option<u8>,

        /// Signal strength
        #[arg(long, allow_hyphen_values = true)]
        signal: Option<i32>,

        /// Print the full AT send command
        #[arg(long)]
        at: bool,
    },

    /// Replay captured module output and print the resulting module status
    Replay {
        /// Raw capture of the module's serial output
        file: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, Box<dyn std::error::Error>> {
    let config = Config::load_from(path.map(PathBuf::as_path))?;
    if let Some(path) = path {
        tracing::info!("Loaded config from {}", path.display());
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Decode { hex } => {
            let value = commands::decode(&config, &hex)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Uplink {
            msg_id,
            tag,
            tlvs,
            response,
            battery,
            signal,
            at,
        } => {
            let opts = UplinkOptions {
                msg_id,
                tag,
                response,
                battery,
                signal,
                at_command: at,
            };
            println!("{}", commands::uplink(&config, &opts, &tlvs)?);
        }
        Commands::Replay { file } => {
            let value = commands::replay(&config, &file)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}

fn main() {
    // Initialize logging; stdout carries command output only
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }
}
