//! localshare - send files to a nearby device
//!
//! ```bash
//! # On the receiving device
//! localshare receive
//!
//! # On the sending device
//! localshare send ./wikipedia_en.zim --peer tablet
//! ```

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use localshare_core::config::{AppConfig, get_config_dir};
use std::path::PathBuf;

mod session;

/// Peer-to-peer file sharing between two devices on the same network
#[derive(Parser)]
#[command(name = "localshare")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Subcommand)]
enum Command {
    /// Send files to a nearby device
    Send(SendArgs),

    /// Wait for a nearby device to send files
    Receive(ReceiveArgs),

    /// Show the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        save: bool,
    },
}

#[derive(Args)]
struct SendArgs {
    /// Files to send, in order
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Name of the device to send to (first one found if omitted)
    #[arg(short, long)]
    peer: Option<String>,

    /// Don't ask before connecting
    #[arg(short, long)]
    yes: bool,
}

#[derive(Args)]
struct ReceiveArgs {
    /// Directory for received files
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Settings that take precedence over the config file
#[derive(Args)]
struct Overrides {
    /// Name shown to other devices
    #[arg(long, global = true, env = "LOCALSHARE_NAME")]
    name: Option<String>,

    #[arg(long, global = true, env = "LOCALSHARE_CONTROL_PORT")]
    control_port: Option<u16>,

    #[arg(long, global = true, env = "LOCALSHARE_DATA_PORT")]
    data_port: Option<u16>,

    #[arg(long, global = true, env = "LOCALSHARE_DISCOVERY_PORT")]
    discovery_port: Option<u16>,
}

impl Overrides {
    fn apply(self, config: &mut AppConfig) {
        if let Some(name) = self.name {
            config.device_name = Some(name);
        }
        if let Some(port) = self.control_port {
            config.control_port = port;
        }
        if let Some(port) = self.data_port {
            config.data_port = port;
        }
        if let Some(port) = self.discovery_port {
            config.discovery_port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();
    init_logging();

    let cli = Cli::parse();
    let mut config = AppConfig::load();
    cli.overrides.apply(&mut config);

    match cli.command {
        Command::Send(args) => {
            let options = session::SessionOptions {
                peer_name: args.peer,
                auto_confirm: args.yes,
            };
            session::run(config, args.paths, options).await
        }
        Command::Receive(args) => {
            if let Some(output) = args.output {
                config.storage_root = output;
            }
            session::run(config, Vec::new(), session::SessionOptions::default()).await
        }
        Command::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                config.save()?;
                if let Some(dir) = get_config_dir() {
                    println!("Saved to {}", dir.display());
                }
            }
            Ok(())
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}
