//! NMDC hub client CLI
//!
//! A command-line interface for talking to Direct Connect hubs.

use clap::{Parser, Subcommand};
use nmdc_client::cli;
use nmdc_client::hub::HubConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nmdc")]
#[command(author = "Darshan")]
#[command(version)]
#[command(about = "NMDC hub protocol client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the $Key answer for a $Lock challenge
    Key {
        /// Lock string (without " Pk=...")
        lock: String,
    },

    /// Escape $ and | for use in a command parameter
    Escape { text: String },

    /// Reverse of escape
    Unescape { text: String },

    /// Write a hub config file
    Init {
        /// Config file path
        #[arg(short, long, default_value = "hub.json")]
        config: PathBuf,

        /// Hub address (host:port or dchub://host:port)
        #[arg(short, long)]
        address: String,

        /// Nickname
        #[arg(short, long)]
        nick: String,
    },

    /// Connect to a hub and chat from the console
    Connect {
        /// Config file; flags below override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        address: Option<String>,

        #[arg(short, long)]
        nick: Option<String>,

        #[arg(short, long)]
        password: Option<String>,

        /// Announced share size in bytes
        #[arg(short, long)]
        share: Option<i64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Key { lock } => cli::cmd_key(&lock)?,
        Commands::Escape { text } => cli::cmd_escape(&text)?,
        Commands::Unescape { text } => cli::cmd_unescape(&text)?,
        Commands::Init {
            config,
            address,
            nick,
        } => cli::cmd_init_config(&config, &address, &nick)?,
        Commands::Connect {
            config,
            address,
            nick,
            password,
            share,
        } => {
            let mut hub_config = match config {
                Some(path) => HubConfig::load(&path)?,
                None => HubConfig::default(),
            };
            if let Some(address) = address {
                hub_config.address = address;
            }
            if let Some(nick) = nick {
                hub_config.nick = nick;
            }
            if let Some(password) = password {
                hub_config.password = password;
            }
            if let Some(share) = share {
                hub_config.share_bytes = share;
            }
            if hub_config.address.is_empty() || hub_config.nick.is_empty() {
                return Err("an address and a nick are required (flags or --config)".into());
            }

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cli::cmd_connect(hub_config))?;
        }
    }

    Ok(())
}
