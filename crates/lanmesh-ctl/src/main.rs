//! lanmesh-ctl: command-line interface for the lanmesh daemon.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use lanmesh_core::LanmeshConfig;

mod cmd;

use cmd::hosts::{cmd_hosts, cmd_mark_pushed, cmd_show, cmd_status, HostSelector};
use cmd::push::cmd_push;

#[derive(Parser)]
#[command(name = "lanmesh-ctl", about = "Query lanmeshd and push SSH keys to discovered hosts")]
struct Cli {
    /// Config file (default: $LANMESH_CONFIG or ~/.config/lanmesh/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Daemon API port (overrides connect.api_port)
    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List active hosts
    Hosts {
        /// Include inactive hosts
        #[arg(long)]
        all: bool,
    },
    /// Show one host in detail
    Show {
        /// Host number from `hosts`, or MAC address
        host: String,
    },
    /// Record that a host already has our key
    MarkPushed {
        /// Host number from `hosts`, or MAC address
        host: String,
    },
    /// Copy our public key to a host with ssh-copy-id
    Push {
        /// Host number from `hosts`, or MAC address
        host: String,
        /// Remote user (default: connect.default_user)
        #[arg(long, short)]
        user: Option<String>,
        /// Remote SSH port (default: connect.ssh_port)
        #[arg(long)]
        ssh_port: Option<u16>,
    },
    /// Daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        LanmeshConfig::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(port) = cli.port {
        config.connect.api_port = port;
    }
    let port = config.connect.api_port;

    match cli.command {
        Command::Hosts { all } => cmd_hosts(port, all).await,
        Command::Show { host } => cmd_show(port, &HostSelector::parse(&host)).await,
        Command::MarkPushed { host } => cmd_mark_pushed(port, &HostSelector::parse(&host)).await,
        Command::Push {
            host,
            user,
            ssh_port,
        } => {
            cmd_push(
                &config.connect,
                &HostSelector::parse(&host),
                user.as_deref(),
                ssh_port,
            )
            .await
        }
        Command::Status => cmd_status(port).await,
    }
}
