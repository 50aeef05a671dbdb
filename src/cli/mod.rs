//! Command-line front end over [`DevbaoClient`].

pub mod cluster;
pub mod node;
pub mod profile;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use devbao::{DevbaoClient, Node, Profile};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "devbao",
    version,
    about = "Run local OpenBao and Vault nodes and clusters for development"
)]
pub struct Cli {
    /// Directory holding node and cluster state.
    #[arg(long, global = true, env = "DEVBAO_HOME", value_name = "DIR")]
    pub home: Option<PathBuf>,
    /// Log more; repeat for debug output.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage single server instances.
    Node {
        #[command(subcommand)]
        action: node::NodeCommand,
    },
    /// Manage HA clusters of nodes.
    Cluster {
        #[command(subcommand)]
        action: cluster::ClusterCommand,
    },
    /// Apply predefined setups to a running node.
    Profile {
        #[command(subcommand)]
        action: profile::ProfileCommand,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let mut builder = DevbaoClient::builder();
        if let Some(home) = self.home {
            builder = builder.base_directory(home);
        }
        let client = builder.build().context("failed to set up workspace")?;

        match self.command {
            Command::Node { action } => node::run(&client, action).await,
            Command::Cluster { action } => cluster::run(&client, action).await,
            Command::Profile { action } => profile::run(&client, action).await,
        }
    }
}

/// Installs a stderr subscriber; `RUST_LOG` wins over `-v`.
pub fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 1)
        .init();
}

pub(crate) fn print_warnings(warnings: &[String]) {
    for (index, warning) in warnings.iter().enumerate() {
        eprintln!(" - [warning {index}]: {warning}");
    }
}

pub(crate) fn parse_profiles(names: &[String]) -> Result<Vec<Profile>> {
    names
        .iter()
        .map(|name| name.parse::<Profile>().map_err(anyhow::Error::from))
        .collect()
}

/// Applies profiles in order, reporting warnings per profile.
pub(crate) async fn apply_profiles(
    client: &DevbaoClient,
    node: &Node,
    profiles: &[Profile],
) -> Result<()> {
    for (index, profile) in profiles.iter().enumerate() {
        let warnings = client
            .apply_profile(node, *profile)
            .await
            .with_context(|| format!("applying profile [{index}/{profile}]"))?;
        if !warnings.is_empty() {
            eprintln!("for profile [{index}/{profile}]:");
            print_warnings(&warnings);
        }
    }
    Ok(())
}
