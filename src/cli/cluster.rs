use super::{apply_profiles, parse_profiles, print_warnings};
use anyhow::{Context, Result, bail};
use clap::Subcommand;
use devbao::{
    DevbaoClient, ProductType,
    cluster::application::{
        request::cluster_start_request::ClusterStartRequest,
        response::cluster_response::{JoinOutcome, RemoveOutcome},
    },
    core::domain::model::seal::Seal,
};

#[derive(Subcommand, Debug)]
pub enum ClusterCommand {
    /// Create a cluster from a running, initialized node.
    Build {
        cluster: String,
        node: String,
        /// Replace an existing cluster of the same name.
        #[arg(short, long)]
        force: bool,
    },
    /// Start a fresh cluster of new nodes.
    Start {
        cluster: String,
        #[arg(long, default_value_t = 3)]
        count: usize,
        /// Listener bind host of every node.
        #[arg(long, default_value = "0.0.0.0")]
        listen: String,
        /// Port of the first node; each further node adds 100.
        #[arg(long, default_value_t = 8200)]
        port: u16,
        /// Server product: empty for auto-detect, `bao` or `vault`.
        #[arg(long, default_value = "")]
        node_type: String,
        /// Seal URIs shared by every node; repeatable.
        #[arg(long)]
        seals: Vec<String>,
        /// Profiles to apply to the leader.
        #[arg(short, long, value_delimiter = ',')]
        profiles: Vec<String>,
        #[arg(short, long)]
        force: bool,
    },
    /// Join a node to a cluster.
    Join { cluster: String, node: String },
    /// Remove a node from a cluster.
    Remove { cluster: String, node: String },
    /// List clusters and their members.
    #[command(visible_alias = "ls")]
    List,
    /// Unseal every member with its stored keys.
    Unseal { cluster: String },
    /// Resume every stopped member.
    Resume { cluster: String },
    /// Clean every member and the cluster record.
    Clean {
        cluster: String,
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn run(client: &DevbaoClient, command: ClusterCommand) -> Result<()> {
    let clusters = client.clusters();
    match command {
        ClusterCommand::Build {
            cluster,
            node,
            force,
        } => {
            clusters
                .form(&cluster, &node, force)
                .await
                .context("failed to build cluster")?;
            println!("formed cluster {cluster} from {node}");
        }
        ClusterCommand::Start {
            cluster,
            count,
            listen,
            port,
            node_type,
            seals,
            profiles,
            force,
        } => {
            if port == 0 {
                bail!("minimum bind port is 1; got {port}");
            }
            let profiles = parse_profiles(&profiles)?;
            let mut request = ClusterStartRequest::new(&cluster);
            request.count = count;
            request.listen = listen;
            request.base_port = port;
            request.product = node_type.parse::<ProductType>()?;
            // Parsed once so every node shares a generated static key.
            request.seals = seals
                .iter()
                .map(|uri| uri.parse::<Seal>())
                .collect::<Result<_, _>>()?;

            let outcome = clusters.start(&request, force).await?;
            println!("{} selected as leader", outcome.leader.name);
            apply_profiles(client, &outcome.leader, &profiles).await?;
        }
        ClusterCommand::Join { cluster, node } => {
            match clusters.join(&cluster, &node).await? {
                JoinOutcome::Joined { resumed: false } => println!("joined {node} to {cluster}"),
                JoinOutcome::Joined { resumed: true } => {
                    println!("completed interrupted join of {node} to {cluster}")
                }
                JoinOutcome::AlreadyMember => {
                    eprintln!("node {node} is already a member of {cluster}")
                }
            }
        }
        ClusterCommand::Remove { cluster, node } => {
            match clusters.remove(&cluster, &node).await? {
                RemoveOutcome::Removed { raft_id } => {
                    println!("removed {node} (raft id {raft_id}) from {cluster}")
                }
                RemoveOutcome::Stale => eprintln!(
                    "[warning] node {node} was not part of the live cluster; removed it from the local record only"
                ),
            }
        }
        ClusterCommand::List => {
            for name in clusters.list().await? {
                let cluster = clusters
                    .load(&name)
                    .await
                    .with_context(|| format!("failed to load cluster {name}"))?;
                println!(" - {name} (HA)");
                for member in &cluster.nodes {
                    println!("   - node: {member}");
                }
            }
        }
        ClusterCommand::Unseal { cluster } => {
            for member in clusters.unseal_all(&cluster).await? {
                if !member.unsealed {
                    eprintln!("node {} was already unsealed", member.node);
                }
            }
        }
        ClusterCommand::Resume { cluster } => {
            let outcome = clusters.resume_all(&cluster).await?;
            print_warnings(&outcome.warnings);
        }
        ClusterCommand::Clean { cluster, force } => {
            let outcome = clusters.clean(&cluster, force).await?;
            print_warnings(&outcome.warnings);
            if outcome.removed {
                println!("cleaned cluster {cluster}");
            } else {
                eprintln!("cluster {cluster} was already removed");
            }
        }
    }
    Ok(())
}
