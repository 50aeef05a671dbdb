use super::{apply_profiles, parse_profiles, print_warnings};
use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand, ValueEnum};
use devbao::{
    ConfigOption, DevbaoClient, Node, ProductType,
    core::domain::model::{
        audit::Audit, instance_config::DevConfig, listener::Listener, seal::Seal,
        storage::Storage,
    },
    lifecycle::application::response::node_response::NodeState,
};

#[derive(Subcommand, Debug)]
pub enum NodeCommand {
    /// List nodes and whether they are running.
    #[command(visible_alias = "ls")]
    List {
        #[arg(long, value_enum)]
        state: Option<StateFilter>,
    },
    /// Start a production instance.
    #[command(visible_alias = "s")]
    Start(ProdStartArgs),
    /// Start a dev-mode instance.
    #[command(visible_alias = "d")]
    StartDev(DevStartArgs),
    /// Start a stopped instance again, keeping its storage.
    #[command(visible_alias = "r")]
    Resume {
        name: String,
        /// Unseal with the stored keys once running.
        #[arg(short, long, visible_alias = "auto-unseal")]
        unseal: bool,
    },
    /// Stop a running instance.
    Stop { name: String },
    /// Stop an instance and delete its directory.
    Clean {
        name: String,
        /// Ignore unreadable records, failed stops and cluster membership.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the instance's directory.
    Dir { name: String },
    /// Print shell exports for reaching the instance.
    Env { name: String },
    /// Initialize the instance and store its root token and key shares.
    Initialize { name: String },
    /// Unseal the instance with its stored key shares.
    Unseal { name: String },
    /// Seal the instance.
    Seal { name: String },
    /// Print the stored root token.
    GetToken { name: String },
    /// Store a root token, checking it when the instance runs.
    SetToken { name: String, token: String },
    /// Store an API address overriding the listener; empty clears it.
    #[command(visible_alias = "set-addr")]
    SetAddress { name: String, address: String },
    /// Print the stored unseal keys.
    GetUnseal { name: String },
    /// Store unseal keys as given.
    SetUnseal {
        name: String,
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Print the last lines of the server or audit log.
    #[command(visible_alias = "tail")]
    Logs {
        name: String,
        #[arg(long)]
        audit: bool,
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StateFilter {
    Running,
    Stopped,
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Server product: empty for auto-detect preferring OpenBao, `bao` or `vault`.
    #[arg(long = "type", default_value = "")]
    pub product: String,
    /// Overwrite an existing node of the same name.
    #[arg(short, long)]
    pub force: bool,
    /// Profiles to apply once the node is ready.
    #[arg(short, long, value_delimiter = ',')]
    pub profiles: Vec<String>,
    /// Enable file auditing of requests.
    #[arg(long)]
    pub audit: bool,
    /// Enable the web UI.
    #[arg(long)]
    pub ui: bool,
}

#[derive(Args, Debug)]
pub struct ProdStartArgs {
    #[arg(long, default_value = "prod")]
    pub name: String,
    #[command(flatten)]
    pub server: ServerArgs,
    /// `tcp:<bind address>` or `unix:<path>`; repeatable.
    #[arg(long, default_value = "tcp:0.0.0.0:8200")]
    pub listeners: Vec<String>,
    /// Storage backend: raft, file, inmem or postgresql.
    #[arg(long, default_value = "raft")]
    pub storage: String,
    /// `http(s)://<token>@<addr>/<mount>/keys/<key>` or `static://[<hex key>]`; repeatable.
    #[arg(long)]
    pub seals: Vec<String>,
    /// Initialize the node and store its unseal keys.
    #[arg(short, long, visible_alias = "auto-initialize")]
    pub initialize: bool,
    /// Unseal the node after initializing it.
    #[arg(short, long, visible_alias = "auto-unseal")]
    pub unseal: bool,
}

#[derive(Args, Debug)]
pub struct DevStartArgs {
    #[arg(long, default_value = "dev")]
    pub name: String,
    #[command(flatten)]
    pub server: ServerArgs,
    /// Root token of the dev server.
    #[arg(long, default_value = "devroot")]
    pub token: String,
    /// Listener bind address of the dev server.
    #[arg(long, default_value = "127.0.0.1:8200")]
    pub address: String,
    /// Serve temporary TLS certificates.
    #[arg(long)]
    pub dev_tls: bool,
}

pub async fn run(client: &DevbaoClient, command: NodeCommand) -> Result<()> {
    let nodes = client.nodes();
    match command {
        NodeCommand::List { state } => {
            for summary in nodes.list().await? {
                let keep = match state {
                    None => true,
                    Some(StateFilter::Running) => summary.state == NodeState::Running,
                    Some(StateFilter::Stopped) => summary.state == NodeState::Stopped,
                };
                if !keep {
                    continue;
                }
                if summary.cluster.is_empty() {
                    println!(" - {} ({})", summary.name, summary.state);
                } else {
                    println!(
                        " - {} ({}, cluster {})",
                        summary.name, summary.state, summary.cluster
                    );
                }
            }
        }
        NodeCommand::Start(args) => start_prod(client, args).await?,
        NodeCommand::StartDev(args) => start_dev(client, args).await?,
        NodeCommand::Resume { name, unseal } => {
            let mut node = nodes.load(&name).await?;
            if nodes.is_running(&node) {
                eprintln!("node {name} / pid {} is already running", node.pid());
                return Ok(());
            }
            println!("resuming node {name}...");
            let outcome = nodes.resume(&mut node).await?;
            print_warnings(&outcome.warnings);
            if unseal {
                if node.is_dev() {
                    eprintln!("warning: node {name} is a dev mode instance; it unsealed itself with fresh keys");
                    return Ok(());
                }
                nodes
                    .wait_until_responsive(&node)
                    .await
                    .context("waiting for node to respond")?;
                nodes.unseal(&node).await.context("failed to unseal node")?;
                nodes.wait_until_unsealed(&node).await?;
            }
        }
        NodeCommand::Stop { name } => {
            let mut node = nodes.load(&name).await?;
            if nodes.is_running(&node) {
                println!("stopping node {name} / pid {}...", node.pid());
                nodes.kill(&mut node).await?;
            } else {
                eprintln!("node {name} / pid {} was already stopped", node.pid());
            }
        }
        NodeCommand::Clean { name, force } => {
            let outcome = nodes.clean(&name, force).await?;
            print_warnings(&outcome.warnings);
            if outcome.removed {
                println!("cleaned node {name}");
            } else {
                eprintln!("node {name} was already removed");
            }
        }
        NodeCommand::Dir { name } => {
            println!("{}", nodes.directory(&nodes.load(&name).await?.name).display());
        }
        NodeCommand::Env { name } => {
            let node = nodes.load(&name).await?;
            if !nodes.is_running(&node) {
                eprintln!("[warning] node {name} / pid {} is not running...", node.pid());
            }
            println!("# devbao node {name}");
            for (key, value) in nodes.env(&node)? {
                println!("export {key}={value:?}");
            }
        }
        NodeCommand::Initialize { name } => {
            let mut node = nodes.load(&name).await?;
            nodes.initialize(&mut node).await?;
        }
        NodeCommand::Unseal { name } => {
            let node = nodes.load(&name).await?;
            if !nodes.unseal(&node).await? {
                eprintln!("node {name} was already unsealed");
            }
            nodes.wait_until_unsealed(&node).await?;
        }
        NodeCommand::Seal { name } => {
            let node = nodes.load(&name).await?;
            nodes.seal(&node).await?;
        }
        NodeCommand::GetToken { name } => {
            println!("{}", nodes.load(&name).await?.token);
        }
        NodeCommand::SetToken { name, token } => {
            let mut node = nodes.load(&name).await?;
            if !nodes.set_token(&mut node, &token).await? {
                eprintln!("[warning] instance ({name}) was not running; could not validate provided token");
            }
        }
        NodeCommand::SetAddress { name, address } => {
            let mut node = nodes.load(&name).await?;
            if !nodes.set_address(&mut node, &address).await? {
                eprintln!("[warning] instance ({name}) was not running; could not validate provided address");
            }
        }
        NodeCommand::GetUnseal { name } => {
            for key in nodes.load(&name).await?.unseal_keys {
                println!("{key}");
            }
        }
        NodeCommand::SetUnseal { name, keys } => {
            let mut node = nodes.load(&name).await?;
            nodes.set_unseal_keys(&mut node, keys).await?;
        }
        NodeCommand::Logs { name, audit, lines } => {
            let node = nodes.load(&name).await?;
            let text = nodes.logs(&node, audit, lines).await?;
            if !text.is_empty() {
                println!("{text}");
            }
        }
    }
    Ok(())
}

async fn ensure_replaceable(client: &DevbaoClient, name: &str, force: bool) -> Result<()> {
    if !force && client.nodes().exists(name).await {
        bail!("refusing to overwrite existing node {name}");
    }
    Ok(())
}

fn common_options(server: &ServerArgs) -> Vec<ConfigOption> {
    let mut options = Vec::new();
    if server.audit {
        options.push(ConfigOption::Audit(Audit::file()));
        options.push(ConfigOption::Audit(Audit::raw_file()));
    }
    if server.ui {
        options.push(ConfigOption::Ui);
    }
    options
}

async fn start_prod(client: &DevbaoClient, args: ProdStartArgs) -> Result<()> {
    ensure_replaceable(client, &args.name, args.server.force).await?;
    if args.unseal && !args.initialize {
        bail!("--unseal requires --initialize, but was not provided");
    }
    if !args.server.profiles.is_empty() && !args.unseal {
        bail!("using --profiles requires --unseal and --initialize");
    }
    let profiles = parse_profiles(&args.server.profiles)?;
    let product: ProductType = args.server.product.parse()?;

    let mut options = vec![ConfigOption::Storage(args.storage.parse::<Storage>()?)];
    for (index, raw) in args.listeners.iter().enumerate() {
        let listener: Listener = raw
            .parse()
            .with_context(|| format!("listener at index {index}"))?;
        options.push(ConfigOption::Listener(listener));
    }
    for (index, raw) in args.seals.iter().enumerate() {
        let seal: Seal = raw
            .parse()
            .with_context(|| format!("seal at index {index}"))?;
        options.push(ConfigOption::Seal(seal));
    }
    options.extend(common_options(&args.server));

    let nodes = client.nodes();
    let mut node = nodes
        .build(&args.name, product, options)
        .await
        .context("failed to build node")?;
    nodes.start(&mut node).await.context("failed to start node")?;

    if args.initialize {
        nodes
            .initialize(&mut node)
            .await
            .context("failed to initialize node")?;
        if args.unseal {
            if node.config.seals.is_empty() {
                nodes.unseal(&node).await.context("failed to unseal node")?;
            }
            nodes.wait_until_unsealed(&node).await?;
            post_unseal(client, &node).await?;
        }
    }

    apply_profiles(client, &node, &profiles).await
}

async fn start_dev(client: &DevbaoClient, args: DevStartArgs) -> Result<()> {
    ensure_replaceable(client, &args.name, args.server.force).await?;
    let profiles = parse_profiles(&args.server.profiles)?;
    let product: ProductType = args.server.product.parse()?;

    let mut options = vec![ConfigOption::Dev(DevConfig {
        token: args.token,
        address: args.address,
        tls: args.dev_tls,
    })];
    options.extend(common_options(&args.server));

    let nodes = client.nodes();
    let mut node = nodes
        .build(&args.name, product, options)
        .await
        .context("failed to build node")?;
    nodes.start(&mut node).await.context("failed to start node")?;
    nodes.wait_until_unsealed(&node).await?;
    post_unseal(client, &node).await?;

    apply_profiles(client, &node, &profiles).await
}

async fn post_unseal(client: &DevbaoClient, node: &Node) -> Result<()> {
    let enabled = client
        .nodes()
        .post_unseal(node)
        .await
        .context("failed to apply post-unseal initialization")?;
    for device in enabled {
        println!("enabled audit device {device}");
    }
    Ok(())
}
