use crate::{
    core::{
        domain::{
            error::{DevbaoError, DevbaoResult, ResultExt, ValidationError},
            model::{
                api_types::{AuditInput, InitRequest},
                audit::Audit,
                exec_environment::ExecEnvironment,
                instance_config::{ConfigOption, InstanceConfig},
                node::Node,
                settings::DevbaoSettings,
            },
            value_object::{ProductType, validate_entity_name},
        },
        infrastructure::{
            api_client::ApiClient,
            poll::{Probe, poll_until},
            process::{self, BinaryResolver, ProcessInspector, ProcessLauncher},
            workspace::Workspace,
        },
    },
    lifecycle::application::response::node_response::{
        CleanOutcome, NodeState, NodeSummary, ResumeOutcome,
    },
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

const NODE_TARGET: &str = "devbao::node";

/// Key shares and threshold requested when initializing a node.
const INIT_SHARES: u32 = 3;
const INIT_THRESHOLD: u32 = 2;

/// Drives the lifecycle of single nodes: building, starting, stopping,
/// initializing, unsealing and cleaning them.
///
/// Every operation works on a record loaded fresh from the workspace and
/// persists the record again when it changes it.
#[derive(Clone)]
pub struct NodeService {
    workspace: Workspace,
    inspector: Arc<dyn ProcessInspector>,
    launcher: Arc<dyn ProcessLauncher>,
    resolver: BinaryResolver,
    settings: DevbaoSettings,
}

impl NodeService {
    pub fn new(
        workspace: Workspace,
        inspector: Arc<dyn ProcessInspector>,
        launcher: Arc<dyn ProcessLauncher>,
        resolver: BinaryResolver,
        settings: DevbaoSettings,
    ) -> Self {
        Self {
            workspace,
            inspector,
            launcher,
            resolver,
            settings,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn settings(&self) -> &DevbaoSettings {
        &self.settings
    }

    /// Assembles, validates and persists a new node record.
    ///
    /// A record replaced under the same name hands over its process snapshot,
    /// so that a following [`start`](Self::start) stops the old server.
    pub async fn build(
        &self,
        name: &str,
        product: ProductType,
        options: Vec<ConfigOption>,
    ) -> DevbaoResult<Node> {
        validate_entity_name("name", name)?;
        let config = InstanceConfig::from_options(options)
            .with_context(|| format!("building configuration for node {name}"))?;
        let mut node = Node::new(name, product, config)?;

        if let Ok(previous) = self.workspace.read_node(name).await {
            node.exec = previous.exec;
        }

        self.save(&node).await?;
        info!(target: NODE_TARGET, node = %name, product = %product, "built node");
        Ok(node)
    }

    /// Loads, normalizes and validates a persisted node.
    pub async fn load(&self, name: &str) -> DevbaoResult<Node> {
        validate_entity_name("name", name)?;
        let mut node = self
            .workspace
            .read_node(name)
            .await
            .with_context(|| format!("loading node {name}"))?;
        node.normalize();
        node.validate()
            .with_context(|| format!("validating node {name}"))?;
        Ok(node)
    }

    pub async fn save(&self, node: &Node) -> DevbaoResult<()> {
        node.validate()?;
        self.workspace
            .write_node(node)
            .await
            .with_context(|| format!("saving node {}", node.name))
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.workspace.node_exists(name).await
    }

    pub async fn list(&self) -> DevbaoResult<Vec<NodeSummary>> {
        let mut summaries = Vec::new();
        for name in self.workspace.list_nodes().await? {
            let summary = match self.load(&name).await {
                Ok(node) => NodeSummary {
                    state: if self.is_running(&node) {
                        NodeState::Running
                    } else {
                        NodeState::Stopped
                    },
                    pid: node.pid(),
                    product: node.product,
                    cluster: node.cluster,
                    name,
                },
                Err(e) => {
                    warn!(target: NODE_TARGET, node = %name, error = %e, "unable to load node");
                    NodeSummary {
                        name,
                        product: ProductType::Auto,
                        state: NodeState::Unreadable,
                        pid: 0,
                        cluster: String::new(),
                    }
                }
            };
            summaries.push(summary);
        }
        Ok(summaries)
    }

    pub fn directory(&self, name: &str) -> PathBuf {
        self.workspace.node_dir(name)
    }

    /// Whether the tracked pid still belongs to this node's server binary.
    pub fn is_running(&self, node: &Node) -> bool {
        node.exec
            .as_ref()
            .is_some_and(|exec| process::validate_running(self.inspector.as_ref(), exec).is_ok())
    }

    /// API client for the node, authenticated with its stored token.
    pub fn client(&self, node: &Node) -> DevbaoResult<ApiClient> {
        let directory = self.directory(&node.name);
        let url = node.connect_url(&directory)?;
        let ca_path = node
            .connect_info(&directory)
            .ok()
            .and_then(|info| info.ca_path);
        ApiClient::new(&url, Some(&node.token), ca_path.as_deref())
            .with_context(|| format!("creating client for node {}", node.name))
    }

    /// Clean-room start: stops any tracked process, wipes the node directory
    /// and launches the server again from the persisted configuration.
    pub async fn start(&self, node: &mut Node) -> DevbaoResult<()> {
        if let Some(exec) = node.exec.take() {
            if let Err(e) =
                process::kill(self.inspector.as_ref(), &exec, self.settings.kill_grace).await
            {
                warn!(target: NODE_TARGET, node = %node.name, pid = exec.pid, error = %e, "unable to stop previous process");
            }
        }

        self.workspace.remove_node_dir(&node.name).await?;
        self.save(node).await?;
        self.launch(node).await
    }

    /// Starts the server again, keeping storage and credentials on disk.
    pub async fn resume(&self, node: &mut Node) -> DevbaoResult<ResumeOutcome> {
        if self.is_running(node) {
            return Err(DevbaoError::StateConflict(format!(
                "node {} is already running with pid {}",
                node.name,
                node.pid()
            )));
        }

        let mut outcome = ResumeOutcome::default();
        if node.is_dev() {
            let warning = format!(
                "node {} runs in dev mode: storage starts empty on every run, so stored tokens and unseal keys from earlier runs no longer apply",
                node.name
            );
            warn!(target: NODE_TARGET, node = %node.name, "resuming dev mode node");
            outcome.warnings.push(warning);
        }

        self.launch(node).await?;
        Ok(outcome)
    }

    async fn launch(&self, node: &mut Node) -> DevbaoResult<()> {
        let directory = self.directory(&node.name);
        self.workspace.ensure_dir(&directory).await?;

        let rendered = node
            .config
            .render(&directory, self.inspector.is_privileged())
            .with_context(|| format!("rendering configuration of node {}", node.name))?;
        self.workspace.materialize(&rendered).await?;

        let binary = self.resolver.resolve(node.product)?;
        let connect = node.config.connect_address(&directory)?;
        let mut exec = ExecEnvironment {
            binary,
            args: rendered.args,
            directory,
            connection_address: connect.address.to_string(),
            pid: 0,
        };

        exec.pid = self
            .launcher
            .launch(&exec, &self.workspace.node_log(&node.name))
            .await
            .with_context(|| format!("starting node {}", node.name))?;
        info!(target: NODE_TARGET, node = %node.name, pid = exec.pid, address = %exec.connection_address, "node running");

        node.exec = Some(exec);
        self.save(node).await
    }

    /// Stops the node's process and forgets the process snapshot.
    pub async fn kill(&self, node: &mut Node) -> DevbaoResult<()> {
        if let Some(exec) = &node.exec {
            process::kill(self.inspector.as_ref(), exec, self.settings.kill_grace)
                .await
                .with_context(|| format!("stopping node {}", node.name))?;
        }
        node.exec = None;
        self.save(node).await
    }

    /// Stops the node and deletes its directory.
    ///
    /// Cleaning a node that is already gone succeeds. With `force`, an
    /// unreadable record and a failed stop are reported as warnings, and
    /// cluster membership is ignored.
    pub async fn clean(&self, name: &str, force: bool) -> DevbaoResult<CleanOutcome> {
        validate_entity_name("name", name)?;
        let mut outcome = CleanOutcome::default();

        let node = match self.load(name).await {
            Ok(node) => Some(node),
            Err(e) if e.is_not_found() => None,
            Err(e) if force => {
                warn!(target: NODE_TARGET, node = %name, error = %e, "cleaning node with unreadable record");
                outcome
                    .warnings
                    .push(format!("ignoring unreadable record of node {name}: {e}"));
                Some(
                    self.workspace
                        .read_node(name)
                        .await
                        .unwrap_or_else(|_| Node::stub(name)),
                )
            }
            Err(e) => return Err(e),
        };

        if let Some(node) = &node {
            if !node.cluster.is_empty() && !force {
                return Err(DevbaoError::StateConflict(format!(
                    "node {name} is a member of cluster {}; remove it from the cluster first",
                    node.cluster
                )));
            }
            if let Some(exec) = &node.exec {
                if let Err(e) =
                    process::kill(self.inspector.as_ref(), exec, self.settings.kill_grace).await
                {
                    if !force {
                        return Err(e).with_context(|| format!("stopping node {name}"));
                    }
                    outcome
                        .warnings
                        .push(format!("unable to stop node {name}: {e}"));
                }
            }
        }

        outcome.removed = self.workspace.remove_node_dir(name).await?;
        info!(target: NODE_TARGET, node = %name, removed = outcome.removed, "cleaned node");
        Ok(outcome)
    }

    /// Initializes the server with 3 shares and a threshold of 2, storing the
    /// root token and key shares.
    ///
    /// Recovery shares are requested instead when a seal mechanism is
    /// configured.
    pub async fn initialize(&self, node: &mut Node) -> DevbaoResult<()> {
        let client = self.client(node)?;
        let initialized = client
            .init_status()
            .await
            .context("reading initialization status")?;
        if initialized {
            return Err(DevbaoError::StateConflict(format!(
                "node {} is already initialized",
                node.name
            )));
        }
        if node.has_credentials() {
            return Err(DevbaoError::StateConflict(format!(
                "refusing to overwrite existing token or unseal keys of node {}",
                node.name
            )));
        }

        let request = if node.config.seals.is_empty() {
            InitRequest {
                secret_shares: Some(INIT_SHARES),
                secret_threshold: Some(INIT_THRESHOLD),
                ..InitRequest::default()
            }
        } else {
            InitRequest {
                recovery_shares: Some(INIT_SHARES),
                recovery_threshold: Some(INIT_THRESHOLD),
                ..InitRequest::default()
            }
        };

        let response = client
            .init(&request)
            .await
            .with_context(|| format!("initializing node {}", node.name))?;
        if !response.keys_base64.is_empty() && !response.recovery_keys_base64.is_empty() {
            return Err(DevbaoError::Api {
                path: "sys/init".into(),
                status: 200,
                message: "response carried both unseal keys and recovery keys".into(),
            });
        }

        node.unseal_keys = if response.keys_base64.is_empty() {
            response.recovery_keys_base64
        } else {
            response.keys_base64
        };
        node.token = response.root_token;
        info!(target: NODE_TARGET, node = %node.name, keys = node.unseal_keys.len(), "initialized node");
        self.save(node).await
    }

    /// Submits stored key shares until the server reports unsealed.
    ///
    /// Returns `false` when the node was already unsealed before any share
    /// was submitted.
    pub async fn unseal(&self, node: &Node) -> DevbaoResult<bool> {
        if node.unseal_keys.is_empty() {
            return Err(DevbaoError::StateConflict(format!(
                "no unseal keys stored for node {}",
                node.name
            )));
        }

        let client = self.client(node)?;
        for (index, key) in node.unseal_keys.iter().enumerate() {
            let status = client
                .seal_status()
                .await
                .context("fetching seal status")?;
            if !status.sealed {
                if index == 0 {
                    return Ok(false);
                }
                break;
            }
            client
                .unseal(key)
                .await
                .with_context(|| format!("submitting unseal key {index} to node {}", node.name))?;
            debug!(target: NODE_TARGET, node = %node.name, index, "submitted unseal key");
        }
        Ok(true)
    }

    /// Waits with backoff until the node reports itself unsealed.
    pub async fn wait_until_unsealed(&self, node: &Node) -> DevbaoResult<()> {
        let client = &self.client(node)?;
        poll_until(
            &self.settings.stabilize,
            &format!("node {} to unseal", node.name),
            || async move {
                let status = client.seal_status().await?;
                Ok::<_, DevbaoError>(if status.sealed {
                    Probe::Pending(format!(
                        "sealed, unseal progress {}/{}",
                        status.progress, status.t
                    ))
                } else {
                    Probe::Ready(())
                })
            },
        )
        .await
    }

    /// Waits with backoff until the node answers API requests.
    pub async fn wait_until_responsive(&self, node: &Node) -> DevbaoResult<()> {
        let client = &self.client(node)?;
        poll_until(
            &self.settings.stabilize,
            &format!("node {} to respond", node.name),
            || async move {
                client.seal_status().await?;
                Ok::<_, DevbaoError>(Probe::Ready(()))
            },
        )
        .await
    }

    pub async fn seal(&self, node: &Node) -> DevbaoResult<()> {
        self.client(node)?
            .seal()
            .await
            .with_context(|| format!("sealing node {}", node.name))
    }

    /// Stores a new token, checking it against the server first when the
    /// node is running. Returns whether the check happened.
    pub async fn set_token(&self, node: &mut Node, token: &str) -> DevbaoResult<bool> {
        let validated = if self.is_running(node) {
            self.client(node)?
                .with_token(token)
                .list_mounts()
                .await
                .context("token validation failed")?;
            true
        } else {
            false
        };

        node.token = token.to_string();
        self.save(node).await?;
        Ok(validated)
    }

    /// Stores an address override; an empty address clears it.
    /// Returns whether it was checked against the running server.
    pub async fn set_address(&self, node: &mut Node, address: &str) -> DevbaoResult<bool> {
        if !address.is_empty() {
            Url::parse(address).map_err(|e| {
                ValidationError::field("addr", format!("invalid address {address:?}: {e}"))
            })?;
        }
        node.address = address.to_string();

        let validated = if self.is_running(node) {
            self.client(node)?
                .init_status()
                .await
                .context("address validation failed")?;
            true
        } else {
            false
        };

        self.save(node).await?;
        Ok(validated)
    }

    /// Replaces the stored key shares. They cannot be checked without
    /// sealing the node, so they are stored as given.
    pub async fn set_unseal_keys(&self, node: &mut Node, keys: Vec<String>) -> DevbaoResult<()> {
        node.unseal_keys = keys;
        self.save(node).await
    }

    /// Enables the node's audit devices that the server does not list yet.
    ///
    /// Returns the names of the devices it enabled.
    pub async fn post_unseal(&self, node: &Node) -> DevbaoResult<Vec<String>> {
        if node.config.audits.is_empty() {
            return Ok(Vec::new());
        }

        let client = self.client(node)?;
        let directory = self.directory(&node.name);
        let existing = client
            .list_audit()
            .await
            .context("listing audit devices")?;

        let mut enabled = Vec::new();
        for audit in &node.config.audits {
            let name = audit.device_name();
            if existing.contains_key(&format!("{name}/")) {
                continue;
            }
            let input = AuditInput {
                audit_type: audit.device_type().to_string(),
                options: audit.options(&directory),
            };
            client
                .enable_audit(&name, &input)
                .await
                .with_context(|| format!("enabling audit device {name}"))?;
            info!(target: NODE_TARGET, node = %node.name, device = %name, "enabled audit device");
            enabled.push(name);
        }
        Ok(enabled)
    }

    /// Environment a CLI client needs to reach the node.
    pub fn env(&self, node: &Node) -> DevbaoResult<BTreeMap<String, String>> {
        Ok(node.env(&self.directory(&node.name))?)
    }

    /// Last `lines` lines of the server log, or of the audit log.
    pub async fn logs(&self, node: &Node, audit: bool, lines: usize) -> DevbaoResult<String> {
        let path = if audit {
            let directory = self.directory(&node.name);
            node.config
                .audits
                .first()
                .map(|a| a.log_path(&directory))
                .unwrap_or_else(|| Audit::file().log_path(&directory))
        } else {
            self.workspace.node_log(&node.name)
        };
        process::read_log_lines(&path, lines).await
    }
}
