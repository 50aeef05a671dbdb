//! Shared fixtures: a temporary workspace, mocked processes and fast timings.

use crate::{
    cluster::application::service::cluster_service::ClusterService,
    core::{
        domain::{
            model::{
                exec_environment::ExecEnvironment,
                instance_config::ConfigOption,
                listener::Listener,
                node::Node,
                seal::Seal,
                settings::{BackoffSettings, DevbaoSettings, ReadinessSettings},
                storage::Storage,
            },
            value_object::ProductType,
        },
        infrastructure::{
            process::{BinaryResolver, MockProcessInspector, MockProcessLauncher},
            workspace::Workspace,
        },
    },
    lifecycle::application::service::node_service::NodeService,
};
use std::collections::HashMap;
use std::io::{Error, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::MockServer;

pub(crate) const FAKE_PID: u32 = 4242;
pub(crate) const FAKE_BINARY: &str = "/usr/bin/bao";

pub(crate) struct Harness {
    _root: TempDir,
    pub workspace: Workspace,
    pub nodes: NodeService,
    pub clusters: ClusterService,
}

impl Harness {
    /// Every tracked pid looks dead; launches succeed with [`FAKE_PID`].
    pub fn stopped() -> Self {
        Self::with_inspector(|_| Err(Error::new(ErrorKind::NotFound, "no such process")))
    }

    /// Every tracked pid looks like a live server.
    pub fn running() -> Self {
        Self::with_inspector(|_| Ok(PathBuf::from(FAKE_BINARY)))
    }

    fn with_inspector<F>(executable: F) -> Self
    where
        F: Fn(u32) -> std::io::Result<PathBuf> + Send + Sync + 'static,
    {
        let root = TempDir::new().unwrap();
        let workspace = Workspace::new(root.path());

        let mut inspector = MockProcessInspector::new();
        inspector.expect_executable().returning(executable);
        inspector.expect_signal().returning(|_, _| Ok(()));
        inspector.expect_is_privileged().return_const(false);

        let mut launcher = MockProcessLauncher::new();
        launcher.expect_launch().returning(|_, _| Ok(FAKE_PID));

        let nodes = NodeService::new(
            workspace.clone(),
            Arc::new(inspector),
            Arc::new(launcher),
            resolver(),
            fast_settings(),
        );
        Self {
            _root: root,
            workspace,
            clusters: ClusterService::new(nodes.clone()),
            nodes,
        }
    }

    /// Builds and persists a raft node listening on the mock server's address.
    pub async fn production_node(&self, name: &str, server: &MockServer, seals: Vec<Seal>) -> Node {
        let mut options = vec![
            ConfigOption::Listener(Listener::tcp(listen_address(server))),
            ConfigOption::Storage(Storage::Raft),
        ];
        options.extend(seals.into_iter().map(ConfigOption::Seal));
        self.nodes
            .build(name, ProductType::OpenBao, options)
            .await
            .unwrap()
    }
}

pub(crate) fn resolver() -> BinaryResolver {
    let overrides = ["openbao", "bao", "vault"]
        .into_iter()
        .map(|name| (name.to_string(), PathBuf::from(FAKE_BINARY)))
        .collect::<HashMap<_, _>>();
    BinaryResolver::new(overrides, Vec::new())
}

pub(crate) fn fast_settings() -> DevbaoSettings {
    DevbaoSettings {
        readiness: ReadinessSettings {
            grace: Duration::ZERO,
            interval: Duration::from_millis(10),
            timeout: Duration::from_millis(200),
        },
        stabilize: BackoffSettings {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(20),
            budget: Duration::from_millis(300),
        },
        kill_grace: Duration::from_millis(10),
    }
}

/// `host:port` of a mock server, usable as a tcp listener address.
pub(crate) fn listen_address(server: &MockServer) -> String {
    server.address().to_string()
}

/// A process snapshot that the running harness accepts as alive.
pub(crate) fn exec_for(node: &Node) -> ExecEnvironment {
    ExecEnvironment {
        binary: PathBuf::from(FAKE_BINARY),
        args: Vec::new(),
        directory: PathBuf::from(format!("/nodes/{}", node.name)),
        connection_address: node
            .config
            .listeners
            .iter()
            .find_map(|l| match l {
                Listener::Tcp(tcp) => Some(tcp.address.clone()),
                Listener::Unix(_) => None,
            })
            .unwrap_or_default(),
        pid: FAKE_PID,
    }
}
