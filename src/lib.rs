pub mod cluster;
pub mod core;
pub mod lifecycle;
pub mod profile;

#[cfg(test)]
mod tests;

pub use crate::core::domain::error::{DevbaoError, DevbaoResult, ValidationError};
pub use crate::core::domain::model::{
    cluster::Cluster, instance_config::ConfigOption, node::Node, profile::Profile,
    settings::DevbaoSettings,
};
pub use crate::core::domain::value_object::ProductType;
use crate::{
    cluster::application::service::cluster_service::ClusterService,
    core::infrastructure::{
        process::{
            BinaryResolver, ProcessInspector, ProcessLauncher, SystemInspector, SystemLauncher,
        },
        workspace::Workspace,
    },
    lifecycle::application::service::node_service::NodeService,
    profile::application::service::profile_service::ProfileService,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Directory name used under the platform data directory.
pub const APP_DIR: &str = "devbao";

/// Entry point for managing local development servers and clusters.
///
/// The client owns no state besides the workspace root: every operation
/// loads its records fresh from disk and writes them back when they change.
///
/// # Examples
///
/// ```no_run
/// use devbao::{ConfigOption, DevbaoClient, DevbaoResult, ProductType};
/// use devbao::core::domain::model::instance_config::DevConfig;
///
/// #[tokio::main]
/// async fn main() -> DevbaoResult<()> {
///     let client = DevbaoClient::builder().base_directory("/tmp/devbao").build()?;
///
///     let dev = DevConfig {
///         token: "devroot".into(),
///         address: "127.0.0.1:8200".into(),
///         tls: false,
///     };
///     let mut node = client
///         .nodes()
///         .build("dev", ProductType::Auto, vec![ConfigOption::Dev(dev)])
///         .await?;
///     client.nodes().start(&mut node).await?;
///     println!("{:?}", client.nodes().env(&node)?);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct DevbaoClient {
    nodes: NodeService,
    clusters: ClusterService,
    profiles: ProfileService,
}

/// Builder for DevbaoClient configuration
#[derive(Default)]
pub struct DevbaoClientBuilder {
    base_directory: Option<PathBuf>,
    settings: DevbaoSettings,
    resolver: Option<BinaryResolver>,
    inspector: Option<Arc<dyn ProcessInspector>>,
    launcher: Option<Arc<dyn ProcessLauncher>>,
}

impl DevbaoClientBuilder {
    /// Root of all persisted state. Defaults to `<data dir>/devbao`.
    pub fn base_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.base_directory = Some(directory.into());
        self
    }

    pub fn settings(mut self, settings: DevbaoSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Overrides binary resolution. Defaults to a snapshot of the environment.
    pub fn resolver(mut self, resolver: BinaryResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn inspector(mut self, inspector: Arc<dyn ProcessInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn build(self) -> DevbaoResult<DevbaoClient> {
        let root = match self.base_directory {
            Some(root) => root,
            None => dirs::data_local_dir()
                .map(|dir| dir.join(APP_DIR))
                .ok_or_else(|| {
                    ValidationError::field(
                        "base_directory",
                        "no platform data directory available; pass one explicitly",
                    )
                })?,
        };
        debug!(target: "devbao", root = %root.display(), "using workspace");

        let inspector = self
            .inspector
            .unwrap_or_else(|| Arc::new(SystemInspector));
        let launcher = self
            .launcher
            .unwrap_or_else(|| Arc::new(SystemLauncher::new(self.settings.readiness.clone())));
        let resolver = self.resolver.unwrap_or_else(BinaryResolver::from_env);

        let nodes = NodeService::new(
            Workspace::new(root),
            inspector,
            launcher,
            resolver,
            self.settings,
        );
        Ok(DevbaoClient {
            clusters: ClusterService::new(nodes.clone()),
            profiles: ProfileService::new(),
            nodes,
        })
    }
}

impl DevbaoClient {
    /// Creates a new builder for DevbaoClient configuration
    pub fn builder() -> DevbaoClientBuilder {
        DevbaoClientBuilder::default()
    }

    pub fn nodes(&self) -> &NodeService {
        &self.nodes
    }

    pub fn clusters(&self) -> &ClusterService {
        &self.clusters
    }

    pub fn profiles(&self) -> &ProfileService {
        &self.profiles
    }

    /// Applies `profile` to a node through its stored address and token.
    ///
    /// Returns the warnings the server produced along the way.
    pub async fn apply_profile(&self, node: &Node, profile: Profile) -> DevbaoResult<Vec<String>> {
        let client = self.nodes.client(node)?;
        self.profiles.setup(&client, profile).await
    }

    /// Reverts [`apply_profile`](Self::apply_profile).
    pub async fn remove_profile(&self, node: &Node, profile: Profile) -> DevbaoResult<Vec<String>> {
        let client = self.nodes.client(node)?;
        self.profiles.remove(&client, profile).await
    }
}
