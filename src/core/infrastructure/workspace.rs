//! On-disk state store rooted at an explicit base directory.
//!
//! Layout:
//! ```text
//! <root>/nodes/<name>/node.json
//! <root>/clusters/<name>/cluster.json
//! ```
//! Documents are rewritten whole through a temporary file and a rename, so a
//! reader never observes a half-written record. There is no locking: one
//! operator at a time is assumed.

use crate::core::domain::{
    error::{DevbaoError, DevbaoResult, EntityKind},
    model::{cluster::Cluster, instance_config::RenderedConfig, node::Node},
};
use serde::{Serialize, de::DeserializeOwned};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

pub const NODES_DIR: &str = "nodes";
pub const CLUSTERS_DIR: &str = "clusters";
pub const NODE_FILE: &str = "node.json";
pub const CLUSTER_FILE: &str = "cluster.json";
pub const SERVICE_LOG: &str = "service.log";

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn node_dir(&self, name: &str) -> PathBuf {
        self.root.join(NODES_DIR).join(name)
    }

    pub fn node_log(&self, name: &str) -> PathBuf {
        self.node_dir(name).join(SERVICE_LOG)
    }

    pub fn cluster_dir(&self, name: &str) -> PathBuf {
        self.root.join(CLUSTERS_DIR).join(name)
    }

    fn document(&self, kind: EntityKind, name: &str) -> PathBuf {
        match kind {
            EntityKind::Node => self.node_dir(name).join(NODE_FILE),
            EntityKind::Cluster => self.cluster_dir(name).join(CLUSTER_FILE),
        }
    }

    fn entity_dir(&self, kind: EntityKind, name: &str) -> PathBuf {
        match kind {
            EntityKind::Node => self.node_dir(name),
            EntityKind::Cluster => self.cluster_dir(name),
        }
    }

    pub async fn node_exists(&self, name: &str) -> bool {
        fs::try_exists(self.document(EntityKind::Node, name))
            .await
            .unwrap_or(false)
    }

    pub async fn cluster_exists(&self, name: &str) -> bool {
        fs::try_exists(self.document(EntityKind::Cluster, name))
            .await
            .unwrap_or(false)
    }

    /// Reads a node record as stored, without normalizing or validating it.
    pub async fn read_node(&self, name: &str) -> DevbaoResult<Node> {
        self.read_document(EntityKind::Node, name).await
    }

    pub async fn write_node(&self, node: &Node) -> DevbaoResult<()> {
        self.write_document(EntityKind::Node, &node.name, node).await
    }

    pub async fn read_cluster(&self, name: &str) -> DevbaoResult<Cluster> {
        self.read_document(EntityKind::Cluster, name).await
    }

    pub async fn write_cluster(&self, cluster: &Cluster) -> DevbaoResult<()> {
        self.write_document(EntityKind::Cluster, &cluster.name, cluster)
            .await
    }

    /// Names of all persisted nodes, sorted.
    pub async fn list_nodes(&self) -> DevbaoResult<Vec<String>> {
        self.list(EntityKind::Node, NODES_DIR).await
    }

    /// Names of all persisted clusters, sorted.
    pub async fn list_clusters(&self) -> DevbaoResult<Vec<String>> {
        self.list(EntityKind::Cluster, CLUSTERS_DIR).await
    }

    /// Removes the node's whole directory. Returns `false` if it was already gone.
    pub async fn remove_node_dir(&self, name: &str) -> DevbaoResult<bool> {
        self.remove_dir(&self.entity_dir(EntityKind::Node, name))
            .await
    }

    pub async fn remove_cluster_dir(&self, name: &str) -> DevbaoResult<bool> {
        self.remove_dir(&self.entity_dir(EntityKind::Cluster, name))
            .await
    }

    pub async fn ensure_dir(&self, path: &Path) -> DevbaoResult<()> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| DevbaoError::io(path, e))
    }

    /// Creates the directories and writes the files a rendered configuration needs.
    pub async fn materialize(&self, rendered: &RenderedConfig) -> DevbaoResult<()> {
        for dir in &rendered.directories {
            self.ensure_dir(dir).await?;
        }
        for file in &rendered.files {
            if let Some(parent) = file.path.parent() {
                self.ensure_dir(parent).await?;
            }
            fs::write(&file.path, &file.contents)
                .await
                .map_err(|e| DevbaoError::io(&file.path, e))?;
        }
        Ok(())
    }

    async fn read_document<T: DeserializeOwned>(
        &self,
        kind: EntityKind,
        name: &str,
    ) -> DevbaoResult<T> {
        let path = self.document(kind, name);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DevbaoError::NotFound {
                    kind,
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(DevbaoError::io(&path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|source| DevbaoError::Serialization {
            context: format!("{kind} {name} from {}", path.display()),
            source,
        })
    }

    async fn write_document<T: Serialize>(
        &self,
        kind: EntityKind,
        name: &str,
        value: &T,
    ) -> DevbaoResult<()> {
        let dir = self.entity_dir(kind, name);
        self.ensure_dir(&dir).await?;

        let path = self.document(kind, name);
        let bytes =
            serde_json::to_vec_pretty(value).map_err(|source| DevbaoError::Serialization {
                context: format!("{kind} {name}"),
                source,
            })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| DevbaoError::io(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| DevbaoError::io(&path, e))?;
        debug!(target: "devbao::workspace", %kind, name, path = %path.display(), "saved record");
        Ok(())
    }

    async fn list(&self, kind: EntityKind, subdir: &str) -> DevbaoResult<Vec<String>> {
        let dir = self.root.join(subdir);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DevbaoError::io(&dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DevbaoError::io(&dir, e))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if fs::try_exists(self.document(kind, &name))
                .await
                .unwrap_or(false)
            {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn remove_dir(&self, dir: &Path) -> DevbaoResult<bool> {
        match fs::remove_dir_all(dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DevbaoError::io(dir, e)),
        }
    }
}
