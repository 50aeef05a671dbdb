//! Storage backends a production node can persist to.

use crate::core::domain::{error::ValidationError, model::instance_config::hcl_string};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Storage {
    /// Integrated Raft storage; required for HA clusters.
    Raft,
    File,
    Inmem,
    Postgresql(PostgresqlStorage),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresqlStorage {
    /// When absent the server reads its connection string from the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_url: Option<String>,
}

impl Storage {
    /// Returns `true` for backends that form a Raft cluster and need `cluster_addr`.
    pub fn is_clustered(&self) -> bool {
        matches!(self, Storage::Raft)
    }

    /// Data directory the backend writes under, if any.
    pub fn data_directory(&self, directory: &Path) -> Option<PathBuf> {
        match self {
            Storage::Raft => Some(directory.join("storage").join("raft")),
            Storage::File => Some(directory.join("storage").join("file")),
            Storage::Inmem | Storage::Postgresql(_) => None,
        }
    }

    pub(crate) fn render(&self, directory: &Path) -> String {
        let path = self
            .data_directory(directory)
            .map(|p| format!("  path = {}\n", hcl_string(&p.display().to_string())))
            .unwrap_or_default();
        match self {
            Storage::Raft => format!("storage \"raft\" {{\n{path}}}\n"),
            Storage::File => format!("storage \"file\" {{\n{path}}}\n"),
            Storage::Inmem => "storage \"inmem\" {}\n".to_string(),
            Storage::Postgresql(pg) => match &pg.connection_url {
                Some(url) => format!(
                    "storage \"postgresql\" {{\n  connection_url = {}\n}}\n",
                    hcl_string(url)
                ),
                None => "storage \"postgresql\" {}\n".to_string(),
            },
        }
    }
}

impl FromStr for Storage {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raft" => Ok(Storage::Raft),
            "file" => Ok(Storage::File),
            "inmem" | "memory" => Ok(Storage::Inmem),
            "postgresql" | "postgres" => Ok(Storage::Postgresql(PostgresqlStorage::default())),
            other => Err(ValidationError::field(
                "storage",
                format!("unknown storage backend {other:?}; expected raft, file, inmem or postgresql"),
            )),
        }
    }
}
