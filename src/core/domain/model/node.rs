//! Persisted record of a managed server instance.

use crate::core::domain::{
    error::{DevbaoResult, ValidationError},
    model::{
        exec_environment::ExecEnvironment,
        instance_config::{ConnectInfo, InstanceConfig},
    },
    value_object::{ProductType, validate_entity_name},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const ENV_ADDR: &str = "VAULT_ADDR";
pub const ENV_TOKEN: &str = "VAULT_TOKEN";
pub const ENV_CACERT: &str = "VAULT_CACERT";

/// One managed server instance: its configuration, the snapshot of the
/// running process, credentials and cluster membership.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(rename = "type", default)]
    pub product: ProductType,
    #[serde(default)]
    pub exec: Option<ExecEnvironment>,
    #[serde(default)]
    pub config: InstanceConfig,
    /// Explicit API URL overriding the listener-derived one.
    #[serde(rename = "addr", default)]
    pub address: String,
    #[serde(default)]
    pub token: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unseal_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster: String,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        product: ProductType,
        config: InstanceConfig,
    ) -> DevbaoResult<Self> {
        let mut node = Self {
            name: name.into(),
            product,
            config,
            ..Self::default()
        };
        node.normalize();
        node.validate()?;
        Ok(node)
    }

    /// Minimal record carrying only a name, used to clean up nodes whose
    /// persisted record cannot be read.
    pub fn stub(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Fills derived fields: a dev node without a token uses its dev root token.
    pub fn normalize(&mut self) {
        if let Some(dev) = &self.config.dev {
            if self.token.is_empty() && !dev.token.is_empty() {
                self.token = dev.token.clone();
            }
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_entity_name("name", &self.name)?;
        for (index, key) in self.unseal_keys.iter().enumerate() {
            if key.trim().is_empty() {
                return Err(ValidationError::field(
                    format!("unseal_keys[{index}]"),
                    "unseal key must not be empty",
                ));
            }
        }
        if self.is_dev() && !self.cluster.is_empty() {
            return Err(ValidationError::ConstraintViolation(format!(
                "dev mode node {} cannot be a member of cluster {}",
                self.name, self.cluster
            )));
        }
        if !self.cluster.is_empty() {
            validate_entity_name("cluster", &self.cluster)?;
        }
        self.config.validate()?;
        self.config.validate_contents()
    }

    pub fn is_dev(&self) -> bool {
        self.config.is_dev()
    }

    /// Returns `true` if any credential has been stored locally.
    pub fn has_credentials(&self) -> bool {
        !self.token.is_empty() || !self.unseal_keys.is_empty()
    }

    /// Tracked process id, `0` when none.
    pub fn pid(&self) -> u32 {
        self.exec.as_ref().map(|e| e.pid).unwrap_or(0)
    }

    pub fn connect_info(&self, directory: &Path) -> Result<ConnectInfo, ValidationError> {
        self.config.connect_address(directory)
    }

    /// API URL clients use, honoring the address override.
    pub fn connect_url(&self, directory: &Path) -> Result<String, ValidationError> {
        if !self.address.is_empty() {
            return Ok(self.address.clone());
        }
        Ok(self.connect_info(directory)?.url())
    }

    /// Environment a CLI client needs to talk to this node.
    pub fn env(&self, directory: &Path) -> Result<BTreeMap<String, String>, ValidationError> {
        let mut env = BTreeMap::new();
        env.insert(ENV_ADDR.to_string(), self.connect_url(directory)?);
        env.insert(ENV_TOKEN.to_string(), self.token.clone());
        if let Ok(ConnectInfo {
            ca_path: Some(ca), ..
        }) = self.connect_info(directory)
        {
            env.insert(ENV_CACERT.to_string(), ca.display().to_string());
        }
        Ok(env)
    }
}
