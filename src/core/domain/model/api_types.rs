//! Request and response shapes of the server's administrative API.
//!
//! Only the fields devbao relies on are modeled; everything else the server
//! returns is ignored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Envelope used by logical endpoints, which nest their payload under `data`.
#[derive(Debug, Clone, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: T,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

/// Generic logical response: arbitrary data plus warnings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SecretResponse {
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitStatusResponse {
    pub initialized: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InitRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_shares: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_shares: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_threshold: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitResponse {
    #[serde(default)]
    pub keys_base64: Vec<String>,
    #[serde(default)]
    pub recovery_keys_base64: Vec<String>,
    pub root_token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SealStatusResponse {
    pub sealed: bool,
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub t: u32,
    #[serde(default)]
    pub n: u32,
    #[serde(default)]
    pub progress: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnsealRequest<'a> {
    pub key: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeaderResponse {
    #[serde(default)]
    pub ha_enabled: bool,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub leader_address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RaftJoinRequest {
    pub leader_api_addr: String,
    pub retry: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader_ca_cert: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RaftJoinResponse {
    #[serde(default)]
    pub joined: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HaStatus {
    #[serde(default)]
    pub nodes: Vec<HaNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HaNode {
    #[serde(default)]
    pub hostname: String,
    pub api_address: String,
    pub cluster_address: String,
    #[serde(default)]
    pub active_node: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RaftConfigurationResponse {
    pub config: RaftConfiguration,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RaftConfiguration {
    #[serde(default)]
    pub servers: Vec<RaftServer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RaftServer {
    pub node_id: String,
    pub address: String,
    #[serde(default)]
    pub leader: bool,
    #[serde(default)]
    pub voter: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RaftRemovePeerRequest<'a> {
    pub server_id: &'a str,
}

/// Body of `sys/mounts/<path>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MountInput {
    #[serde(rename = "type")]
    pub mount_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "MountConfig::is_empty")]
    pub config: MountConfig,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl MountInput {
    pub fn new(mount_type: impl Into<String>) -> Self {
        Self {
            mount_type: mount_type.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MountConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_lease_ttl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_lease_ttl: Option<String>,
}

impl MountConfig {
    fn is_empty(&self) -> bool {
        self.max_lease_ttl.is_none() && self.default_lease_ttl.is_none()
    }
}

/// Body of `sys/auth/<path>`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthInput<'a> {
    #[serde(rename = "type")]
    pub auth_type: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub description: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyRequest<'a> {
    pub policy: &'a str,
}

/// Body of `sys/audit/<path>`.
#[derive(Debug, Clone, Serialize)]
pub struct AuditInput {
    #[serde(rename = "type")]
    pub audit_type: String,
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditDevice {
    #[serde(rename = "type", default)]
    pub audit_type: String,
    #[serde(default)]
    pub path: String,
}
