//! Auto-unseal mechanisms.

use crate::core::domain::{error::ValidationError, model::instance_config::hcl_string};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use url::Url;

const STATIC_KEY_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Seal {
    /// Wraps the root key with a key held by another server's transit engine.
    Transit(TransitSeal),
    /// Wraps the root key with a fixed local key.
    Static(StaticSeal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitSeal {
    pub address: String,
    pub token: String,
    pub mount_path: String,
    pub key_name: String,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticSeal {
    pub current_key_id: String,
    /// Hex-encoded 32 byte key.
    pub current_key: String,
}

impl StaticSeal {
    /// Wraps a hex key; the key id is a fingerprint of the key so that two
    /// seals with the same id always share the same key.
    pub fn new(current_key: impl Into<String>) -> Result<Self, ValidationError> {
        let current_key = current_key.into();
        let bytes = hex::decode(&current_key)
            .map_err(|e| ValidationError::field("seal", format!("static key is not hex: {e}")))?;
        if bytes.len() != STATIC_KEY_BYTES {
            return Err(ValidationError::field(
                "seal",
                format!("static key must be {STATIC_KEY_BYTES} bytes, got {}", bytes.len()),
            ));
        }
        let digest = Sha256::digest(&bytes);
        let current_key_id = format!("devbao-{}", hex::encode(&digest[..8]));
        Ok(Self {
            current_key_id,
            current_key,
        })
    }

    /// Generates a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; STATIC_KEY_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        let digest = Sha256::digest(bytes);
        Self {
            current_key_id: format!("devbao-{}", hex::encode(&digest[..8])),
            current_key: hex::encode(bytes),
        }
    }
}

impl Seal {
    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Seal::Transit(t) => {
                if t.address.is_empty() || t.mount_path.is_empty() || t.key_name.is_empty() {
                    return Err(ValidationError::field(
                        "seal",
                        "transit seal requires address, mount path and key name",
                    ));
                }
                Ok(())
            }
            Seal::Static(s) => {
                if s.current_key_id.is_empty() || s.current_key.is_empty() {
                    return Err(ValidationError::field(
                        "seal",
                        "static seal requires a key id and key",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Configuration identity used when comparing seals across nodes.
    ///
    /// Never includes tokens or key material.
    pub fn identity(&self) -> String {
        match self {
            Seal::Transit(t) => format!(
                "transit address={} mount_path={} key_name={} disabled={}",
                t.address, t.mount_path, t.key_name, t.disabled
            ),
            Seal::Static(s) => format!("static current_key_id={}", s.current_key_id),
        }
    }

    pub(crate) fn render(&self) -> String {
        match self {
            Seal::Transit(t) => format!(
                "seal \"transit\" {{\n  address = {}\n  token = {}\n  mount_path = {}\n  key_name = {}\n  disabled = {}\n}}\n",
                hcl_string(&t.address),
                hcl_string(&t.token),
                hcl_string(&t.mount_path),
                hcl_string(&t.key_name),
                t.disabled
            ),
            Seal::Static(s) => format!(
                "seal \"static\" {{\n  current_key_id = {}\n  current_key = {}\n}}\n",
                hcl_string(&s.current_key_id),
                hcl_string(&s.current_key)
            ),
        }
    }
}

impl FromStr for Seal {
    type Err = ValidationError;

    /// Parses `static://[<hex key>]` or
    /// `http(s)://<token>@<host:port>/<mount>/keys/<key name>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(key) = s.strip_prefix("static://") {
            let key = key.trim_end_matches('/');
            return if key.is_empty() {
                Ok(Seal::Static(StaticSeal::generate()))
            } else {
                Ok(Seal::Static(StaticSeal::new(key)?))
            };
        }

        let url = Url::parse(s)
            .map_err(|e| ValidationError::Format(format!("invalid seal uri {s:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ValidationError::Format(format!(
                "unknown seal scheme {:?}; expected static, http or https",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ValidationError::Format(format!("seal uri {s:?} has no host")))?;
        let address = match url.port() {
            Some(port) => format!("{}://{host}:{port}", url.scheme()),
            None => format!("{}://{host}", url.scheme()),
        };
        let path = url.path().trim_matches('/');
        let (mount_path, key_name) = path.split_once("/keys/").ok_or_else(|| {
            ValidationError::Format(format!(
                "seal uri {s:?} must have the form <mount>/keys/<key name>"
            ))
        })?;

        let seal = Seal::Transit(TransitSeal {
            address,
            token: url.username().to_string(),
            mount_path: mount_path.to_string(),
            key_name: key_name.to_string(),
            disabled: false,
        });
        seal.validate()?;
        Ok(seal)
    }
}
