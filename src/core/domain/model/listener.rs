//! Listener definitions for production server configuration.

use crate::core::domain::{
    error::ValidationError,
    model::instance_config::{RenderedFile, hcl_string},
    value_object::BindAddress,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

pub const FULLCHAIN_FILE: &str = "fullchain.pem";
pub const LEAF_KEY_FILE: &str = "leaf-key.pem";
pub const CA_FILE: &str = "ca.pem";

/// A network or socket listener the server accepts API requests on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// A TCP listener, optionally serving TLS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpListener {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsMaterial>,
}

/// PEM-encoded certificate chain (leaf first, issuing CA last) and leaf key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsMaterial {
    pub cert_chain: Vec<String>,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnixListener {
    pub path: String,
}

impl Listener {
    pub fn tcp(address: impl Into<String>) -> Self {
        Listener::Tcp(TcpListener {
            address: address.into(),
            tls: None,
        })
    }

    pub fn unix(path: impl Into<String>) -> Self {
        Listener::Unix(UnixListener { path: path.into() })
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Listener::Tcp(tcp) => {
                tcp.bind_address()?;
                if let Some(tls) = &tcp.tls {
                    tls.validate()?;
                }
                Ok(())
            }
            Listener::Unix(unix) if unix.path.is_empty() => Err(ValidationError::field(
                "listener",
                "unix listener requires a socket path",
            )),
            Listener::Unix(_) => Ok(()),
        }
    }

    /// Emits the listener stanza and any TLS files it references.
    pub(crate) fn render(
        &self,
        directory: &Path,
        files: &mut Vec<RenderedFile>,
    ) -> Result<String, ValidationError> {
        match self {
            Listener::Unix(unix) => Ok(format!(
                "listener \"unix\" {{\n  path = {}\n}}\n",
                hcl_string(&unix.path)
            )),
            Listener::Tcp(tcp) => {
                let mut block = format!(
                    "listener \"tcp\" {{\n  address = {}\n",
                    hcl_string(&tcp.address)
                );
                match &tcp.tls {
                    None => block.push_str("  tls_disable = true\n"),
                    Some(tls) => {
                        let cert = directory.join(FULLCHAIN_FILE);
                        let key = directory.join(LEAF_KEY_FILE);
                        files.extend(tls.files(directory)?);
                        block.push_str(&format!(
                            "  tls_cert_file = {}\n  tls_key_file = {}\n",
                            hcl_string(&cert.display().to_string()),
                            hcl_string(&key.display().to_string())
                        ));
                    }
                }
                block.push_str("}\n");
                Ok(block)
            }
        }
    }
}

impl TcpListener {
    pub fn bind_address(&self) -> Result<BindAddress, ValidationError> {
        self.address.parse()
    }
}

impl TlsMaterial {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.cert_chain.is_empty() {
            return Err(ValidationError::field(
                "tls",
                "certificate chain must contain at least one certificate",
            ));
        }
        if self.key.trim().is_empty() {
            return Err(ValidationError::field("tls", "leaf key must not be empty"));
        }
        Ok(())
    }

    /// Full chain, issuing CA and leaf key, in that order.
    fn files(&self, directory: &Path) -> Result<Vec<RenderedFile>, ValidationError> {
        self.validate()?;
        let ca = self.cert_chain.last().cloned().unwrap_or_default();
        Ok(vec![
            RenderedFile::new(directory.join(FULLCHAIN_FILE), self.cert_chain.join("\n")),
            RenderedFile::new(directory.join(CA_FILE), ca),
            RenderedFile::new(directory.join(LEAF_KEY_FILE), self.key.clone()),
        ])
    }
}

impl FromStr for Listener {
    type Err = ValidationError;

    /// Parses `tcp:<host>:<port>` or `unix:<path>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("tcp", address)) => {
                let listener = Listener::tcp(address);
                listener.validate()?;
                Ok(listener)
            }
            Some(("unix", path)) if !path.is_empty() => Ok(Listener::unix(path)),
            _ => Err(ValidationError::Format(format!(
                "unknown listener {s:?}; expected tcp:<host>:<port> or unix:<path>"
            ))),
        }
    }
}
