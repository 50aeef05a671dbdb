//! Typed server configuration and its translation into command-line
//! arguments, the server's native HCL configuration and a dialable address.

use crate::core::domain::{
    error::{DevbaoResult, ValidationError},
    model::{audit::Audit, listener::Listener, listener::CA_FILE, seal::Seal, storage::Storage},
    value_object::BindAddress,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.hcl";
pub const DEV_CA_FILE: &str = "vault-ca.pem";
pub const DEFAULT_DEV_ADDRESS: &str = "127.0.0.1:8200";
pub const PLUGIN_DIRECTORY: &str = "plugins";

/// Ephemeral dev-mode settings. The server keeps all state in memory and
/// generates its own storage every run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub tls: bool,
}

/// Configuration of one managed server instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<DevConfig>,
    #[serde(default)]
    pub listeners: Vec<Listener>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<Storage>,
    #[serde(default)]
    pub seals: Vec<Seal>,
    #[serde(default)]
    pub audits: Vec<Audit>,
    #[serde(default)]
    pub ui: bool,
}

/// A single building block passed to node build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOption {
    Dev(DevConfig),
    Listener(Listener),
    Storage(Storage),
    Seal(Seal),
    Audit(Audit),
    Ui,
}

impl From<DevConfig> for ConfigOption {
    fn from(value: DevConfig) -> Self {
        ConfigOption::Dev(value)
    }
}

impl From<Listener> for ConfigOption {
    fn from(value: Listener) -> Self {
        ConfigOption::Listener(value)
    }
}

impl From<Storage> for ConfigOption {
    fn from(value: Storage) -> Self {
        ConfigOption::Storage(value)
    }
}

impl From<Seal> for ConfigOption {
    fn from(value: Seal) -> Self {
        ConfigOption::Seal(value)
    }
}

impl From<Audit> for ConfigOption {
    fn from(value: Audit) -> Self {
        ConfigOption::Audit(value)
    }
}

/// Where a client reaches the server's API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    pub address: BindAddress,
    pub tls: bool,
    pub ca_path: Option<PathBuf>,
}

impl ConnectInfo {
    pub fn scheme(&self) -> &'static str {
        if self.tls { "https" } else { "http" }
    }

    pub fn url(&self) -> String {
        format!("{}://{}", self.scheme(), self.address)
    }
}

/// A file produced by rendering, written before the server is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub path: PathBuf,
    pub contents: String,
}

impl RenderedFile {
    pub fn new(path: PathBuf, contents: impl Into<String>) -> Self {
        Self {
            path,
            contents: contents.into(),
        }
    }
}

/// Everything needed to launch a server for a given configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    pub args: Vec<String>,
    /// Native configuration text, absent in dev mode.
    pub config: Option<String>,
    /// Files to write, including the configuration file itself.
    pub files: Vec<RenderedFile>,
    /// Directories the server expects to exist.
    pub directories: Vec<PathBuf>,
}

impl InstanceConfig {
    /// Assembles a configuration from build options.
    ///
    /// At most one storage backend and one dev block are accepted.
    pub fn from_options(options: impl IntoIterator<Item = ConfigOption>) -> DevbaoResult<Self> {
        let mut config = InstanceConfig::default();
        for option in options {
            match option {
                ConfigOption::Dev(dev) => {
                    if config.dev.is_some() {
                        return Err(ValidationError::ConstraintViolation(
                            "dev mode specified more than once".into(),
                        )
                        .into());
                    }
                    config.dev = Some(dev);
                }
                ConfigOption::Storage(storage) => {
                    if config.storage.is_some() {
                        return Err(ValidationError::ConstraintViolation(
                            "exactly one storage backend may be specified".into(),
                        )
                        .into());
                    }
                    config.storage = Some(storage);
                }
                ConfigOption::Listener(listener) => config.listeners.push(listener),
                ConfigOption::Seal(seal) => config.seals.push(seal),
                ConfigOption::Audit(audit) => config.audits.push(audit),
                ConfigOption::Ui => config.ui = true,
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn is_dev(&self) -> bool {
        self.dev.is_some()
    }

    /// Structural check: production mode needs a listener and a storage backend.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.dev.is_some() {
            return Ok(());
        }
        if self.listeners.is_empty() {
            return Err(ValidationError::ConstraintViolation(
                "no listeners specified and dev mode disabled".into(),
            ));
        }
        if self.storage.is_none() {
            return Err(ValidationError::ConstraintViolation(
                "no storage specified and dev mode disabled".into(),
            ));
        }
        Ok(())
    }

    /// Checks every address, seal and listener in depth.
    pub fn validate_contents(&self) -> Result<(), ValidationError> {
        if let Some(dev) = &self.dev {
            if !dev.address.is_empty() {
                dev.address.parse::<BindAddress>()?;
            }
        }
        for listener in &self.listeners {
            listener.validate()?;
        }
        for seal in &self.seals {
            seal.validate()?;
        }
        Ok(())
    }

    /// Resolves the address a local client dials to reach this server.
    pub fn connect_address(&self, directory: &Path) -> Result<ConnectInfo, ValidationError> {
        if let Some(dev) = &self.dev {
            let address = if dev.address.is_empty() {
                DEFAULT_DEV_ADDRESS
            } else {
                dev.address.as_str()
            };
            let address = address.parse::<BindAddress>()?.dialable();
            return Ok(ConnectInfo {
                address,
                tls: dev.tls,
                ca_path: dev.tls.then(|| directory.join(DEV_CA_FILE)),
            });
        }

        for listener in &self.listeners {
            if let Listener::Tcp(tcp) = listener {
                let tls = tcp.tls.is_some();
                return Ok(ConnectInfo {
                    address: tcp.bind_address()?.dialable(),
                    tls,
                    ca_path: tls.then(|| directory.join(CA_FILE)),
                });
            }
        }

        Err(ValidationError::ConstraintViolation(
            "no tcp listener to connect to; unix sockets cannot be dialed over tcp".into(),
        ))
    }

    /// Renders arguments and, outside dev mode, the native configuration.
    ///
    /// `privileged` reports whether the server runs with rights to lock memory.
    pub fn render(
        &self,
        directory: &Path,
        privileged: bool,
    ) -> Result<RenderedConfig, ValidationError> {
        self.validate()?;
        self.validate_contents()?;

        let mut args = vec!["server".to_string(), "-exit-on-core-shutdown".to_string()];

        if let Some(dev) = &self.dev {
            args.push("-dev".to_string());
            if !dev.token.is_empty() {
                args.push(format!("-dev-root-token-id={}", dev.token));
            }
            if !dev.address.is_empty() {
                args.push(format!("-dev-listen-address={}", dev.address));
            }
            if dev.tls {
                args.push("-dev-tls".to_string());
                args.push(format!("-dev-tls-cert-dir={}", directory.display()));
            }
            return Ok(RenderedConfig {
                args,
                config: None,
                files: Vec::new(),
                directories: Vec::new(),
            });
        }

        let connect = self.connect_address(directory)?;
        let mut files = Vec::new();
        let mut directories = Vec::new();
        let mut hcl = String::new();

        for listener in &self.listeners {
            hcl.push_str(&listener.render(directory, &mut files)?);
            hcl.push('\n');
        }

        if !privileged {
            hcl.push_str("disable_mlock = true\n\n");
        }

        if let Some(storage) = &self.storage {
            hcl.push_str(&storage.render(directory));
            hcl.push('\n');
            directories.extend(storage.data_directory(directory));

            if storage.is_clustered() {
                let cluster = connect.address.with_port_offset(1)?;
                hcl.push_str(&format!(
                    "cluster_addr = {}\n\n",
                    hcl_string(&format!("https://{cluster}"))
                ));
            }
        }

        for seal in &self.seals {
            hcl.push_str(&seal.render());
            hcl.push('\n');
        }

        let plugins = directory.join(PLUGIN_DIRECTORY);
        hcl.push_str(&format!("api_addr = {}\n", hcl_string(&connect.url())));
        hcl.push_str(&format!(
            "plugin_directory = {}\n",
            hcl_string(&plugins.display().to_string())
        ));
        hcl.push_str("raw_storage_endpoint = true\n");
        hcl.push_str("introspection_endpoint = true\n");
        hcl.push_str("log_level = \"trace\"\n");
        if self.ui {
            hcl.push_str("ui = true\n");
        }
        directories.push(plugins);

        let config_path = directory.join(CONFIG_FILE);
        args.push(format!("-config={}", config_path.display()));
        files.push(RenderedFile::new(config_path, hcl.clone()));

        Ok(RenderedConfig {
            args,
            config: Some(hcl),
            files,
            directories,
        })
    }
}

/// Quotes a value as an HCL string literal.
pub(crate) fn hcl_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
