//! Audit devices. These are enabled through the API once a node is unsealed
//! rather than rendered into the server configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Audit {
    File(FileAudit),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAudit {
    /// Optional suffix distinguishing several file devices.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// `json` (server default) or `jsonx`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Log sensitive values unhashed.
    #[serde(default)]
    pub log_raw: bool,
    /// Log file outside the node directory; marks the device `-custom`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    /// Octal permission bits of the log file, e.g. `0600`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// String prepended to every log line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default)]
    pub hmac_accessor: bool,
    #[serde(default)]
    pub elide_list_responses: bool,
}

impl Audit {
    /// A plain file device writing `audit.log` in the node directory.
    pub fn file() -> Self {
        Audit::File(FileAudit::default())
    }

    /// A raw-logging file device writing `audit-raw.log`.
    pub fn raw_file() -> Self {
        Audit::File(FileAudit {
            log_raw: true,
            ..FileAudit::default()
        })
    }

    /// Mount name of the device, e.g. `audit` or `audit-jsonx-raw`.
    pub fn device_name(&self) -> String {
        match self {
            Audit::File(file) => {
                let mut name = String::from("audit");
                if !file.name.is_empty() {
                    name.push('-');
                    name.push_str(&file.name);
                }
                if file.file_path.is_some() {
                    name.push_str("-custom");
                }
                if let Some(format) = &file.format {
                    name.push('-');
                    name.push_str(format);
                }
                if file.log_raw {
                    name.push_str("-raw");
                }
                name
            }
        }
    }

    pub fn device_type(&self) -> &'static str {
        match self {
            Audit::File(_) => "file",
        }
    }

    pub fn log_path(&self, directory: &Path) -> PathBuf {
        match self {
            Audit::File(FileAudit {
                file_path: Some(path),
                ..
            }) => path.clone(),
            Audit::File(_) => directory.join(format!("{}.log", self.device_name())),
        }
    }

    /// Options sent when enabling the device.
    pub fn options(&self, directory: &Path) -> BTreeMap<String, String> {
        let mut options = BTreeMap::new();
        match self {
            Audit::File(file) => {
                options.insert(
                    "file_path".to_string(),
                    self.log_path(directory).display().to_string(),
                );
                for (key, flag) in [
                    ("log_raw", file.log_raw),
                    ("hmac_accessor", file.hmac_accessor),
                    ("elide_list_responses", file.elide_list_responses),
                ] {
                    options.insert(key.to_string(), flag.to_string());
                }
                for (key, value) in [
                    ("format", &file.format),
                    ("prefix", &file.prefix),
                    ("mode", &file.mode),
                ] {
                    if let Some(value) = value {
                        options.insert(key.to_string(), value.clone());
                    }
                }
            }
        }
        options
    }
}
