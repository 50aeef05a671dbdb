use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Snapshot of a launched server process.
///
/// Present on a node only while the process is believed to be running; it is
/// overwritten on every resume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecEnvironment {
    pub binary: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    pub directory: PathBuf,
    /// `host:port` probed for readiness.
    pub connection_address: String,
    #[serde(default)]
    pub pid: u32,
}

impl ExecEnvironment {
    /// File name of the expected executable, used to detect PID reuse.
    pub fn binary_name(&self) -> Option<&str> {
        self.binary.file_name().and_then(|n| n.to_str())
    }
}
