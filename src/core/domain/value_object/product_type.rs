use crate::core::domain::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which server product a node runs.
///
/// Persisted as `""` (auto-detect), `"bao"` or `"vault"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductType {
    #[default]
    #[serde(rename = "")]
    Auto,
    #[serde(rename = "bao")]
    OpenBao,
    #[serde(rename = "vault")]
    Vault,
}

impl ProductType {
    /// Binary names to try, in order of preference.
    pub fn binary_candidates(self) -> &'static [&'static str] {
        match self {
            ProductType::Auto => &["openbao", "bao", "vault"],
            ProductType::OpenBao => &["openbao", "bao"],
            ProductType::Vault => &["vault"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProductType::Auto => "",
            ProductType::OpenBao => "bao",
            ProductType::Vault => "vault",
        }
    }
}

/// Returns `true` if `file_name` is one of the known server executables.
pub(crate) fn is_server_binary(file_name: &str) -> bool {
    ProductType::Auto.binary_candidates().contains(&file_name)
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductType::Auto => f.write_str("auto"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl FromStr for ProductType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(ProductType::Auto),
            "bao" | "openbao" => Ok(ProductType::OpenBao),
            "vault" => Ok(ProductType::Vault),
            other => Err(ValidationError::field(
                "type",
                format!("unknown product type {other:?}; expected bao or vault"),
            )),
        }
    }
}
