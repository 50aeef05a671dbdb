//! Named provisioning scripts that can be applied to a ready node.

use crate::core::domain::error::ValidationError;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    Pki,
    Transit,
    Userpass,
    Kv,
}

impl Profile {
    pub fn all() -> &'static [Profile] {
        &[Profile::Pki, Profile::Transit, Profile::Userpass, Profile::Kv]
    }

    pub fn name(self) -> &'static str {
        match self {
            Profile::Pki => "pki",
            Profile::Transit => "transit",
            Profile::Userpass => "userpass",
            Profile::Kv => "kv",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Profile::Pki => "enable a two-tier root & intermediate CA hierarchy",
            Profile::Transit => "enable transit for auto-unseal of another cluster",
            Profile::Userpass => "enable userpass auth with sample reader and writer policies",
            Profile::Kv => "mount a versioned key-value store at kv/",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Profile {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Profile::all()
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let known: Vec<&str> = Profile::all().iter().map(|p| p.name()).collect();
                ValidationError::field(
                    "profile",
                    format!("unknown profile {s:?}; known profiles: {}", known.join(", ")),
                )
            })
    }
}
