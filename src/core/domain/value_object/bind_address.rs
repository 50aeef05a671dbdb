use crate::core::domain::error::ValidationError;
use std::fmt;
use std::str::FromStr;

/// A `host:port` pair a listener binds to or a client dials.
///
/// IPv6 hosts are stored without brackets and rendered with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAddress {
    host: String,
    port: u16,
}

impl BindAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ValidationError> {
        let host = host.into();
        if host.is_empty() {
            return Err(ValidationError::field("address", "host must not be empty"));
        }
        validate_port(port)?;
        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns `true` when the host binds every interface.
    pub fn is_wildcard(&self) -> bool {
        matches!(self.host.as_str(), "0.0.0.0" | "::")
    }

    /// Returns the address a local client should dial.
    ///
    /// Wildcard hosts cannot be dialed, so they are replaced by the loopback
    /// address of the same family.
    pub fn dialable(&self) -> BindAddress {
        let host = match self.host.as_str() {
            "0.0.0.0" => "127.0.0.1".to_string(),
            "::" => "::1".to_string(),
            other => other.to_string(),
        };
        BindAddress {
            host,
            port: self.port,
        }
    }

    /// Returns the same host with the port shifted by `offset`.
    pub fn with_port_offset(&self, offset: u16) -> Result<BindAddress, ValidationError> {
        let port = self.port.checked_add(offset).ok_or_else(|| {
            ValidationError::field(
                "address",
                format!("port {} + {offset} exceeds 65535", self.port),
            )
        })?;
        Ok(BindAddress {
            host: self.host.clone(),
            port,
        })
    }
}

impl fmt::Display for BindAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for BindAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ValidationError::Format(format!("missing port in address {s:?}")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port: u16 = port
            .parse()
            .map_err(|_| ValidationError::Format(format!("invalid port in address {s:?}")))?;
        BindAddress::new(host, port)
    }
}

/// Validates a port number.
pub(crate) fn validate_port(port: u16) -> Result<(), ValidationError> {
    if port == 0 {
        return Err(ValidationError::field("port", "Port cannot be 0"));
    }
    Ok(())
}
