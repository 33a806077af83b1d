use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

const TCP_SCHEME: &str = "tcp://";
const UNIX_SCHEME: &str = "unix://";

/// Where a link listens or connects.
///
/// Endpoints are written as URLs in configuration files:
/// `tcp://192.168.0.7:5100` or `unix:///tmp/sigweave/acc.sock`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    /// A TCP `host:port` address.
    Tcp(String),
    /// A filesystem path to a Unix domain socket.
    Unix(PathBuf),
}

impl Endpoint {
    /// Short transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match self {
            Endpoint::Tcp(_) => "tcp",
            Endpoint::Unix(_) => "unix-domain-socket",
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(addr) = trimmed.strip_prefix(TCP_SCHEME) {
            // host:port, the port must be present and numeric
            let valid = addr
                .rsplit_once(':')
                .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
                .unwrap_or(false);
            if !valid {
                return Err(TransportError::InvalidEndpoint(s.to_string()));
            }
            return Ok(Endpoint::Tcp(addr.to_string()));
        }
        if let Some(path) = trimmed.strip_prefix(UNIX_SCHEME) {
            if path.is_empty() {
                return Err(TransportError::InvalidEndpoint(s.to_string()));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }
        Err(TransportError::InvalidEndpoint(s.to_string()))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = TransportError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "{TCP_SCHEME}{addr}"),
            Endpoint::Unix(path) => write!(f, "{UNIX_SCHEME}{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_endpoint() {
        let ep: Endpoint = "tcp://127.0.0.1:5100".parse().unwrap();
        assert_eq!(ep, Endpoint::Tcp("127.0.0.1:5100".to_string()));
        assert_eq!(ep.to_string(), "tcp://127.0.0.1:5100");
    }

    #[test]
    fn parses_unix_endpoint() {
        let ep: Endpoint = "unix:///tmp/acc.sock".parse().unwrap();
        assert_eq!(ep, Endpoint::Unix(PathBuf::from("/tmp/acc.sock")));
        assert_eq!(ep.transport_name(), "unix-domain-socket");
    }

    #[test]
    fn rejects_missing_port_and_unknown_scheme() {
        assert!(matches!(
            "tcp://localhost".parse::<Endpoint>(),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            "bt://00:11:22".parse::<Endpoint>(),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!("unix://".parse::<Endpoint>().is_err());
    }

    #[test]
    fn deserializes_from_json_string() {
        let ep: Endpoint = serde_json::from_str("\"tcp://[::1]:9000\"").unwrap();
        assert_eq!(ep, Endpoint::Tcp("[::1]:9000".to_string()));
        let back = serde_json::to_string(&ep).unwrap();
        assert_eq!(back, "\"tcp://[::1]:9000\"");
    }
}
