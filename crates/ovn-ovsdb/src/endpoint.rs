//! OVSDB connection endpoints and connection retry policy

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::OvsdbError;

/// Where an OVSDB server listens, in `ovsdb-client` notation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `tcp:HOST:PORT`
    Tcp { host: String, port: u16 },
    /// `unix:PATH`
    Unix(PathBuf),
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Endpoint::Unix(path.into())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "tcp:{}:{}", host, port),
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl FromStr for Endpoint {
    type Err = OvsdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(OvsdbError::InvalidEndpoint(s.to_string()));
            }
            return Ok(Endpoint::unix(path));
        }

        if let Some(rest) = s.strip_prefix("tcp:") {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| OvsdbError::InvalidEndpoint(s.to_string()))?;
            let port: u16 = port
                .parse()
                .map_err(|_| OvsdbError::InvalidEndpoint(s.to_string()))?;
            if host.is_empty() {
                return Err(OvsdbError::InvalidEndpoint(s.to_string()));
            }
            return Ok(Endpoint::tcp(host, port));
        }

        Err(OvsdbError::InvalidEndpoint(s.to_string()))
    }
}

/// Fixed-delay connection retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoints() {
        assert_eq!(
            "tcp:127.0.0.1:6641".parse::<Endpoint>().unwrap(),
            Endpoint::tcp("127.0.0.1", 6641)
        );
        assert_eq!(
            "unix:/var/run/openvswitch/db.sock".parse::<Endpoint>().unwrap(),
            Endpoint::unix("/var/run/openvswitch/db.sock")
        );
        assert!("ssl:1.2.3.4:6641".parse::<Endpoint>().is_err());
        assert!("tcp:nohost".parse::<Endpoint>().is_err());
        assert!("tcp:host:notaport".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        let ep = Endpoint::tcp("10.0.0.2", 6641);
        assert_eq!(ep.to_string(), "tcp:10.0.0.2:6641");
        assert_eq!(ep.to_string().parse::<Endpoint>().unwrap(), ep);
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(5));
    }
}
