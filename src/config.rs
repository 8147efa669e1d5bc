//! Typed configuration for the signaling server, loaded from environment
//! variables (`SERVER_HOST`, `SERVER_PORT`, `SERVER_TIMEOUT`,
//! `SERVER_TRANSPORT`). This is a stand-in for the external config
//! collaborator; the engine itself only ever sees a `Config` value.

use std::env;

use crate::error::{SipError, SipResult};

/// The four enumerated `server.*` options, matching the source's `viper`
/// keys `server.host`, `server.port`, `server.timeout`, `server.transport`.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Per-message deadline, in seconds.
    pub timeout_seconds: u64,
    pub transport: TransportKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Udp,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "0.0.0.0".to_string(),
            port: 5060,
            timeout_seconds: 5,
            transport: TransportKind::Udp,
        }
    }
}

impl Config {
    /// Loads configuration from the environment, falling back to
    /// defaults for any variable that is unset.
    pub fn from_env() -> SipResult<Self> {
        let mut config = Config::default();

        if let Ok(host) = env::var("SERVER_HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("SERVER_PORT") {
            config.port = port
                .parse()
                .map_err(|_| SipError::registration(format!("invalid SERVER_PORT: {port}")))?;
        }
        if let Ok(timeout) = env::var("SERVER_TIMEOUT") {
            config.timeout_seconds = timeout
                .parse()
                .map_err(|_| SipError::registration(format!("invalid SERVER_TIMEOUT: {timeout}")))?;
        }
        if let Ok(transport) = env::var("SERVER_TRANSPORT") {
            config.transport = match transport.to_uppercase().as_str() {
                "UDP" => TransportKind::Udp,
                other => {
                    return Err(SipError::registration(format!(
                        "unsupported SERVER_TRANSPORT: {other}"
                    )))
                }
            };
        }

        Ok(config)
    }

    /// The `host:port` string this server advertises in its own `Via`
    /// and `Contact` headers.
    pub fn advertised_host(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.port, 5060);
        assert_eq!(config.transport, TransportKind::Udp);
    }

    #[test]
    fn advertised_host_combines_host_and_port() {
        let config = Config::default();
        assert_eq!(config.advertised_host(), "0.0.0.0:5060");
    }
}
