//! Daemon configuration from the environment.

use std::env;
use std::path::PathBuf;

/// Default filesystem name of the local stream socket.
pub const DEFAULT_LOCAL_SOCKNAME: &str = "/tmp/.ccnd.sock";

/// Default UDP port; also suffixes the socket name when set explicitly.
pub const DEFAULT_PORT: u16 = 4485;

pub const LOCAL_SOCKNAME_ENV: &str = "CCN_LOCAL_SOCKNAME";
pub const LOCAL_PORT_ENV: &str = "CCN_LOCAL_PORT";
pub const DEBUG_ENV: &str = "CCND_DEBUG";

/// Resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the local stream socket.
    pub sockname: PathBuf,
    /// UDP listener port.
    pub port: u16,
    /// Packet-level tracing.
    pub debug: bool,
}

impl Config {
    /// Reads the environment; command-line overrides are applied by the
    /// caller afterwards.
    pub fn from_env() -> Self {
        let base = env::var(LOCAL_SOCKNAME_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_LOCAL_SOCKNAME.to_string());
        let port_str = env::var(LOCAL_PORT_ENV)
            .ok()
            .filter(|s| !s.is_empty() && s.len() <= 10);
        let port = port_str
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        // An explicit port keeps several daemons apart on one host, so
        // it participates in the socket name too.
        let sockname = match &port_str {
            Some(s) => PathBuf::from(format!("{base}.{s}")),
            None => PathBuf::from(base),
        };
        let debug = env::var(DEBUG_ENV).map(|v| !v.is_empty()).unwrap_or(false);
        Self {
            sockname,
            port,
            debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_resolution() {
        // One test body so the process-global environment is not
        // touched concurrently.
        env::remove_var(LOCAL_SOCKNAME_ENV);
        env::remove_var(LOCAL_PORT_ENV);
        env::remove_var(DEBUG_ENV);
        let c = Config::from_env();
        assert_eq!(c.sockname, PathBuf::from(DEFAULT_LOCAL_SOCKNAME));
        assert_eq!(c.port, DEFAULT_PORT);
        assert!(!c.debug);

        env::set_var(LOCAL_PORT_ENV, "5000");
        env::set_var(DEBUG_ENV, "1");
        let c = Config::from_env();
        assert_eq!(c.port, 5000);
        assert_eq!(c.sockname, PathBuf::from("/tmp/.ccnd.sock.5000"));
        assert!(c.debug);

        env::set_var(LOCAL_SOCKNAME_ENV, "/tmp/other.sock");
        let c = Config::from_env();
        assert_eq!(c.sockname, PathBuf::from("/tmp/other.sock.5000"));

        env::remove_var(LOCAL_SOCKNAME_ENV);
        env::remove_var(LOCAL_PORT_ENV);
        env::remove_var(DEBUG_ENV);
    }
}
