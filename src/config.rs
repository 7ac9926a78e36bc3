//! Configuration for s3lite.
//!
//! An optional YAML file supplies defaults; CLI flags (see `main.rs`)
//! override them. There are no environment-variable inputs — the core reads
//! configuration from exactly these two sources.

use std::path::Path;

use serde::Deserialize;

/// The server's full configuration: bind address, data directory, and the
/// single credential pair every request is checked against.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root directory under which every bucket and in-progress multipart
    /// upload is stored.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Access key clients must present in `Authorization: AWS4-HMAC-SHA256 Credential=...`.
    #[serde(alias = "access_key_id", default = "default_access_key")]
    pub access_key: String,

    /// Secret key used to derive the SigV4 signing key.
    #[serde(alias = "secret_access_key", default = "default_secret_key")]
    pub secret_key: String,

    /// `tracing_subscriber::EnvFilter` directive, e.g. `info` or `debug`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            access_key: default_access_key(),
            secret_key: default_secret_key(),
            log_level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_access_key() -> String {
    "s3lite".to_string()
}

fn default_secret_key() -> String {
    "s3lite-secret".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_yaml() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.access_key, "s3lite");
    }

    #[test]
    fn access_key_id_alias_accepted() {
        let config: Config = serde_yaml::from_str("access_key_id: AKIAEXAMPLE\n").unwrap();
        assert_eq!(config.access_key, "AKIAEXAMPLE");
    }
}
