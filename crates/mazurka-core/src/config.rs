use serde::Deserialize;

use crate::error::Error;
use crate::proto::http1::{ParserConfig, SerializerConfig};

/// Server tuning knobs. Loadable from a TOML file; every field has a
/// default so partial files work.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Fixed number of connection workers per listener.
    pub workers: usize,
    /// Accept tokens each endpoint keeps outstanding.
    pub concurrency: u32,
    /// Seconds granted to in-flight sessions after the first stop
    /// signal.
    pub shutdown_grace_secs: u64,
    /// Upper bound on a request's header section, in bytes.
    pub max_header_size: usize,
    /// Upper bound on a request body, in bytes.
    pub max_body_size: u64,
    /// Body-input capacity of streaming response serializers.
    pub stream_buffer_size: usize,
    /// Listen backlog.
    pub backlog: i32,
    pub reuse_addr: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            concurrency: 1,
            shutdown_grace_secs: 30,
            max_header_size: 8 * 1024,
            max_body_size: 1024 * 1024,
            stream_buffer_size: 4 * 1024,
            backlog: 1024,
            reuse_addr: true,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, Error> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn parser_config(&self) -> ParserConfig {
        ParserConfig {
            max_header_size: self.max_header_size,
            max_body_size: self.max_body_size,
            ..ParserConfig::default()
        }
    }

    pub fn serializer_config(&self) -> SerializerConfig {
        SerializerConfig {
            stream_buffer_size: self.stream_buffer_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_workers_match_the_cpu_count() {
        assert_eq!(ServerConfig::default().workers, num_cpus::get().max(1));
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg = ServerConfig::from_toml("workers = 2\nmax_body_size = 1024\n").unwrap();
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.max_body_size, 1024);
        assert_eq!(cfg.shutdown_grace_secs, 30);
        assert!(cfg.reuse_addr);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        assert!(matches!(
            ServerConfig::from_toml("workers = \"many\""),
            Err(Error::Config(_))
        ));
    }
}
