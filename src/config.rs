use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::constants::{DEFAULT_SINK_TIMEOUT_MS, DEFAULT_KAFKA_CLIENT_ID, DEFAULT_QUEUE_CAPACITY};
use crate::output::SinkKind;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CarveConfig {
    pub offset: u64,
    pub limit: Option<u64>,
    pub queue_capacity: usize,
}

impl Default for CarveConfig {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    pub event_ids: Vec<i64>,
    pub exclude_users: Vec<String>,
    pub fields: Vec<String>,
    pub start: Option<String>,
    pub stop: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub client_id: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: String::new(),
            topic: String::new(),
            client_id: DEFAULT_KAFKA_CLIENT_ID.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub kind: SinkKind,
    pub tag: String,
    pub http_url: String,
    pub tcp_addr: String,
    pub timeout_ms: u64,
    pub kafka: KafkaConfig,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::None,
            tag: String::new(),
            http_url: String::new(),
            tcp_addr: String::new(),
            timeout_ms: DEFAULT_SINK_TIMEOUT_MS,
            kafka: KafkaConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub carve: CarveConfig,
    pub filters: FilterConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

/// Read the YAML file at `path`, or the built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p).with_context(|| format!("reading config {}", p.display()))?
    } else {
        include_bytes!("../config/default.yml").to_vec()
    };

    let config: Config = serde_yaml::from_slice(&bytes).context("parsing config")?;
    let config_hash = hash_bytes(&bytes);

    Ok(LoadedConfig {
        config,
        config_hash,
    })
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(digest)
}
