//! # Output sinks
//!
//! Forwarding of kept records to a remote collector. The sink is chosen once
//! per run from [`OutputConfig`]; a sink that cannot be opened is replaced by
//! [`NoopSink`] so that a collector outage never stops a dump.

pub mod http;
pub mod kafka;
pub mod tcp;

use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;
use tracing::{error, info};

use crate::config::OutputConfig;
use crate::evtx::EvtxRecord;

pub use http::HttpSink;
pub use kafka::KafkaSink;
pub use tcp::TcpSink;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no target configured for {0} output")]
    MissingTarget(&'static str),
    #[error("invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },
    #[error("sink used before open")]
    NotOpen,
    #[error("kafka error: {0}")]
    Kafka(String),
    #[error("{0}")]
    Unsupported(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    None,
    Http,
    Tcp,
    Kafka,
}

/// Wire shape of a forwarded record.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<&'a str>,
    pub event: &'a Json,
}

impl<'a> Envelope<'a> {
    pub fn new(tag: &'a str, record: &'a EvtxRecord) -> Self {
        Self {
            tag: (!tag.is_empty()).then_some(tag),
            event: &record.value,
        }
    }
}

pub trait OutputSink: Send {
    fn name(&self) -> &'static str;

    fn open(&mut self, target: &str) -> Result<(), OutputError>;

    fn send(&mut self, record: &EvtxRecord) -> Result<(), OutputError>;

    fn flush(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

/// Accepts and discards everything.
#[derive(Debug, Default)]
pub struct NoopSink;

impl OutputSink for NoopSink {
    fn name(&self) -> &'static str {
        "none"
    }

    fn open(&mut self, _target: &str) -> Result<(), OutputError> {
        Ok(())
    }

    fn send(&mut self, _record: &EvtxRecord) -> Result<(), OutputError> {
        Ok(())
    }
}

/// Build and open the configured sink, degrading to [`NoopSink`] on failure.
pub fn build_sink(cfg: &OutputConfig) -> Box<dyn OutputSink> {
    let timeout = Duration::from_millis(cfg.timeout_ms);
    let mut sink: Box<dyn OutputSink> = match cfg.kind {
        SinkKind::None => return Box::new(NoopSink),
        SinkKind::Http => Box::new(HttpSink::new(&cfg.tag, timeout)),
        SinkKind::Tcp => Box::new(TcpSink::new(&cfg.tag, timeout)),
        SinkKind::Kafka => Box::new(KafkaSink::new(
            &cfg.tag,
            &cfg.kafka.topic,
            &cfg.kafka.client_id,
        )),
    };
    let destination = match cfg.kind {
        SinkKind::None => "",
        SinkKind::Http => cfg.http_url.as_str(),
        SinkKind::Tcp => cfg.tcp_addr.as_str(),
        SinkKind::Kafka => cfg.kafka.brokers.as_str(),
    };
    match sink.open(destination) {
        Ok(()) => {
            info!(sink = sink.name(), destination, "output sink ready");
            sink
        }
        Err(err) => {
            error!(
                sink = sink.name(),
                destination, "cannot open output sink, records will not be forwarded: {err}"
            );
            Box::new(NoopSink)
        }
    }
}
