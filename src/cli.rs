use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;
use crate::output::SinkKind;
use crate::util::{parse_id_list, split_list};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// EVTX files, or raw images when carving
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Log as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Print the file header and skip the records
    #[arg(short = 'H', long)]
    pub header: bool,

    /// Carve chunks out of the input instead of reading it as a log file
    #[arg(short, long)]
    pub carve: bool,

    /// Byte offset to start carving from
    #[arg(short, long)]
    pub offset: Option<u64>,

    /// Stop carving after this many chunks were parsed
    #[arg(short, long)]
    pub limit: Option<u64>,

    /// Print per channel/event id counts instead of the records
    #[arg(short, long)]
    pub stats: bool,

    /// Prefix each record with its creation time in unix nanoseconds
    #[arg(short, long)]
    pub timestamp: bool,

    /// Only keep these event ids (comma separated)
    #[arg(long = "ie", value_name = "IDS")]
    pub include_ids: Option<String>,

    /// Drop events of these users (comma separated)
    #[arg(long = "eu", value_name = "USERS")]
    pub exclude_users: Option<String>,

    /// Only keep these fields (comma separated)
    #[arg(long = "if", value_name = "FIELDS")]
    pub include_fields: Option<String>,

    /// Drop events created before this time
    #[arg(long)]
    pub start: Option<String>,

    /// Drop events created after this time
    #[arg(long)]
    pub stop: Option<String>,

    /// Forward records to a collector instead of printing them
    #[arg(long = "type", value_enum, value_name = "KIND")]
    pub sink: Option<SinkKind>,

    /// Collector URL for http output
    #[arg(long, value_name = "URL")]
    pub http: Option<String>,

    /// host:port for tcp output
    #[arg(long, value_name = "ADDR")]
    pub tcp: Option<String>,

    /// Kafka bootstrap servers
    #[arg(long)]
    pub brokers: Option<String>,

    /// Kafka topic
    #[arg(long)]
    pub topic: Option<String>,

    /// Kafka client id
    #[arg(long)]
    pub client_id: Option<String>,

    /// Tag attached to forwarded records
    #[arg(long)]
    pub tag: Option<String>,

    /// Optional path to config file (YAML)
    #[arg(long)]
    pub config_path: Option<PathBuf>,
}

impl CliOptions {
    /// Values given on the command line win over the configuration file.
    pub fn apply_to(&self, cfg: &mut Config) {
        if let Some(offset) = self.offset {
            cfg.carve.offset = offset;
        }
        if let Some(limit) = self.limit {
            cfg.carve.limit = (limit > 0).then_some(limit);
        }

        let filters = &mut cfg.filters;
        if let Some(ids) = self.include_ids.as_deref() {
            filters.event_ids = parse_id_list(ids);
        }
        if let Some(users) = self.exclude_users.as_deref() {
            filters.exclude_users = split_list(users);
        }
        if let Some(fields) = self.include_fields.as_deref() {
            filters.fields = split_list(fields);
        }
        if self.start.is_some() {
            filters.start = self.start.clone();
        }
        if self.stop.is_some() {
            filters.stop = self.stop.clone();
        }

        let output = &mut cfg.output;
        if let Some(kind) = self.sink {
            output.kind = kind;
        }
        let overrides = [
            (&self.http, &mut output.http_url),
            (&self.tcp, &mut output.tcp_addr),
            (&self.tag, &mut output.tag),
            (&self.brokers, &mut output.kafka.brokers),
            (&self.topic, &mut output.kafka.topic),
            (&self.client_id, &mut output.kafka.client_id),
        ];
        for (value, slot) in overrides {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
    }
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}
