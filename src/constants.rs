//! Defaults shared by the configuration layer and the pipeline.

/// Offsets queued between the scanner thread and the chunk consumer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Read window of the signature scanner.
pub const SCAN_BUFFER_SIZE: usize = 1 << 20;

/// Connect and request timeout of the http and tcp sinks.
pub const DEFAULT_SINK_TIMEOUT_MS: u64 = 10_000;
pub const KAFKA_FLUSH_TIMEOUT_MS: u64 = 10_000;

pub const DEFAULT_KAFKA_CLIENT_ID: &str = "evtxcarve";
