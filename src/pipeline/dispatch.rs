//! Where kept records go: stats, a remote sink, or the primary output.

use std::io::Write;

use anyhow::{Context, Result};
use tracing::{debug, error, warn};

use crate::evtx::EvtxRecord;
use crate::filter::{FilterCriteria, Verdict};
use crate::output::{NoopSink, OutputSink};
use crate::stats::StatsAggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// One JSON document per line, optionally prefixed with unix nanoseconds.
    Print { timestamp: bool },
    Stats,
    Forward,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounters {
    pub seen: u64,
    pub kept: u64,
    pub dropped: u64,
    pub sink_errors: u64,
    pub missing_time: u64,
}

pub struct RecordDispatcher<W: Write> {
    filter: FilterCriteria,
    mode: DispatchMode,
    stats: StatsAggregator,
    sink: Box<dyn OutputSink>,
    out: W,
    counters: DispatchCounters,
}

impl<W: Write> RecordDispatcher<W> {
    pub fn new(filter: FilterCriteria, mode: DispatchMode, out: W) -> Self {
        Self {
            filter,
            mode,
            stats: StatsAggregator::new(),
            sink: Box::new(NoopSink),
            out,
            counters: DispatchCounters::default(),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn counters(&self) -> DispatchCounters {
        self.counters
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    /// Primary output, for text that bypasses the filters.
    pub fn out(&mut self) -> &mut W {
        &mut self.out
    }

    /// Filter `record` and route it. Errors are only returned for the
    /// primary output; sink failures are logged and counted.
    pub fn dispatch(&mut self, mut record: EvtxRecord) -> Result<()> {
        self.counters.seen += 1;
        if let Verdict::Drop(reason) = self.filter.apply(&mut record) {
            self.counters.dropped += 1;
            debug!(record_id = record.record_id, ?reason, "record filtered out");
            return Ok(());
        }
        self.counters.kept += 1;

        match self.mode {
            DispatchMode::Stats => {
                let channel = record.channel().unwrap_or_default();
                let event_id = record.event_id().unwrap_or_default();
                self.stats.update(channel, event_id);
            }
            DispatchMode::Forward => {
                if let Err(err) = self.sink.send(&record) {
                    self.counters.sink_errors += 1;
                    warn!(
                        record_id = record.record_id,
                        sink = self.sink.name(),
                        "failed to forward record: {err}"
                    );
                }
            }
            DispatchMode::Print { timestamp } => self.print(&record, timestamp)?,
        }
        Ok(())
    }

    fn print(&mut self, record: &EvtxRecord, timestamp: bool) -> Result<()> {
        let line = serde_json::to_string(&record.value).context("serializing record")?;
        if timestamp {
            let nanos = record
                .timestamp()
                .ok()
                .and_then(|ts| ts.timestamp_nanos_opt());
            match nanos {
                Some(nanos) => writeln!(self.out, "{nanos}: {line}"),
                None => {
                    self.counters.missing_time += 1;
                    error!("event time not found: {line}");
                    return Ok(());
                }
            }
        } else {
            writeln!(self.out, "{line}")
        }
        .context("writing record")
    }

    /// Emit the stats report when in stats mode and flush everything.
    /// Returns the primary output.
    pub fn finish(mut self) -> Result<W> {
        if self.mode == DispatchMode::Stats {
            self.stats
                .report(&mut self.out)
                .context("writing stats report")?;
        }
        if let Err(err) = self.sink.flush() {
            warn!(sink = self.sink.name(), "flushing output sink failed: {err}");
        }
        self.out.flush().context("flushing output")?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputError;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn record(id: u64, event_id: i64, channel: &str) -> EvtxRecord {
        EvtxRecord {
            record_id: id,
            written: 0,
            chunk_offset: 0,
            value: json!({"Event": {"System": {
                "EventID": event_id,
                "Channel": channel,
                "TimeCreated": {"SystemTime": "2017-01-01T00:00:01.5Z"}
            }}}),
        }
    }

    struct Collecting(Arc<Mutex<Vec<u64>>>);

    impl OutputSink for Collecting {
        fn name(&self) -> &'static str {
            "collect"
        }
        fn open(&mut self, _target: &str) -> Result<(), OutputError> {
            Ok(())
        }
        fn send(&mut self, record: &EvtxRecord) -> Result<(), OutputError> {
            if record.record_id == 13 {
                return Err(OutputError::NotOpen);
            }
            self.0.lock().unwrap().push(record.record_id);
            Ok(())
        }
    }

    #[test]
    fn prints_one_line_per_kept_record() {
        let filter = FilterCriteria::new().with_event_ids([4624]);
        let mut dispatcher =
            RecordDispatcher::new(filter, DispatchMode::Print { timestamp: false }, Vec::new());
        dispatcher.dispatch(record(1, 4624, "Security")).unwrap();
        dispatcher.dispatch(record(2, 4688, "Security")).unwrap();
        dispatcher.dispatch(record(3, 4624, "Security")).unwrap();
        assert_eq!(dispatcher.counters().dropped, 1);
        let out = String::from_utf8(dispatcher.finish().unwrap()).unwrap();
        assert_eq!(out.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(out.lines().next().unwrap()).unwrap();
        assert_eq!(first["Event"]["System"]["EventID"], json!(4624));
    }

    #[test]
    fn timestamp_prefix_uses_unix_nanos() {
        let mut dispatcher = RecordDispatcher::new(
            FilterCriteria::new(),
            DispatchMode::Print { timestamp: true },
            Vec::new(),
        );
        dispatcher.dispatch(record(1, 1, "System")).unwrap();
        let mut untimed = record(2, 1, "System");
        untimed.value["Event"]["System"]
            .as_object_mut()
            .unwrap()
            .remove("TimeCreated");
        dispatcher.dispatch(untimed).unwrap();
        assert_eq!(dispatcher.counters().missing_time, 1);
        let out = String::from_utf8(dispatcher.finish().unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("1483228801500000000: {"));
    }

    #[test]
    fn stats_mode_reports_csv() {
        let mut dispatcher =
            RecordDispatcher::new(FilterCriteria::new(), DispatchMode::Stats, Vec::new());
        dispatcher.dispatch(record(1, 4624, "Security")).unwrap();
        dispatcher.dispatch(record(2, 4624, "Security")).unwrap();
        dispatcher.dispatch(record(3, 7036, "System")).unwrap();
        assert_eq!(dispatcher.stats().total(), 3);
        let out = String::from_utf8(dispatcher.finish().unwrap()).unwrap();
        assert_eq!(out, "Channel,EventID,Count\nSecurity,4624,2\nSystem,7036,1\n");
    }

    #[test]
    fn forward_mode_counts_sink_failures() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher =
            RecordDispatcher::new(FilterCriteria::new(), DispatchMode::Forward, Vec::new())
                .with_sink(Box::new(Collecting(Arc::clone(&sent))));
        for id in [12, 13, 14] {
            dispatcher.dispatch(record(id, 1, "System")).unwrap();
        }
        assert_eq!(dispatcher.counters().sink_errors, 1);
        let out = dispatcher.finish().unwrap();
        assert!(out.is_empty());
        assert_eq!(*sent.lock().unwrap(), vec![12, 14]);
    }
}
