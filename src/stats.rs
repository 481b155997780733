use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

#[derive(Debug, Default)]
struct Counts {
    event_count: u64,
    channels: BTreeMap<String, BTreeMap<i64, u64>>,
}

/// Per-channel, per-event-id counters behind one lock.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<Counts>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsRow {
    #[serde(rename = "Channel")]
    pub channel: String,
    #[serde(rename = "EventID")]
    pub event_id: i64,
    #[serde(rename = "Count")]
    pub count: u64,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Counts> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn update(&self, channel: &str, event_id: i64) {
        let mut counts = self.lock();
        *counts
            .channels
            .entry(channel.to_string())
            .or_default()
            .entry(event_id)
            .or_insert(0) += 1;
        counts.event_count += 1;
    }

    pub fn total(&self) -> u64 {
        self.lock().event_count
    }

    /// Rows ordered by channel, then event id.
    pub fn snapshot(&self) -> Vec<StatsRow> {
        let counts = self.lock();
        let rows: Vec<StatsRow> = counts
            .channels
            .iter()
            .flat_map(|(channel, ids)| {
                ids.iter().map(move |(event_id, count)| StatsRow {
                    channel: channel.clone(),
                    event_id: *event_id,
                    count: *count,
                })
            })
            .collect();
        rows
    }

    /// CSV report with a `Channel,EventID,Count` header, even when empty.
    pub fn report<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        wtr.write_record(["Channel", "EventID", "Count"])?;
        for row in self.snapshot() {
            wtr.serialize(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}
