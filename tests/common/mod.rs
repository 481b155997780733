//! Shared helpers for the integration tests.

#![allow(dead_code)]

pub mod builder;

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use evtxcarve::evidence::MemorySource;
use evtxcarve::filter::FilterCriteria;
use evtxcarve::pipeline::{self, CarveOptions, CarveSummary, DispatchMode, RecordDispatcher};

pub fn write_input(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).expect("write input");
    path
}

pub fn printer(filter: FilterCriteria) -> RecordDispatcher<Vec<u8>> {
    RecordDispatcher::new(filter, DispatchMode::Print { timestamp: false }, Vec::new())
}

/// Carve an in-memory image and return the summary and the printed lines.
pub fn carve_bytes(
    image: Vec<u8>,
    opts: &CarveOptions,
    filter: FilterCriteria,
) -> (CarveSummary, Vec<Value>) {
    let source = MemorySource::new(image.clone());
    let mut dispatcher = printer(filter);
    let summary = pipeline::carve_source(Cursor::new(image), &source, opts, &mut dispatcher)
        .expect("carve");
    let out = dispatcher.finish().expect("finish");
    (summary, parse_lines(&out))
}

pub fn parse_lines(out: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(out)
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

pub fn record_ids(values: &[Value]) -> Vec<u64> {
    values
        .iter()
        .map(|value| {
            value["Event"]["System"]["EventRecordID"]
                .as_u64()
                .expect("record id")
        })
        .collect()
}

/// Counts warn and error events emitted on the current thread.
#[derive(Clone, Default)]
pub struct ProblemCounter(Arc<AtomicUsize>);

impl ProblemCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for ProblemCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if matches!(*event.metadata().level(), Level::WARN | Level::ERROR) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Run `f` with a subscriber that only counts problems.
pub fn count_problems<T>(f: impl FnOnce() -> T) -> (T, usize) {
    use tracing_subscriber::layer::SubscriberExt;

    let counter = ProblemCounter::default();
    let subscriber = tracing_subscriber::registry().with(counter.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, counter.count())
}
