use std::collections::BTreeMap;
use std::io::{self, Read, Seek};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use super::event::UsageEvent;
use super::pricing::estimate_cost;
use super::reader::{EventLogReader, ScanStats};
use super::seek::{SeekWindow, seek_offset};

/// Running totals for one model over a single scan.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct ModelAggregate {
    pub model: String,
    pub provider: String,
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub requests: u64,
}

impl ModelAggregate {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..Default::default()
        }
    }

    fn fold(&mut self, ev: &UsageEvent) {
        // First provider seen for a model sticks.
        if self.provider.is_empty() {
            self.provider = ev.provider.clone();
        }
        self.input = self.input.saturating_add(ev.usage.input);
        self.output = self.output.saturating_add(ev.usage.output);
        self.cache_read = self.cache_read.saturating_add(ev.usage.cache_read);
        self.cache_write = self.cache_write.saturating_add(ev.usage.cache_write);
        self.requests = self.requests.saturating_add(1);
    }

    pub fn tokens(&self) -> u64 {
        self.input.saturating_add(self.output)
    }

    pub fn cost(&self) -> f64 {
        estimate_cost(&self.model, &self.provider, self.input, self.output)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelSummary {
    pub models: BTreeMap<String, ModelAggregate>,
    pub stats: ScanStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Hour,
    Day,
}

impl Granularity {
    pub fn bucket_key(self, ts: DateTime<Utc>) -> String {
        match self {
            Granularity::Hour => ts.format("%Y-%m-%d %H:00").to_string(),
            Granularity::Day => ts.format("%Y-%m-%d").to_string(),
        }
    }

    fn seek_window(self, window: Duration) -> SeekWindow {
        match self {
            Granularity::Hour => SeekWindow::HourlySeries(window),
            Granularity::Day => SeekWindow::DailyTrend,
        }
    }
}

/// Totals for one truncated timestamp.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct TimeBucket {
    pub key: String,
    pub tokens: u64,
    pub cost: f64,
    pub requests: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketSeries {
    /// Ascending by key.
    pub buckets: Vec<TimeBucket>,
    pub stats: ScanStats,
}

pub fn cutoff_for(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
}

pub fn fold_models<I>(events: I) -> BTreeMap<String, ModelAggregate>
where
    I: IntoIterator<Item = UsageEvent>,
{
    let mut models: BTreeMap<String, ModelAggregate> = BTreeMap::new();
    for ev in events {
        models
            .entry(ev.model_id.clone())
            .or_insert_with(|| ModelAggregate::new(&ev.model_id))
            .fold(&ev);
    }
    models
}

/// Events without a timestamp cannot be placed in a bucket and are skipped.
pub fn fold_buckets<I>(events: I, granularity: Granularity) -> Vec<TimeBucket>
where
    I: IntoIterator<Item = UsageEvent>,
{
    let mut buckets: BTreeMap<String, TimeBucket> = BTreeMap::new();
    for ev in events {
        let Some(ts) = ev.ts else {
            continue;
        };
        let key = granularity.bucket_key(ts);
        let bucket = buckets.entry(key.clone()).or_insert_with(|| TimeBucket {
            key,
            ..Default::default()
        });
        bucket.tokens = bucket.tokens.saturating_add(ev.usage.tokens());
        bucket.cost += estimate_cost(&ev.model_id, &ev.provider, ev.usage.input, ev.usage.output);
        bucket.requests = bucket.requests.saturating_add(1);
    }
    buckets.into_values().collect()
}

/// Per-model usage over `[now - window, now]`, reading from the seek offset for `file_len`.
pub fn aggregate_models<R: Read + Seek>(
    reader: R,
    file_len: u64,
    window: Duration,
    now: DateTime<Utc>,
) -> io::Result<ModelSummary> {
    let offset = seek_offset(file_len, SeekWindow::Models(window));
    let mut events = EventLogReader::new(reader, offset, cutoff_for(now, window))?;
    let models = fold_models(events.by_ref());
    Ok(ModelSummary {
        models,
        stats: events.stats(),
    })
}

/// Bucketed usage over `[now - window, now]` in ascending key order.
pub fn aggregate_buckets<R: Read + Seek>(
    reader: R,
    file_len: u64,
    window: Duration,
    granularity: Granularity,
    now: DateTime<Utc>,
) -> io::Result<BucketSeries> {
    let offset = seek_offset(file_len, granularity.seek_window(window));
    let mut events = EventLogReader::new(reader, offset, cutoff_for(now, window))?;
    let buckets = fold_buckets(events.by_ref(), granularity);
    Ok(BucketSeries {
        buckets,
        stats: events.stats(),
    })
}
