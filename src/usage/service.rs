use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::aggregate::{
    BucketSeries, Granularity, ModelSummary, aggregate_buckets, aggregate_models,
};
use super::report::{Breakdown, DailyTrendPoint, SeriesMetric, TimeseriesReport, TokenMetricsReport};
use crate::cache::ResultCache;
use crate::error::UsageError;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const BREAKDOWN_DAYS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelsQuery {
    pub days: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeriesQuery {
    pub metric: SeriesMetric,
    pub hours: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrendQuery {
    pub days: u32,
}

/// Cached, read-only views over the usage trace log.
pub struct UsageService {
    trace_file: PathBuf,
    ttl: Duration,
    models: ResultCache<ModelsQuery, Arc<TokenMetricsReport>>,
    series: ResultCache<SeriesQuery, Arc<TimeseriesReport>>,
    trend: ResultCache<TrendQuery, Arc<Vec<DailyTrendPoint>>>,
}

impl UsageService {
    pub fn new(trace_file: PathBuf, ttl: Duration) -> Self {
        Self {
            trace_file,
            ttl,
            models: ResultCache::new(),
            series: ResultCache::new(),
            trend: ResultCache::new(),
        }
    }

    pub fn trace_file(&self) -> &Path {
        &self.trace_file
    }

    pub async fn token_metrics(&self, days: u32) -> Result<Arc<TokenMetricsReport>, UsageError> {
        let path = self.trace_file.clone();
        self.models
            .get_or_compute(ModelsQuery { days }, self.ttl, || async move {
                let summary = run_blocking(move || {
                    scan_models(&path, DAY * days, Utc::now())
                })
                .await?;
                Ok(Arc::new(TokenMetricsReport::from_models(days, &summary.models)))
            })
            .await
    }

    pub async fn timeseries(
        &self,
        metric: SeriesMetric,
        hours: u32,
    ) -> Result<Arc<TimeseriesReport>, UsageError> {
        let path = self.trace_file.clone();
        self.series
            .get_or_compute(SeriesQuery { metric, hours }, self.ttl, || async move {
                let series = run_blocking(move || {
                    scan_buckets(&path, HOUR * hours, Granularity::Hour, Utc::now())
                })
                .await?;
                Ok(Arc::new(TimeseriesReport::from_buckets(metric, &series.buckets)))
            })
            .await
    }

    pub async fn daily_trend(&self, days: u32) -> Result<Arc<Vec<DailyTrendPoint>>, UsageError> {
        let path = self.trace_file.clone();
        self.trend
            .get_or_compute(TrendQuery { days }, self.ttl, || async move {
                let series = run_blocking(move || {
                    scan_buckets(&path, DAY * days, Granularity::Day, Utc::now())
                })
                .await?;
                Ok(Arc::new(
                    series.buckets.iter().map(DailyTrendPoint::from).collect(),
                ))
            })
            .await
    }

    /// Per-model split plus the daily trend, both over the last week.
    pub async fn breakdown(&self) -> Result<Breakdown, UsageError> {
        let models = self.token_metrics(BREAKDOWN_DAYS).await?;
        let trend = self.daily_trend(BREAKDOWN_DAYS).await?;
        Ok(Breakdown::new(&models, trend.as_ref().clone()))
    }

    #[cfg(test)]
    pub fn invalidate(&self) {
        self.models.invalidate_all();
        self.series.invalidate_all();
        self.trend.invalidate_all();
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, UsageError>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| UsageError::Join(e.to_string()))?
        .map_err(UsageError::from)
}

/// A missing log is an empty history.
fn open_trace(path: &Path) -> io::Result<Option<(File, u64)>> {
    match File::open(path) {
        Ok(file) => {
            let len = file.metadata()?.len();
            Ok(Some((file, len)))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

pub fn scan_models(path: &Path, window: Duration, now: DateTime<Utc>) -> io::Result<ModelSummary> {
    let Some((file, len)) = open_trace(path)? else {
        debug!(path = %path.display(), "usage log not found");
        return Ok(ModelSummary::default());
    };
    let summary = aggregate_models(file, len, window, now)?;
    debug!(
        path = %path.display(),
        window_secs = window.as_secs(),
        offset = summary.stats.start_offset,
        bytes = summary.stats.bytes_read,
        malformed = summary.stats.malformed,
        models = summary.models.len(),
        "scanned usage log"
    );
    Ok(summary)
}

pub fn scan_buckets(
    path: &Path,
    window: Duration,
    granularity: Granularity,
    now: DateTime<Utc>,
) -> io::Result<BucketSeries> {
    let Some((file, len)) = open_trace(path)? else {
        debug!(path = %path.display(), "usage log not found");
        return Ok(BucketSeries::default());
    };
    let series = aggregate_buckets(file, len, window, granularity, now)?;
    debug!(
        path = %path.display(),
        window_secs = window.as_secs(),
        ?granularity,
        offset = series.stats.start_offset,
        bytes = series.stats.bytes_read,
        malformed = series.stats.malformed,
        buckets = series.buckets.len(),
        "scanned usage log"
    );
    Ok(series)
}
