use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::aggregate::{ModelAggregate, TimeBucket};
use super::pricing::round_to;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TokenMetrics {
    pub model: String,
    pub provider: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub cache_hits: u64,
    pub cache_writes: u64,
    pub requests: u64,
}

impl From<&ModelAggregate> for TokenMetrics {
    fn from(m: &ModelAggregate) -> Self {
        Self {
            model: m.model.clone(),
            provider: m.provider.clone(),
            input_tokens: m.input,
            output_tokens: m.output,
            cost: m.cost(),
            cache_hits: m.cache_read,
            cache_writes: m.cache_write,
            requests: m.requests,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TokenMetricsReport {
    pub period_days: u32,
    /// Heaviest models first.
    pub models: Vec<TokenMetrics>,
    pub total_tokens: u64,
    pub total_cost: f64,
}

impl TokenMetricsReport {
    pub fn from_models(period_days: u32, models: &BTreeMap<String, ModelAggregate>) -> Self {
        let mut rows: Vec<TokenMetrics> = models.values().map(TokenMetrics::from).collect();
        rows.sort_by(|a, b| {
            (b.input_tokens + b.output_tokens)
                .cmp(&(a.input_tokens + a.output_tokens))
                .then_with(|| a.model.cmp(&b.model))
        });
        let total_tokens = models.values().map(ModelAggregate::tokens).sum();
        let total_cost = models.values().map(ModelAggregate::cost).sum::<f64>();
        Self {
            period_days,
            models: rows,
            total_tokens,
            total_cost: round_to(total_cost, 2),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SeriesMetric {
    #[default]
    Tokens,
    Cost,
    Requests,
}

impl SeriesMetric {
    /// Unknown names fall back to request counts.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tokens" => SeriesMetric::Tokens,
            "cost" => SeriesMetric::Cost,
            _ => SeriesMetric::Requests,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SeriesMetric::Tokens => "tokens",
            SeriesMetric::Cost => "cost",
            SeriesMetric::Requests => "requests",
        }
    }
}

impl fmt::Display for SeriesMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(untagged)]
pub enum MetricValue {
    Count(u64),
    Amount(f64),
}

impl MetricValue {
    pub fn as_f64(self) -> f64 {
        match self {
            MetricValue::Count(n) => n as f64,
            MetricValue::Amount(v) => v,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TimePoint {
    pub timestamp: String,
    pub value: MetricValue,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TimeseriesReport {
    pub metric: SeriesMetric,
    pub data: Vec<TimePoint>,
}

impl TimeseriesReport {
    pub fn from_buckets(metric: SeriesMetric, buckets: &[TimeBucket]) -> Self {
        let data = buckets
            .iter()
            .map(|b| {
                let value = match metric {
                    SeriesMetric::Tokens => MetricValue::Count(b.tokens),
                    SeriesMetric::Cost => MetricValue::Amount(round_to(b.cost, 4)),
                    SeriesMetric::Requests => MetricValue::Count(b.requests),
                };
                let label = b
                    .key
                    .split_once(' ')
                    .map(|(_, hour)| hour.to_string())
                    .unwrap_or_else(|| b.key.clone());
                TimePoint {
                    timestamp: b.key.clone(),
                    value,
                    label,
                }
            })
            .collect();
        Self { metric, data }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelBreakdown {
    pub model: String,
    pub tokens: u64,
    pub cost: f64,
    pub requests: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailyTrendPoint {
    pub date: String,
    pub tokens: u64,
    pub cost: f64,
}

impl From<&TimeBucket> for DailyTrendPoint {
    fn from(b: &TimeBucket) -> Self {
        Self {
            date: b.key.clone(),
            tokens: b.tokens,
            cost: round_to(b.cost, 2),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Breakdown {
    pub by_model: Vec<ModelBreakdown>,
    pub daily_trend: Vec<DailyTrendPoint>,
}

impl Breakdown {
    pub fn new(models: &TokenMetricsReport, daily_trend: Vec<DailyTrendPoint>) -> Self {
        // `models.models` is already sorted heaviest first.
        let by_model = models
            .models
            .iter()
            .map(|m| ModelBreakdown {
                model: m.model.clone(),
                tokens: m.input_tokens + m.output_tokens,
                cost: round_to(m.cost, 2),
                requests: m.requests,
            })
            .collect();
        Self {
            by_model,
            daily_trend,
        }
    }
}
