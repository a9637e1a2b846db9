//! Usage accounting over the OpenClaw cache trace log.

pub mod aggregate;
pub mod event;
pub mod pricing;
pub mod reader;
pub mod report;
pub mod seek;
pub mod service;

pub use report::{Breakdown, SeriesMetric, TimeseriesReport, TokenMetricsReport};
pub use service::UsageService;
