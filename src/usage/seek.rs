//! Size-based tail seeking for the usage log.
//!
//! The trace log is append-only and can reach several gigabytes, so short windows only read the
//! tail of the file. Events that are older than the seek point are dropped even when they would
//! pass the time filter: on a log that grows faster than `threshold` bytes per window the
//! reported totals are a lower bound. This is a known accuracy/latency trade-off and applies to
//! every scan path.

use std::time::Duration;

const MB: u64 = 1_000_000;
const DAY_SECS: u64 = 24 * 60 * 60;

pub const ONE_DAY_TAIL_BYTES: u64 = 50 * MB;
pub const ONE_WEEK_TAIL_BYTES: u64 = 200 * MB;
pub const HOURLY_SERIES_TAIL_BYTES: u64 = 100 * MB;
pub const DAILY_TREND_TAIL_BYTES: u64 = 500 * MB;

/// What a scan is for; each kind has its own tail budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWindow {
    /// Per-model summary over the given lookback.
    Models(Duration),
    /// Hourly time series over the given lookback.
    HourlySeries(Duration),
    /// Daily trend pass of the breakdown view.
    DailyTrend,
}

impl SeekWindow {
    /// Tail budget in bytes, or `None` to always read the whole file.
    pub fn tail_bytes(self) -> Option<u64> {
        match self {
            SeekWindow::Models(window) => {
                let days = window.as_secs().div_ceil(DAY_SECS);
                if days <= 1 {
                    Some(ONE_DAY_TAIL_BYTES)
                } else if days <= 7 {
                    Some(ONE_WEEK_TAIL_BYTES)
                } else {
                    None
                }
            }
            SeekWindow::HourlySeries(window) => {
                if window.as_secs() <= DAY_SECS {
                    Some(HOURLY_SERIES_TAIL_BYTES)
                } else {
                    SeekWindow::Models(window).tail_bytes()
                }
            }
            SeekWindow::DailyTrend => Some(DAILY_TREND_TAIL_BYTES),
        }
    }
}

/// Byte offset to start reading from. A file of exactly the budget size is read whole.
pub fn seek_offset(file_size: u64, window: SeekWindow) -> u64 {
    match window.tail_bytes() {
        Some(tail) if file_size > tail => file_size - tail,
        _ => 0,
    }
}
