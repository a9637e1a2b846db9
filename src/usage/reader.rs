use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{trace, warn};

use super::event::{UsageEvent, parse_event_line};

const READ_BUF_SIZE: usize = 64 * 1024;

/// Counters collected while scanning; exposed for logging and tests.
#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub start_offset: u64,
    pub bytes_read: u64,
    pub lines: u64,
    pub malformed: u64,
    pub stale: u64,
    pub yielded: u64,
    pub io_error: bool,
}

/// Lazy sequence of usage events read from an append-only JSONL log.
///
/// Starting at a non-zero offset drops the first (possibly partial) line unless the offset sits
/// exactly on a line boundary. Malformed lines are skipped. Events older than `cutoff` are
/// skipped; events without a timestamp are always yielded and left to the caller.
pub struct EventLogReader<R> {
    inner: BufReader<R>,
    cutoff: Option<DateTime<Utc>>,
    line: Vec<u8>,
    stats: ScanStats,
    done: bool,
}

impl<R: Read + Seek> EventLogReader<R> {
    pub fn new(mut reader: R, offset: u64, cutoff: Option<DateTime<Utc>>) -> io::Result<Self> {
        let mut stats = ScanStats {
            start_offset: offset,
            ..Default::default()
        };
        let at_line_start = if offset == 0 {
            true
        } else {
            reader.seek(SeekFrom::Start(offset - 1))?;
            let mut prev = [0u8; 1];
            let n = reader.read(&mut prev)?;
            n == 1 && prev[0] == b'\n'
        };
        if offset > 0 && !at_line_start {
            reader.seek(SeekFrom::Start(offset))?;
        }

        let mut inner = BufReader::with_capacity(READ_BUF_SIZE, reader);
        if !at_line_start {
            let mut partial = Vec::new();
            let skipped = inner.read_until(b'\n', &mut partial)?;
            stats.bytes_read += skipped as u64;
        }

        Ok(Self {
            inner,
            cutoff,
            line: Vec::with_capacity(1024),
            stats,
            done: false,
        })
    }
}

impl<R> EventLogReader<R> {
    pub fn stats(&self) -> ScanStats {
        self.stats
    }
}

impl<R: Read> Iterator for EventLogReader<R> {
    type Item = UsageEvent;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.line.clear();
            let n = match self.inner.read_until(b'\n', &mut self.line) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("usage log read failed, keeping partial scan: {}", err);
                    self.stats.io_error = true;
                    self.done = true;
                    return None;
                }
            };
            self.stats.bytes_read += n as u64;

            let text = String::from_utf8_lossy(&self.line);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            self.stats.lines += 1;

            let event = match parse_event_line(text) {
                Ok(ev) => ev,
                Err(err) => {
                    trace!("skipping usage log line: {}", err);
                    self.stats.malformed += 1;
                    continue;
                }
            };
            if let (Some(cutoff), Some(ts)) = (self.cutoff, event.ts)
                && ts < cutoff
            {
                self.stats.stale += 1;
                continue;
            }
            self.stats.yielded += 1;
            return Some(event);
        }
        None
    }
}
