use crate::prelude::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;

// LogRecord {{{
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAccum {
    pub accum1: f64,
    pub accum2: f64,
}

/// One datalog measurement as written by the monitor. Accumulators are
/// double-integrated watt-hour totals; `log_hours` is the denominator that
/// turns accumulator deltas into averages.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub unix_time: i64,
    #[serde(default)]
    pub serial: f64,
    pub log_hours: f64,
    #[serde(default = "Vec::new")]
    pub channels: Vec<ChannelAccum>,
}

impl LogRecord {
    /// Accumulator 1 for a configured channel index; absent channels (-1 or
    /// out of range) read as zero.
    pub fn accum1(&self, channel: i32) -> f64 {
        if channel < 0 {
            return 0.0;
        }
        self.channels.get(channel as usize).map_or(0.0, |c| c.accum1)
    }

    /// The monitor occasionally writes NaN accumulators; scrub them to zero
    /// before any arithmetic sees them.
    fn sanitized(mut self) -> Self {
        if self.serial.is_nan() {
            self.serial = 0.0;
        }
        if self.log_hours.is_nan() {
            self.log_hours = 0.0;
        }
        for channel in &mut self.channels {
            if channel.accum1.is_nan() {
                channel.accum1 = 0.0;
            }
            if channel.accum2.is_nan() {
                channel.accum2 = 0.0;
            }
        }
        self
    }
} // }}}

// LogSegment {{{
/// One contiguous slice of the datalog, keyed by UNIX time.
#[derive(Clone, Debug, Default)]
pub struct LogSegment {
    records: BTreeMap<i64, LogRecord>,
}

impl LogSegment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: LogRecord) {
        self.records.insert(record.unix_time, record);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn first_key(&self) -> Option<i64> {
        self.records.keys().next().copied()
    }

    pub fn last_key(&self) -> Option<i64> {
        self.records.keys().next_back().copied()
    }

    fn at_or_before(&self, t: i64) -> Option<&LogRecord> {
        self.records.range(..=t).next_back().map(|(_, r)| r)
    }

    fn first_after(&self, t: i64) -> Option<&LogRecord> {
        self.records.range(t + 1..).next().map(|(_, r)| r)
    }

    fn oldest(&self) -> Option<&LogRecord> {
        self.records.values().next()
    }
} // }}}

// LogAdapter {{{
/// Read-only unified view over the current segment and an optional colder
/// historical segment. Every record handed out is a sanitised copy.
#[derive(Clone, Debug, Default)]
pub struct LogAdapter {
    history: Option<LogSegment>,
    current: LogSegment,
}

impl LogAdapter {
    pub fn new(current: LogSegment, history: Option<LogSegment>) -> Self {
        Self { history, current }
    }

    pub fn is_open(&self) -> bool {
        !self.current.is_empty() || self.history.as_ref().map_or(false, |h| !h.is_empty())
    }

    pub fn current_mut(&mut self) -> &mut LogSegment {
        &mut self.current
    }

    pub fn history_mut(&mut self) -> Option<&mut LogSegment> {
        self.history.as_mut()
    }

    pub fn first_key(&self) -> Option<i64> {
        let history = self.history.as_ref().and_then(|h| h.first_key());
        match (history, self.current.first_key()) {
            (Some(h), Some(c)) => Some(h.min(c)),
            (h, c) => h.or(c),
        }
    }

    pub fn last_key(&self) -> Option<i64> {
        let history = self.history.as_ref().and_then(|h| h.last_key());
        match (history, self.current.last_key()) {
            (Some(h), Some(c)) => Some(h.max(c)),
            (h, c) => h.or(c),
        }
    }

    fn history_covers(&self, t: i64) -> bool {
        match &self.history {
            Some(h) => match (h.first_key(), h.last_key()) {
                (Some(first), Some(last)) => t >= first && t <= last,
                _ => false,
            },
            None => false,
        }
    }

    /// Record with the greatest key <= `t`, or the oldest record when `t`
    /// precedes the whole log. `None` means the log is empty, which callers
    /// treat as a retryable wait.
    pub fn read_at_or_before(&self, t: i64) -> Option<LogRecord> {
        let found = if self.history_covers(t + 1) {
            let history = self.history.as_ref().unwrap();
            history.at_or_before(t).or_else(|| self.current.at_or_before(t))
        } else {
            self.current
                .at_or_before(t)
                .or_else(|| self.history.as_ref().and_then(|h| h.at_or_before(t)))
        };

        found
            .or_else(|| self.history.as_ref().and_then(|h| h.oldest()))
            .or_else(|| self.current.oldest())
            .cloned()
            .map(LogRecord::sanitized)
    }

    /// Record with the smallest key > `t`, consulting the historical
    /// segment first when `t + 1` falls inside its range.
    pub fn read_first_after(&self, t: i64) -> Option<LogRecord> {
        let found = if self.history_covers(t + 1) {
            let history = self.history.as_ref().unwrap();
            history.first_after(t).or_else(|| self.current.first_after(t))
        } else {
            self.current
                .first_after(t)
                .or_else(|| self.history.as_ref().and_then(|h| h.first_after(t)))
        };

        found.cloned().map(LogRecord::sanitized)
    }
} // }}}

// JsonlReader {{{
/// Tails a JSON-lines datalog file, feeding complete appended lines into a
/// segment. The monitor owns the file; we only ever read it.
#[derive(Debug)]
pub struct JsonlReader {
    path: PathBuf,
    offset: u64,
}

impl JsonlReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    /// Read any new complete lines, returning how many records were added.
    /// A missing file is not an error; the monitor may not have written yet.
    pub fn poll(&mut self, segment: &mut LogSegment) -> Result<usize> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(anyhow!("open {}: {}", self.path.display(), err)),
        };

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(self.offset))?;

        let mut added = 0;
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                break;
            }
            if !line.ends_with('\n') {
                // partial trailing line, pick it up next poll
                break;
            }
            self.offset += n as u64;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<LogRecord>(trimmed) {
                Ok(record) => {
                    segment.insert(record);
                    added += 1;
                }
                Err(err) => warn!("skipping malformed datalog line: {}", err),
            }
        }

        Ok(added)
    }
} // }}}
