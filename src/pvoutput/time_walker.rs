use crate::prelude::*;

/// The three timestamps that say what gets posted next and what it is
/// measured against. All values are UTC seconds; day boundaries are judged
/// in the configured local zone.
///
/// `next_post` normally sits on a report-interval boundary. The exception
/// is the day-end sentinel: the remote buckets energy per local day and
/// needs a final 23:59:59 report to close each day that carried data.
#[derive(Clone, Debug)]
pub struct TimeWalker {
    pub unix_day_start: i64,
    pub unix_prev_post: i64,
    pub unix_next_post: i64,
    interval: i64,
    offset_secs: i32,
}

impl TimeWalker {
    pub fn new(interval: i64, offset_secs: i32) -> Self {
        Self {
            unix_day_start: 0,
            unix_prev_post: 0,
            unix_next_post: 0,
            interval,
            offset_secs,
        }
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }

    /// True when the pending post is a day-end sentinel.
    pub fn next_is_day_end(&self) -> bool {
        unixtime::is_day_end(self.unix_next_post, self.offset_secs)
    }

    /// Seed the walk from the remote's last accepted status time.
    pub fn init_from_last_posted(&mut self, last_posted: i64) {
        if unixtime::is_day_end(last_posted, self.offset_secs) {
            // The remote already holds the day-closing sentinel; resume at
            // the following midnight.
            self.unix_prev_post = unixtime::quantize(last_posted, self.interval);
            self.unix_next_post = last_posted;
        } else {
            let boundary = unixtime::quantize(last_posted, self.interval);
            self.unix_prev_post = boundary;
            self.unix_next_post = boundary;
        }
        self.advance(1, "init");
    }

    /// Step past a completed (or skipped) post. `increment_periods` > 1
    /// jumps holes in the log in one move.
    pub fn advance(&mut self, increment_periods: i64, label: &str) {
        let old_next = self.unix_next_post;

        if unixtime::is_day_end(old_next, self.offset_secs) {
            // Sentinel completed: one second into the new day. The previous
            // post stays put so the first report of the new day still gets
            // an instantaneous power from real data.
            self.unix_next_post = old_next + 1;
        } else {
            let raw = old_next + increment_periods * self.interval;
            self.unix_prev_post = raw - self.interval;
            self.unix_next_post = raw;

            if unixtime::local_day(raw, self.offset_secs) != unixtime::local_day(old_next, self.offset_secs) {
                // Crossed a local midnight. The day being left behind needs
                // its 23:59:59 sentinel, but only if it actually had data.
                let day_end = unixtime::local_midnight(raw, self.offset_secs) - 1;
                if unixtime::local_day(day_end, self.offset_secs)
                    == unixtime::local_day(self.unix_prev_post, self.offset_secs)
                {
                    self.unix_next_post = day_end;
                } else {
                    self.unix_next_post = day_end + 1;
                    self.unix_prev_post = self.unix_next_post - self.interval;
                }
            }
        }

        self.unix_day_start = unixtime::quantize(
            unixtime::local_midnight(self.unix_next_post, self.offset_secs),
            self.interval,
        );

        debug!(
            "time walk ({}): day_start {} prev {} next {}",
            label,
            unixtime::date_string(self.unix_day_start, self.offset_secs),
            unixtime::date_string(self.unix_prev_post, self.offset_secs),
            unixtime::date_string(self.unix_next_post, self.offset_secs),
        );
    }

    /// How many whole periods the log's next record skips past the pending
    /// post. An exact multiple lands the walk on the record itself rather
    /// than past it. Always at least one, so the walk makes progress.
    pub fn missing_periods(&self, log: &LogAdapter) -> i64 {
        match log.read_first_after(self.unix_next_post) {
            None => 1,
            Some(record) => {
                let delta = record.unix_time - self.unix_next_post;
                let mut periods = delta / self.interval;
                if delta % self.interval == 0 {
                    periods -= 1;
                }
                periods.max(1)
            }
        }
    }
}
