use crate::prelude::*;

pub mod api;
pub mod encoding;
pub mod entry;
pub mod time_walker;

use crate::energy_log::JsonlReader;
use crate::http_pool::{PendingRequest, Transport};
use self::api::Classification;
use self::entry::{ChannelConfig, ReversedFlags};
use self::time_walker::TimeWalker;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Control mailbox, drained at tick entry. The firmware original used
/// process-wide flags for the same purposes.
#[derive(Clone, Debug)]
pub enum ChannelData {
    /// A (possibly reloaded) pvoutput config section. Same revision as the
    /// running one is a no-op; a new revision restarts the service.
    Config(config::PvOutput),
    Stop,
    ReportStatus,
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Stopped,
    Stopping,
    Initialize,
    QueryGetStatus,
    QueryGetStatusWait,
    CollateData,
    PostData,
    PostDataWait,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Stopped => "STOPPED",
            State::Stopping => "STOPPING",
            State::Initialize => "INITIALIZE",
            State::QueryGetStatus => "QUERY_GET_STATUS",
            State::QueryGetStatusWait => "QUERY_GET_STATUS_WAIT",
            State::CollateData => "COLLATE_DATA",
            State::PostData => "POST_DATA",
            State::PostDataWait => "POST_DATA_WAIT",
        }
    }
}

/// One step of the collection procedure.
enum Collect {
    /// An entry was encoded, or the walk moved past an unpostable window.
    Progressed,
    /// The log could not answer; try again shortly, nothing advanced.
    NotReady,
}

/// The PVOutput uploader. A cooperative state machine: the scheduler calls
/// `tick`, every tick does a bounded amount of work, and the return value
/// says when to call again (0 = deschedule, 1 = next pass, else UNIX time).
pub struct Uploader {
    config: ConfigWrapper,
    pv: Option<config::PvOutput>,
    state: State,
    walker: TimeWalker,
    req_data: String,
    req_entries: u32,
    retry_count: i32,
    reversed: ReversedFlags,
    request: Option<PendingRequest>,
    pool: Arc<HttpPool>,
    transport: Arc<dyn Transport>,
    adapter: LogAdapter,
    log_reader: Option<JsonlReader>,
    history_reader: Option<JsonlReader>,
    mailbox: broadcast::Receiver<ChannelData>,
}

impl Uploader {
    pub fn new(
        config: ConfigWrapper,
        channels: Channels,
        pool: Arc<HttpPool>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let offset = config.timezone_offset_secs();
        Self {
            config,
            pv: None,
            state: State::Stopped,
            walker: TimeWalker::new(300, offset),
            req_data: api::REQUEST_DATA_PREFIX.to_string(),
            req_entries: 0,
            retry_count: 0,
            reversed: ReversedFlags::default(),
            request: None,
            pool,
            transport,
            adapter: LogAdapter::default(),
            log_reader: None,
            history_reader: None,
            mailbox: channels.to_uploader.subscribe(),
        }
    }

    /// Wire up the datalog files the monitor writes. Tests feed the adapter
    /// directly instead.
    pub fn attach_log_files(&mut self, current: JsonlReader, history: Option<JsonlReader>) {
        self.adapter = LogAdapter::new(LogSegment::new(), history.as_ref().map(|_| LogSegment::new()));
        self.log_reader = Some(current);
        self.history_reader = history;
    }

    pub fn adapter_mut(&mut self) -> &mut LogAdapter {
        &mut self.adapter
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn walker(&self) -> &TimeWalker {
        &self.walker
    }

    pub fn req_entries(&self) -> u32 {
        self.req_entries
    }

    pub fn req_data(&self) -> &str {
        &self.req_data
    }

    pub fn retry_count(&self) -> i32 {
        self.retry_count
    }

    pub fn reversed_flags(&self) -> ReversedFlags {
        self.reversed
    }

    pub fn outstanding_request(&self) -> bool {
        self.request.is_some()
    }

    pub fn tick(&mut self, block: &mut ServiceBlock) -> i64 {
        self.drain_mailbox();
        self.poll_logs();

        let now = unixtime::now();
        match self.state {
            State::Stopped => 0,
            State::Stopping => {
                info!("pvoutput: stopped");
                self.state = State::Stopped;
                0
            }
            State::Initialize => self.tick_initialize(block, now),
            State::QueryGetStatus => self.tick_query(now),
            State::QueryGetStatusWait => self.tick_query_wait(now),
            State::CollateData => self.tick_collate(now),
            State::PostData => self.tick_post(now),
            State::PostDataWait => self.tick_post_wait(now),
        }
    }

    /// Running state as a document, config snapshot included (api key
    /// redacted).
    pub fn status(&self) -> serde_json::Value {
        let offset = self.config.timezone_offset_secs();
        let config = self.pv.as_ref().map(|pv| {
            let mut value = serde_json::to_value(pv).unwrap_or(serde_json::Value::Null);
            if let Some(map) = value.as_object_mut() {
                map.insert("apiKey".to_string(), json!("**redacted**"));
            }
            value
        });

        json!({
            "state": self.state.as_str(),
            "dayStart": unixtime::date_string(self.walker.unix_day_start, offset),
            "prevPost": unixtime::date_string(self.walker.unix_prev_post, offset),
            "nextPost": unixtime::date_string(self.walker.unix_next_post, offset),
            "unixDayStart": self.walker.unix_day_start,
            "unixPrevPost": self.walker.unix_prev_post,
            "unixNextPost": self.walker.unix_next_post,
            "mainsChannelReversed": self.reversed.mains,
            "solarChannelReversed": self.reversed.solar,
            "reqEntries": self.req_entries,
            "retryCount": self.retry_count,
            "reqData": self.req_data.clone(),
            "outstandingHttpRequest": self.request.is_some(),
            "config": config,
        })
    }

    // control plane {{{
    fn drain_mailbox(&mut self) {
        loop {
            match self.mailbox.try_recv() {
                Ok(ChannelData::Config(pv)) => self.apply_config(pv),
                Ok(ChannelData::Stop) | Ok(ChannelData::Shutdown) => {
                    if self.state != State::Stopped {
                        self.reset_session();
                        self.state = State::Stopping;
                    }
                }
                Ok(ChannelData::ReportStatus) => {
                    info!("pvoutput: status {}", self.status());
                }
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!("pvoutput: control mailbox lagged, {} messages dropped", missed);
                }
                Err(_) => break,
            }
        }
    }

    fn apply_config(&mut self, pv: config::PvOutput) {
        if let Err(err) = pv.validate() {
            error!("pvoutput: rejecting config: {}", err);
            self.reset_session();
            self.state = State::Stopped;
            return;
        }

        if self.pv.as_ref().map(|current| current.revision) == Some(pv.revision) {
            debug!("pvoutput: config revision {} unchanged, ignoring", pv.revision);
            return;
        }

        info!("pvoutput: config revision {} accepted, (re)initializing", pv.revision);
        self.reset_session();
        self.pv = Some(pv);
        self.state = State::Initialize;
    }

    /// Abort any in-flight request and drop per-session accumulation.
    /// Learned CT orientation is per-config, so it resets too.
    fn reset_session(&mut self) {
        self.abort_request();
        self.req_data = api::REQUEST_DATA_PREFIX.to_string();
        self.req_entries = 0;
        self.retry_count = 0;
        self.reversed = ReversedFlags::default();
    }

    fn abort_request(&mut self) {
        if let Some(mut request) = self.request.take() {
            request.abort();
            self.pool.release();
        }
    }
    // }}}

    fn poll_logs(&mut self) {
        if let Some(reader) = &mut self.history_reader {
            if let Some(segment) = self.adapter.history_mut() {
                if let Err(err) = reader.poll(segment) {
                    warn!("pvoutput: history log poll failed: {}", err);
                }
            }
        }
        if let Some(reader) = &mut self.log_reader {
            if let Err(err) = reader.poll(self.adapter.current_mut()) {
                warn!("pvoutput: datalog poll failed: {}", err);
            }
        }
    }

    // states {{{
    fn tick_initialize(&mut self, block: &mut ServiceBlock, now: i64) -> i64 {
        let pv = match &self.pv {
            Some(pv) => pv,
            None => {
                self.state = State::Stopped;
                return 0;
            }
        };

        if !self.adapter.is_open() {
            debug!("pvoutput: datalog not yet available, delaying start");
            return now + 5;
        }

        info!("pvoutput: started");
        info!("pvoutput:    systemId: {}", pv.system_id);
        info!("pvoutput:    reportInterval: {}s", pv.report_interval);
        info!(
            "pvoutput:    mainsChannel: {}, solarChannel: {}",
            pv.mains_channel, pv.solar_channel
        );
        info!("pvoutput:    bulkSend: {}, maxRetryCount: {}", pv.bulk_send, pv.max_retry_count);

        self.walker = TimeWalker::new(pv.report_interval(), self.config.timezone_offset_secs());
        block.priority = Priority::Low;
        self.state = State::QueryGetStatus;
        1
    }

    fn tick_query(&mut self, now: i64) -> i64 {
        let pv = match &self.pv {
            Some(pv) => pv.clone(),
            None => return 0,
        };

        if !self.pool.try_acquire() {
            return now + 1;
        }

        debug!("pvoutput: querying remote for last posted status");
        self.request = Some(self.transport.dispatch(api::get_status_request(&pv)));
        self.state = State::QueryGetStatusWait;
        1
    }

    fn tick_query_wait(&mut self, now: i64) -> i64 {
        if !self.request.as_ref().map_or(true, |r| r.ready()) {
            return now + 1;
        }

        let outcome = match self.request.take() {
            Some(mut request) => {
                self.pool.release();
                request.take()
            }
            None => None,
        };
        let pv = match &self.pv {
            Some(pv) => pv.clone(),
            None => return 0,
        };

        let response = match outcome {
            Some(Ok(response)) => response,
            _ => {
                warn!("pvoutput: getstatus transport failure, retrying in 5s");
                self.state = State::QueryGetStatus;
                return now + 5;
            }
        };

        if response.code == 200 {
            let offset = self.config.timezone_offset_secs();
            match encoding::parse_get_status(&response.body, offset) {
                Ok(last_posted) => {
                    info!(
                        "pvoutput: remote last posted {}",
                        unixtime::date_string(last_posted, offset)
                    );
                    self.walker.init_from_last_posted(last_posted);
                    self.state = State::CollateData;
                    return 1;
                }
                Err(err) => {
                    warn!("pvoutput: getstatus parse failed ({}), re-querying", err);
                    self.state = State::QueryGetStatus;
                    return now + 1;
                }
            }
        }

        match api::classify(response.code, &response.body) {
            Classification::NoStatus => {
                // Brand-new remote system: begin just inside the postable
                // window so the first entries are accepted.
                let interval = pv.report_interval();
                let start = now - api::MAX_PAST_POST_TIME + 2 * interval;
                info!(
                    "pvoutput: remote has no status yet, starting from {}",
                    unixtime::date_string(start, self.config.timezone_offset_secs())
                );
                self.walker.init_from_last_posted(start);
                self.state = State::CollateData;
                1
            }
            Classification::RateLimit => {
                warn!("pvoutput: rate limited on getstatus, waiting one interval");
                self.state = State::QueryGetStatus;
                now + pv.report_interval()
            }
            classification => {
                warn!(
                    "pvoutput: getstatus failed ({:?}, HTTP {}), re-querying",
                    classification, response.code
                );
                self.state = State::QueryGetStatus;
                now + 1
            }
        }
    }

    fn tick_collate(&mut self, now: i64) -> i64 {
        let pv = match &self.pv {
            Some(pv) => pv.clone(),
            None => return 0,
        };

        if self.req_data.len() < api::REQUEST_DATA_LIMIT {
            if let Some(last_key) = self.adapter.last_key() {
                if self.walker.unix_next_post <= last_key {
                    if let Collect::NotReady = self.collect_one(now, &pv) {
                        return now + 1;
                    }
                }
            }
        }

        let realtime = self.req_entries >= pv.bulk_send && self.walker.unix_next_post >= now;
        let full = self.req_entries >= api::MAX_BATCH_ENTRIES || self.req_data.len() >= api::REQUEST_DATA_LIMIT;
        if realtime || full {
            if self.pool.available() {
                self.state = State::PostData;
                return 1;
            }
            return now + 1;
        }

        // Wait for the pending post's time; if that has already passed we
        // are waiting on the log to catch up instead.
        let next = self.walker.unix_next_post;
        if next <= now {
            now + 1
        } else {
            next
        }
    }

    fn tick_post(&mut self, now: i64) -> i64 {
        let pv = match &self.pv {
            Some(pv) => pv.clone(),
            None => return 0,
        };

        if !self.pool.try_acquire() {
            return now + 1;
        }

        debug!(
            "pvoutput: posting {} entries ({} bytes)",
            self.req_entries,
            self.req_data.len()
        );
        let request = api::add_batch_request(&pv, self.req_data.clone());
        self.request = Some(self.transport.dispatch(request));
        self.state = State::PostDataWait;
        1
    }

    fn tick_post_wait(&mut self, now: i64) -> i64 {
        if !self.request.as_ref().map_or(true, |r| r.ready()) {
            return now + 1;
        }

        let outcome = match self.request.take() {
            Some(mut request) => {
                self.pool.release();
                request.take()
            }
            None => None,
        };
        let pv = match &self.pv {
            Some(pv) => pv.clone(),
            None => return 0,
        };

        let response = match outcome {
            Some(Ok(response)) => response,
            _ => {
                warn!("pvoutput: post transport failure, retrying in 5s");
                self.state = State::PostData;
                return now + 5;
            }
        };

        let classification = api::classify(response.code, &response.body);
        match classification {
            Classification::None => {
                debug!("pvoutput: posted {} entries", self.req_entries);
                self.retry_count = 0;
                self.reset_request_buffer();
                self.state = State::CollateData;
                1
            }
            c if c.skippable() => {
                warn!(
                    "pvoutput: remote refused batch ({:?}: {}), skipping {} entries",
                    c,
                    response.body.trim(),
                    self.req_entries
                );
                self.retry_count = 0;
                self.reset_request_buffer();
                self.state = State::CollateData;
                1
            }
            c if c.always_retry() => {
                // The remote will accept this batch eventually; never drop it.
                self.retry_count += 1;
                warn!(
                    "pvoutput: post deferred ({:?}), retry {} in {}s",
                    c, self.retry_count, pv.report_interval
                );
                self.state = State::PostData;
                now + pv.report_interval()
            }
            c => {
                if pv.retries_unlimited() || self.retry_count < pv.max_retry_count {
                    self.retry_count += 1;
                    warn!(
                        "pvoutput: post failed ({:?}, HTTP {}: {}), retry {} in {}s",
                        c,
                        response.code,
                        response.body.trim(),
                        self.retry_count,
                        pv.report_interval
                    );
                    self.state = State::PostData;
                    now + pv.report_interval()
                } else {
                    error!(
                        "pvoutput: dropping {} entries after {} failed posts (HTTP {}: {})",
                        self.req_entries,
                        self.retry_count,
                        response.code,
                        response.body.trim()
                    );
                    self.retry_count = 0;
                    self.reset_request_buffer();
                    self.state = State::CollateData;
                    1
                }
            }
        }
    }
    // }}}

    fn reset_request_buffer(&mut self) {
        self.req_data = api::REQUEST_DATA_PREFIX.to_string();
        self.req_entries = 0;
    }

    /// One step of the collection procedure: skip an unpostable window,
    /// skip an empty one, or encode exactly one entry and advance.
    fn collect_one(&mut self, now: i64, pv: &config::PvOutput) -> Collect {
        let offset = self.config.timezone_offset_secs();
        let interval = pv.report_interval();

        // Too old for the remote to accept; step past without a request.
        if self.walker.unix_next_post + api::MAX_PAST_POST_TIME < now {
            let periods = (now - api::MAX_PAST_POST_TIME - self.walker.unix_next_post) / interval + 1;
            warn!(
                "pvoutput: {} is beyond the postable window, skipping {} periods",
                unixtime::date_string(self.walker.unix_next_post, offset),
                periods
            );
            self.walker.advance(periods, "too old");
            return Collect::Progressed;
        }

        let prev_record = match self.adapter.read_at_or_before(self.walker.unix_prev_post) {
            Some(record) => record,
            None => return Collect::NotReady,
        };

        // A sentinel post reads one second further so the record written at
        // midnight still lands in the closing day.
        let additional = if self.walker.next_is_day_end() { 1 } else { 0 };
        let next_record = match self.adapter.read_at_or_before(self.walker.unix_next_post + additional) {
            Some(record) => record,
            None => return Collect::NotReady,
        };

        // Nothing was logged in this period. Skip it, unless this is the
        // forced first entry of a new day.
        let start_of_day = unixtime::seconds_of_day(self.walker.unix_next_post, offset) == 0;
        if next_record.log_hours == prev_record.log_hours && !start_of_day {
            let periods = self.walker.missing_periods(&self.adapter);
            debug!(
                "pvoutput: no data for {}, skipping {} periods",
                unixtime::date_string(self.walker.unix_next_post, offset),
                periods
            );
            self.walker.advance(periods, "no data");
            return Collect::Progressed;
        }

        let day_start_record = match self.adapter.read_at_or_before(self.walker.unix_day_start) {
            Some(record) => record,
            None => return Collect::NotReady,
        };

        let channels = ChannelConfig::resolve(&self.config.inputs(), pv.mains_channel, pv.solar_channel);
        let entry = entry::calculate(
            self.walker.unix_next_post,
            &prev_record,
            &next_record,
            &day_start_record,
            channels,
            &mut self.reversed,
        );

        let encoded = encoding::encode_entry(&entry, offset);
        if self.req_entries > 0 {
            self.req_data.push(';');
        }
        self.req_data.push_str(&encoded);
        self.req_entries += 1;
        debug!(
            "pvoutput: collated entry {} for {}",
            self.req_entries,
            unixtime::date_string(entry.unix_time, offset)
        );

        self.walker.advance(1, "collected");
        Collect::Progressed
    }
}

impl Service for Uploader {
    fn name(&self) -> &'static str {
        "pvoutput"
    }

    fn tick(&mut self, block: &mut ServiceBlock) -> i64 {
        Uploader::tick(self, block)
    }
}
