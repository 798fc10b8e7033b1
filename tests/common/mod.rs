#![allow(dead_code)]

use anyhow::anyhow;
use pvoutput_bridge::config::{Config, ConfigWrapper, InputChannel, PvOutput};
use pvoutput_bridge::energy_log::{ChannelAccum, LogRecord};
use pvoutput_bridge::http_pool::{HttpPool, HttpRequest, HttpResponse, PendingRequest, Transport};
use pvoutput_bridge::prelude::*;
use pvoutput_bridge::pvoutput::{ChannelData, State};
use pvoutput_bridge::scheduler::ServiceBlock;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const INTERVAL: i64 = 300;
pub const MAINS: i32 = 0;
pub const SOLAR: i32 = 1;
pub const VOLTS: i32 = 2;

/// Answers requests from a canned queue and records everything dispatched.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, String>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push_response(&self, code: u16, body: &str) {
        self.responses.lock().unwrap().push_back(Ok(HttpResponse {
            code,
            body: body.to_string(),
        }));
    }

    pub fn push_transport_error(&self, message: &str) {
        self.responses.lock().unwrap().push_back(Err(message.to_string()));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    fn dispatch(&self, request: HttpRequest) -> PendingRequest {
        self.requests.lock().unwrap().push(request);
        let outcome = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .map(|result| result.map_err(|message| anyhow!(message)))
            .unwrap_or_else(|| Err(anyhow!("no scripted response queued")));
        PendingRequest::completed(outcome)
    }
}

pub fn pv_section(revision: i32) -> PvOutput {
    PvOutput {
        revision,
        api_key: "test-api-key".to_string(),
        system_id: 4242,
        mains_channel: MAINS,
        solar_channel: SOLAR,
        http_timeout: 4000,
        report_interval: INTERVAL as u32,
        bulk_send: 1,
        max_retry_count: -1,
    }
}

pub fn test_config(timezone_offset: f64, pv: PvOutput) -> ConfigWrapper {
    ConfigWrapper::from_config(Config {
        loglevel: "info".to_string(),
        timezone_offset,
        log_file: "unused.jsonl".to_string(),
        history_file: None,
        inputs: vec![
            InputChannel { name: Some("mains".to_string()), voltage_channel: VOLTS },
            InputChannel { name: Some("solar".to_string()), voltage_channel: VOLTS },
            InputChannel { name: Some("volts".to_string()), voltage_channel: VOLTS },
        ],
        pvoutput: pv,
    })
}

pub struct Fixture {
    pub uploader: Uploader,
    pub channels: Channels,
    pub pool: Arc<HttpPool>,
    pub transport: Arc<ScriptedTransport>,
    pub block: ServiceBlock,
    pub offset_secs: i32,
}

impl Fixture {
    pub fn new(timezone_offset: f64, pv: PvOutput) -> Self {
        let channels = Channels::new();
        let pool = Arc::new(HttpPool::new(1));
        let transport = ScriptedTransport::new();
        let config = test_config(timezone_offset, pv.clone());
        let offset_secs = config.timezone_offset_secs();
        let uploader = Uploader::new(config, channels.clone(), pool.clone(), transport.clone());

        Self {
            uploader,
            channels,
            pool,
            transport,
            block: ServiceBlock::default(),
            offset_secs,
        }
    }

    pub fn send(&self, message: ChannelData) {
        self.channels.to_uploader.send(message).unwrap();
    }

    pub fn insert_record(&mut self, record: LogRecord) {
        self.uploader.adapter_mut().current_mut().insert(record);
    }

    /// One tick, with the standing invariants asserted afterwards.
    pub fn tick(&mut self) -> i64 {
        let next = self.uploader.tick(&mut self.block);
        self.assert_invariants();
        next
    }

    /// Tick until the uploader reaches `state`, failing after `limit` ticks.
    pub fn tick_until_state(&mut self, state: State, limit: usize) -> i64 {
        let mut last = 0;
        for _ in 0..limit {
            last = self.tick();
            if self.uploader.state() == state {
                return last;
            }
        }
        panic!(
            "never reached {:?} within {} ticks (stuck in {:?})",
            state,
            limit,
            self.uploader.state()
        );
    }

    pub fn assert_invariants(&self) {
        let walker = self.uploader.walker();
        if self.uploader.state() != State::Stopped
            && self.uploader.state() != State::Stopping
            && walker.unix_next_post != 0
        {
            assert!(
                walker.unix_prev_post < walker.unix_next_post,
                "prev_post {} must precede next_post {}",
                walker.unix_prev_post,
                walker.unix_next_post
            );
        }
        assert!(self.uploader.req_entries() <= 30);
        assert!(self.uploader.req_data().len() <= 4000);

        match self.uploader.state() {
            State::QueryGetStatusWait | State::PostDataWait => {}
            _ => assert!(
                !self.uploader.outstanding_request(),
                "no request may be outstanding in {:?}",
                self.uploader.state()
            ),
        }
    }
}

/// A timezone (in hours, quarter-hour granularity) that places `utc` near
/// the wanted local seconds-of-day. Tests use this to steer scenarios
/// towards or away from local midnight without fixed clocks.
pub fn zone_with_sod(utc: i64, want_sod: i64) -> f64 {
    let sod = utc.rem_euclid(86_400);
    let mut delta = want_sod - sod;
    if delta > 12 * 3600 {
        delta -= 86_400;
    }
    if delta < -12 * 3600 {
        delta += 86_400;
    }
    let delta = (delta / 900) * 900;
    delta as f64 / 3600.0
}

/// A zone placing `utc` around local midday, clear of day boundaries.
pub fn midday_zone(utc: i64) -> f64 {
    zone_with_sod(utc, 12 * 3600)
}

pub fn record(t: i64, log_hours: f64, mains: f64, solar: f64, volts: f64) -> LogRecord {
    LogRecord {
        unix_time: t,
        serial: 0.0,
        log_hours,
        channels: vec![
            ChannelAccum { accum1: mains, accum2: 0.0 },
            ChannelAccum { accum1: solar, accum2: 0.0 },
            ChannelAccum { accum1: volts, accum2: 0.0 },
        ],
    }
}

/// Fill a segment with one record every interval across `[from, to]`,
/// generating 6 kW solar and importing 1.2 kW against a 230 V reference.
pub fn fill_log(fixture: &mut Fixture, from: i64, to: i64) {
    let mut t = from;
    while t <= to {
        let hours = (t - from) as f64 / 3600.0;
        fixture.insert_record(record(
            t,
            1000.0 + hours,
            500.0 + 1200.0 * hours,
            -1000.0 - 6000.0 * hours,
            230_000.0 + 230.0 * hours,
        ));
        t += INTERVAL;
    }
}

/// Render a `getstatus` reply (`date,time,eg,pg,ec,pc,...`) whose status
/// time is `utc` in the given zone.
pub fn get_status_body(utc: i64, offset_secs: i32, eg: &str, ec: &str) -> String {
    let zone = chrono::FixedOffset::east_opt(offset_secs).unwrap();
    let local = chrono::TimeZone::timestamp_opt(&zone, utc, 0).single().unwrap();
    format!("{},{},0,{},0,NaN,NaN,230.0", local.format("%Y%m%d,%H:%M"), eg, ec)
}
