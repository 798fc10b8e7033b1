use crate::prelude::*;

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    /// Hours east of UTC; all day accounting is done in this zone.
    #[serde(default)]
    pub timezone_offset: f64,

    /// Current datalog segment (JSON lines, appended by the monitor).
    pub log_file: String,

    /// Optional cold segment holding records older than the current file.
    #[serde(default)]
    pub history_file: Option<String>,

    #[serde(default = "Vec::new")]
    pub inputs: Vec<InputChannel>,

    pub pvoutput: PvOutput,
}

// InputChannel {{{
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputChannel {
    #[serde(default)]
    pub name: Option<String>,

    /// Index of the channel carrying this input's voltage reference.
    pub voltage_channel: i32,
}

impl InputChannel {
    pub fn voltage_channel(&self) -> i32 {
        self.voltage_channel
    }
} // }}}

// PvOutput {{{
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PvOutput {
    /// Change detection only; an identical value across reloads is a no-op.
    pub revision: i32,

    pub api_key: String,
    pub system_id: i32,

    #[serde(default = "PvOutput::default_channel")]
    pub mains_channel: i32,
    #[serde(default = "PvOutput::default_channel")]
    pub solar_channel: i32,

    /// Milliseconds.
    #[serde(default = "PvOutput::default_http_timeout")]
    pub http_timeout: u32,

    /// Seconds; a multiple of the remote's five-minute quantum.
    #[serde(default = "PvOutput::default_report_interval")]
    pub report_interval: u32,

    /// Realtime posts fire once this many entries are buffered.
    #[serde(default = "PvOutput::default_bulk_send")]
    pub bulk_send: u32,

    /// Consecutive failed posts tolerated before data is skipped; -1 retries forever.
    #[serde(default = "PvOutput::default_max_retry_count")]
    pub max_retry_count: i32,
}

impl PvOutput {
    fn default_channel() -> i32 {
        -1
    }

    fn default_http_timeout() -> u32 {
        4000
    }

    fn default_report_interval() -> u32 {
        300
    }

    fn default_bulk_send() -> u32 {
        1
    }

    fn default_max_retry_count() -> i32 {
        -1
    }

    pub fn report_interval(&self) -> i64 {
        self.report_interval as i64
    }

    pub fn retries_unlimited(&self) -> bool {
        self.max_retry_count < 0
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            bail!("pvoutput.apiKey must not be empty");
        }
        if self.system_id <= 0 {
            bail!("pvoutput.systemId must be positive, got {}", self.system_id);
        }
        if self.http_timeout == 0 {
            bail!("pvoutput.httpTimeout must be positive");
        }
        if self.report_interval < 300 || self.report_interval % 300 != 0 {
            bail!(
                "pvoutput.reportInterval must be a multiple of 300 and >= 300, got {}",
                self.report_interval
            );
        }
        if self.bulk_send < 1 || self.bulk_send > 30 {
            bail!("pvoutput.bulkSend must be 1..=30, got {}", self.bulk_send);
        }
        if self.max_retry_count < -1 {
            bail!(
                "pvoutput.maxRetryCount must be -1 or a retry count, got {}",
                self.max_retry_count
            );
        }
        if self.mains_channel < 0 && self.solar_channel < 0 {
            bail!("pvoutput needs at least one of mainsChannel / solarChannel");
        }
        Ok(())
    }
} // }}}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;

        info!("Configuration loaded successfully:");
        info!("  Input channels: {}", config.inputs.len());
        info!(
            "  PVOutput: system {} every {}s, bulk send {}",
            config.pvoutput.system_id, config.pvoutput.report_interval, config.pvoutput.bulk_send
        );

        Ok(config)
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    pub fn validate(&self) -> Result<()> {
        self.pvoutput.validate()?;

        for channel in [self.pvoutput.mains_channel, self.pvoutput.solar_channel] {
            if channel >= 0 && channel as usize >= self.inputs.len() {
                bail!(
                    "channel {} is not in the input table ({} inputs)",
                    channel,
                    self.inputs.len()
                );
            }
        }

        Ok(())
    }

    pub fn timezone_offset_secs(&self) -> i32 {
        (self.timezone_offset * 3600.0) as i32
    }
}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    pub fn loglevel(&self) -> String {
        self.config.lock().unwrap().loglevel.clone()
    }

    pub fn timezone_offset_secs(&self) -> i32 {
        self.config.lock().unwrap().timezone_offset_secs()
    }

    pub fn log_file(&self) -> String {
        self.config.lock().unwrap().log_file.clone()
    }

    pub fn history_file(&self) -> Option<String> {
        self.config.lock().unwrap().history_file.clone()
    }

    pub fn inputs(&self) -> Vec<InputChannel> {
        self.config.lock().unwrap().inputs.clone()
    }

    pub fn pvoutput(&self) -> PvOutput {
        self.config.lock().unwrap().pvoutput.clone()
    }

    pub fn replace(&self, new: Config) {
        *self.config.lock().unwrap() = new;
    }
}
