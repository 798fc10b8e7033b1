pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};

pub use crate::channels::Channels;
pub use crate::config::{self, Config, ConfigWrapper, PvOutput};
pub use crate::energy_log::{LogAdapter, LogRecord, LogSegment};
pub use crate::http_pool::HttpPool;
pub use crate::pvoutput::Uploader;
pub use crate::scheduler::{Priority, Scheduler, Service, ServiceBlock};
pub use crate::unixtime;
