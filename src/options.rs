use clap::Parser;

/// PVOutput Bridge - posts energy monitor data to pvoutput.org
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read (timezone, input channel table, pvoutput section)
    #[clap(short = 'c', long = "config", default_value = "pvoutput.yaml")]
    pub config_file: String,

    /// Datalog file to upload from, overriding the config's logFile
    #[clap(short = 'l', long = "log-file")]
    pub log_file: Option<String>,

    /// Optional runtime limit in seconds
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}
