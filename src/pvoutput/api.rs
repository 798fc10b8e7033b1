use crate::http_pool::{HttpRequest, Method};
use crate::prelude::*;

pub const GET_STATUS_URL: &str = "http://pvoutput.org/service/r2/getstatus.jsp";
pub const ADD_BATCH_STATUS_URL: &str = "http://pvoutput.org/service/r2/addbatchstatus.jsp";

/// Batch body prefix: daily-reset energies (c1=0), gross values (n=0).
pub const REQUEST_DATA_PREFIX: &str = "c1=0&n=0&data=";

/// Transaction yellow light; a request body never grows past this.
pub const REQUEST_DATA_LIMIT: usize = 4000;

/// The remote caps a batch at 30 entries.
pub const MAX_BATCH_ENTRIES: u32 = 30;

/// The remote rejects posts older than 14 days; a day of slack keeps a
/// slow catch-up clear of the limit.
pub const MAX_PAST_POST_TIME: i64 = 13 * 86_400;

/// The remote's documented failure phrases, folded into a closed taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    None,
    DateTooOld,
    DateInFuture,
    RateLimit,
    MoonPowered,
    NoStatus,
    UnmappedError,
}

impl Classification {
    /// Errors the uploader records and steps over as if the post succeeded.
    pub fn skippable(&self) -> bool {
        matches!(self, Classification::DateTooOld | Classification::MoonPowered)
    }

    /// Errors retried on an unlimited budget; they clear on their own.
    pub fn always_retry(&self) -> bool {
        matches!(self, Classification::DateInFuture | Classification::RateLimit)
    }
}

pub fn classify(code: u16, body: &str) -> Classification {
    if code == 200 || code == 204 {
        return Classification::None;
    }
    match code {
        400 if body.contains("Date is older than") => Classification::DateTooOld,
        400 if body.contains("Date is in the future") || body.contains("Invalid future date") => {
            Classification::DateInFuture
        }
        400 if body.contains("Moon powered") => Classification::MoonPowered,
        400 if body.contains("No status found") => Classification::NoStatus,
        403 if body.contains("Exceeded 60 requests per hour") => Classification::RateLimit,
        _ => Classification::UnmappedError,
    }
}

fn headers(config: &PvOutput, with_content_type: bool) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        ("Host", "pvoutput.org".to_string()),
        ("X-Pvoutput-Apikey", config.api_key.clone()),
        ("X-Pvoutput-SystemId", config.system_id.to_string()),
    ];
    if with_content_type {
        headers.push(("Content-Type", "application/x-www-form-urlencoded".to_string()));
    }
    headers
}

pub fn get_status_request(config: &PvOutput) -> HttpRequest {
    HttpRequest {
        method: Method::Get,
        url: GET_STATUS_URL.to_string(),
        headers: headers(config, false),
        body: None,
        timeout_ms: config.http_timeout,
    }
}

pub fn add_batch_request(config: &PvOutput, body: String) -> HttpRequest {
    HttpRequest {
        method: Method::Post,
        url: ADD_BATCH_STATUS_URL.to_string(),
        headers: headers(config, true),
        body: Some(body),
        timeout_ms: config.http_timeout,
    }
}
