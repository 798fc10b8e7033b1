use crate::prelude::*;

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<String>,
    pub timeout_ms: u32,
}

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub code: u16,
    pub body: String,
}

/// Seam between the uploader and the actual HTTP stack; tests complete
/// requests with canned responses.
pub trait Transport: Send + Sync {
    fn dispatch(&self, request: HttpRequest) -> PendingRequest;
}

// PendingRequest {{{
/// A request in flight. The sender task fills the shared slot on
/// completion; the cooperative tick polls `ready` and never blocks.
pub struct PendingRequest {
    slot: Arc<Mutex<Option<Result<HttpResponse>>>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl PendingRequest {
    pub fn new(slot: Arc<Mutex<Option<Result<HttpResponse>>>>, handle: Option<tokio::task::JoinHandle<()>>) -> Self {
        Self { slot, handle }
    }

    /// A pre-completed request, used by transports that answer inline.
    pub fn completed(outcome: Result<HttpResponse>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(outcome))),
            handle: None,
        }
    }

    pub fn ready(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }

    /// The outcome, once ready. `None` until the sender task completes.
    pub fn take(&mut self) -> Option<Result<HttpResponse>> {
        self.slot.lock().unwrap().take()
    }

    /// Idempotent; the sender task is cancelled and any late completion is
    /// discarded with it.
    pub fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.slot.lock().unwrap().take();
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("ready", &self.ready())
            .finish()
    }
} // }}}

// ReqwestTransport {{{
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }

    async fn execute(client: reqwest::Client, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Post => client.post(&request.url),
        };
        builder = builder.timeout(Duration::from_millis(request.timeout_ms as u64));
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let code = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { code, body })
    }
}

impl Transport for ReqwestTransport {
    fn dispatch(&self, request: HttpRequest) -> PendingRequest {
        let slot = Arc::new(Mutex::new(None));
        let sender_slot = slot.clone();
        let client = self.client.clone();
        let handle = tokio::spawn(async move {
            let outcome = Self::execute(client, request).await;
            *sender_slot.lock().unwrap() = Some(outcome);
        });
        PendingRequest::new(slot, Some(handle))
    }
} // }}}

// HttpPool {{{
/// The single-in-flight gate shared by every reporter in the process.
/// Acquisition also requires the network to be up and memory pressure to
/// be clear; both flags are owned by whoever watches those resources.
pub struct HttpPool {
    free: AtomicI32,
    online: AtomicBool,
    low_memory: AtomicBool,
}

impl HttpPool {
    pub fn new(slots: i32) -> Self {
        Self {
            free: AtomicI32::new(slots),
            online: AtomicBool::new(true),
            low_memory: AtomicBool::new(false),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn set_low_memory(&self, low: bool) {
        self.low_memory.store(low, Ordering::SeqCst);
    }

    pub fn available(&self) -> bool {
        self.online() && !self.low_memory.load(Ordering::SeqCst) && self.free.load(Ordering::SeqCst) > 0
    }

    /// Take the slot if the preconditions hold. Callers must pair every
    /// successful acquisition with exactly one `release`, on abort paths
    /// included.
    pub fn try_acquire(&self) -> bool {
        if !self.online() || self.low_memory.load(Ordering::SeqCst) {
            return false;
        }
        self.free
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |free| {
                if free > 0 {
                    Some(free - 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    pub fn release(&self) {
        self.free.fetch_add(1, Ordering::SeqCst);
    }
} // }}}
