use crate::prelude::*;
use std::time::Duration;

/// Tie breaker when several services are due on the same pass; lower runs
/// later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High,
    Med,
    Low,
}

#[derive(Clone, Copy, Debug)]
pub struct ServiceBlock {
    pub priority: Priority,
}

impl Default for ServiceBlock {
    fn default() -> Self {
        Self {
            priority: Priority::Med,
        }
    }
}

/// A cooperatively scheduled service. Each tick does a bounded amount of
/// work and returns when to run next: 0 = deschedule, 1 = next pass, any
/// other value = at or after that UNIX time.
pub trait Service: Send {
    fn name(&self) -> &'static str;
    fn tick(&mut self, block: &mut ServiceBlock) -> i64;
}

struct Slot {
    service: Box<dyn Service>,
    block: ServiceBlock,
    call_time: i64,
    scheduled: bool,
}

/// Drives registered services from a single task. Control messages wake
/// the loop early and re-schedule descheduled services so a stopped
/// service can observe a fresh config.
pub struct Scheduler {
    channels: Channels,
    services: Vec<Slot>,
}

impl Scheduler {
    pub fn new(channels: Channels) -> Self {
        Self {
            channels,
            services: Vec::new(),
        }
    }

    pub fn register(&mut self, service: Box<dyn Service>) {
        info!("scheduler: registered service {}", service.name());
        self.services.push(Slot {
            service,
            block: ServiceBlock::default(),
            call_time: 1,
            scheduled: true,
        });
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("scheduler: starting with {} services", self.services.len());
        let mut control = self.channels.to_uploader.subscribe();
        let mut shutting_down = false;

        loop {
            let now = unixtime::now();

            self.services.sort_by_key(|slot| slot.block.priority);
            for slot in &mut self.services {
                if !slot.scheduled || slot.call_time > now {
                    continue;
                }
                let next = slot.service.tick(&mut slot.block);
                if next == 0 {
                    debug!("scheduler: service {} descheduled", slot.service.name());
                    slot.scheduled = false;
                } else {
                    slot.call_time = next;
                }
            }

            if self.services.iter().all(|slot| !slot.scheduled) {
                if shutting_down {
                    info!("scheduler: all services stopped, exiting");
                    return Ok(());
                }
                // Nothing runnable until a control message arrives.
                match control.recv().await {
                    Ok(message) => {
                        shutting_down |= matches!(message, crate::pvoutput::ChannelData::Shutdown);
                        self.wake_all(unixtime::now());
                    }
                    Err(_) => return Ok(()),
                }
                continue;
            }

            let wait = self
                .services
                .iter()
                .filter(|slot| slot.scheduled)
                .map(|slot| (slot.call_time - unixtime::now()).max(0))
                .min()
                .unwrap_or(0);

            if wait == 0 {
                // Due now; yield so spawned request tasks get polled.
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(wait as u64)) => {}
                message = control.recv() => {
                    match message {
                        Ok(message) => {
                            shutting_down |= matches!(message, crate::pvoutput::ChannelData::Shutdown);
                            self.wake_all(unixtime::now());
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            info!("scheduler: control channel closed, exiting");
                            return Ok(());
                        }
                        Err(_) => {}
                    }
                }
            }
        }
    }

    /// Make every service due immediately, re-scheduling stopped ones so
    /// they can drain their mailboxes.
    fn wake_all(&mut self, now: i64) {
        for slot in &mut self.services {
            slot.scheduled = true;
            slot.call_time = now;
        }
    }
}
