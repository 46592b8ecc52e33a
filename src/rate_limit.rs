//! Per-host token buckets for outbound hub traffic.
//!
//! Every host gets `capacity` tokens per `period`, refilled as a whole at
//! each period boundary counted from the moment its bucket was created.
//! A caller may reserve tokens from a later period when that period starts
//! within its `max_wait`; otherwise nothing is reserved and the caller is
//! expected to try again on a later pass.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use url::Url;

use crate::error::Error;

#[derive(Debug)]
pub struct Bucket {
    capacity: u64,
    period: Duration,
    start: Instant,
    window: u64,
    available: i64,
}

impl Bucket {
    pub fn new(capacity: u64, period: Duration, start: Instant) -> Self {
        Bucket {
            capacity,
            period,
            start,
            window: 0,
            available: capacity as i64,
        }
    }

    fn window_at(&self, now: Instant) -> u64 {
        let period = self.period.as_nanos().max(1);
        let elapsed = now.saturating_duration_since(self.start).as_nanos();
        (elapsed / period) as u64
    }

    fn window_start(&self, window: u64) -> Instant {
        let offset = self.period.as_nanos().saturating_mul(window as u128);
        let offset = u64::try_from(offset).unwrap_or(u64::MAX);
        self.start + Duration::from_nanos(offset)
    }

    fn adjust(&mut self, now: Instant) {
        let window = self.window_at(now);

        if window > self.window {
            let refill = (window - self.window)
                .saturating_mul(self.capacity)
                .min(i64::MAX as u64) as i64;
            self.available = self
                .available
                .saturating_add(refill)
                .min(self.capacity as i64);
            self.window = window;
        }
    }

    /// Reserves `count` tokens if they are available within `max_wait` of
    /// `now` and returns how long the caller has to wait before using them.
    pub fn take_max_duration(
        &mut self,
        now: Instant,
        count: u64,
        max_wait: Duration,
    ) -> Option<Duration> {
        if count == 0 {
            return Some(Duration::ZERO);
        }

        if self.capacity == 0 {
            return None;
        }

        self.adjust(now);

        let count = count as i64;

        if self.available >= count {
            self.available -= count;
            return Some(Duration::ZERO);
        }

        let deficit = (count - self.available) as u64;
        let windows = deficit.div_ceil(self.capacity);
        let ready_at = self.window_start(self.window + windows);
        let wait = ready_at.saturating_duration_since(now);

        if wait > max_wait {
            return None;
        }

        self.available -= count;

        Some(wait)
    }
}

/// Lazily created buckets keyed by destination host.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u64,
    period: Duration,
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
}

impl RateLimiter {
    pub fn new(capacity: u64, period: Duration) -> Self {
        RateLimiter {
            capacity,
            period,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    async fn bucket(&self, host: &str) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.read().await.get(host) {
            return bucket.clone();
        }

        let mut buckets = self.buckets.write().await;

        buckets
            .entry(host.to_owned())
            .or_insert_with(|| {
                debug!(host, "rate limit: creating bucket");
                Arc::new(Mutex::new(Bucket::new(
                    self.capacity,
                    self.period,
                    Instant::now(),
                )))
            })
            .clone()
    }

    pub async fn take_max_duration(
        &self,
        host: &str,
        count: u64,
        max_wait: Duration,
    ) -> Option<Duration> {
        let bucket = self.bucket(host).await;
        let mut bucket = bucket.lock().await;

        bucket.take_max_duration(Instant::now(), count, max_wait)
    }
}

/// Host component of a hub url, with the port when one is given.
pub fn host_of(hub: &str) -> Result<String, Error> {
    let url = Url::parse(hub)?;

    let host = match url.host_str() {
        Some(host) => host,
        None => return Err(Error::MissingHost(hub.to_owned())),
    };

    match url.port() {
        Some(port) => Ok(format!("{}:{}", host, port)),
        None => Ok(host.to_owned()),
    }
}
