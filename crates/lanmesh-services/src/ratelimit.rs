//! Per-source datagram throttle.
//!
//! Counts datagrams per sender IP inside one shared window. When the window
//! ends every counter resets at once, so a source that was throttled gets a
//! full fresh budget at the same instant as everyone else.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Length of the shared counting window.
pub const WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    counts: DashMap<IpAddr, u32>,
    limit: u32,
    window: Duration,
    next_reset: Mutex<Instant>,
    dropped: AtomicU64,
}

impl RateLimiter {
    /// `limit` datagrams per source per minute.
    pub fn new(limit: u32) -> Self {
        Self::with_window(limit, WINDOW, Instant::now())
    }

    pub fn with_window(limit: u32, window: Duration, start: Instant) -> Self {
        Self {
            counts: DashMap::new(),
            limit,
            window,
            next_reset: Mutex::new(start + window),
            dropped: AtomicU64::new(0),
        }
    }

    /// Count one datagram from `source`. Returns false if it must be dropped.
    pub fn check(&self, source: IpAddr) -> bool {
        self.check_at(source, Instant::now())
    }

    pub fn check_at(&self, source: IpAddr, now: Instant) -> bool {
        {
            let mut next_reset = self.next_reset.lock().unwrap_or_else(|e| e.into_inner());
            if now >= *next_reset {
                self.counts.clear();
                *next_reset = now + self.window;
            }
        }

        let count = {
            let mut entry = self.counts.entry(source).or_insert(0);
            *entry = entry.saturating_add(1);
            *entry
        };

        if count > self.limit {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Datagrams dropped since start.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Sources seen in the current window.
    pub fn tracked(&self) -> usize {
        self.counts.len()
    }
}
