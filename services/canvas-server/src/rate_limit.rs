use crate::config::RateLimitConfig;
use crate::shutdown::ShutdownListener;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::debug;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Rejected; the identity may try again after `retry_after`.
    Limited { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// Per-identity cooldown gate.
///
/// Each identity maps to the instant of its last accepted update. All
/// access to one identity goes through its map shard lock, so admission
/// checks for the same identity are serialized and the sweep never races
/// an in-progress check.
pub struct RateLimiter {
    last_accepted: DashMap<String, Instant>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            last_accepted: DashMap::new(),
            config,
        }
    }

    /// Admit `identity` if its cooldown has elapsed, recording now as its
    /// last accepted instant. A rejection leaves the record untouched.
    pub fn try_acquire(&self, identity: &str) -> Admission {
        let now = Instant::now();
        match self.last_accepted.entry(identity.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(now);
                Admission::Allowed
            }
            Entry::Occupied(mut entry) => {
                let elapsed = now.saturating_duration_since(*entry.get());
                if elapsed >= self.config.cooldown {
                    entry.insert(now);
                    Admission::Allowed
                } else {
                    Admission::Limited {
                        retry_after: self.config.cooldown - elapsed,
                    }
                }
            }
        }
    }

    pub fn allow(&self, identity: &str) -> bool {
        self.try_acquire(identity).is_allowed()
    }

    /// Forget identities idle for longer than the retention period.
    ///
    /// Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let retention = self.config.retention;
        let mut removed = 0;
        self.last_accepted.retain(|_, last| {
            let keep = now.saturating_duration_since(*last) <= retention;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.last_accepted.len()
    }

    /// Run [`sweep`](Self::sweep) every sweep interval until shutdown.
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown: ShutdownListener) -> JoinHandle<()> {
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep();
                        debug!(removed, remaining = self.tracked(), "Rate limiter sweep");
                    }
                }
            }
            debug!("Rate limiter sweeper stopped");
        })
    }
}
