//! Core sliding-window limiter.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, trace, warn};

use super::decision::{Decision, Quota};
use super::request_log::RequestLog;
use super::window::WindowConfig;

/// Number of distinct identities a limiter tracks before it compacts eagerly.
pub const DEFAULT_MAX_TRACKED_IDENTITIES: usize = 10_000;

/// Current wall-clock time in epoch milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// What a limiter does when it tracks more identities than its ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactionPolicy {
    /// Drop identities whose history has fully expired and keep the rest.
    #[default]
    Sweep,
    /// Drop all tracked state.
    Clear,
}

/// Trait for admission control implementations.
///
/// The HTTP layer only sees this trait, so any limiter that can answer
/// "admit or reject this identity now" can sit in front of a route.
pub trait AdmissionControl: Send + Sync {
    /// Decide whether a request from `identity` arriving at `now_ms` is admitted.
    ///
    /// An absent or empty identity is always admitted.
    fn admit(&self, identity: Option<&str>, now_ms: u64) -> Decision;

    /// The window this limiter enforces.
    fn window(&self) -> WindowConfig;

    /// [`AdmissionControl::admit`] against the current wall clock.
    fn admit_now(&self, identity: Option<&str>) -> Decision {
        self.admit(identity, epoch_millis())
    }
}

/// An in-memory, per-process sliding-window rate limiter.
///
/// Each identity owns a [`RequestLog`]. Logs live in a sharded map, so the
/// expire-check-record step for one identity holds only that identity's
/// shard and never a limiter-wide lock.
pub struct SlidingWindowLimiter {
    /// Window length and request ceiling
    window: WindowConfig,
    /// Request logs indexed by identity
    logs: DashMap<String, RequestLog>,
    /// Tracked identity count above which compaction runs
    max_tracked_identities: usize,
    /// How compaction reclaims memory
    compaction: CompactionPolicy,
    /// Held while a compaction pass runs
    compaction_guard: Mutex<()>,
    /// Set while live identities alone exceed the ceiling
    over_ceiling: AtomicBool,
}

impl SlidingWindowLimiter {
    /// Create a limiter with the default identity ceiling and sweep compaction.
    pub fn new(window: WindowConfig) -> Self {
        Self {
            window,
            logs: DashMap::new(),
            max_tracked_identities: DEFAULT_MAX_TRACKED_IDENTITIES,
            compaction: CompactionPolicy::Sweep,
            compaction_guard: Mutex::new(()),
            over_ceiling: AtomicBool::new(false),
        }
    }

    /// Override the identity ceiling and compaction policy.
    ///
    /// A ceiling of zero compacts on every admission.
    pub fn with_compaction(
        mut self,
        max_tracked_identities: usize,
        compaction: CompactionPolicy,
    ) -> Self {
        self.max_tracked_identities = max_tracked_identities;
        self.compaction = compaction;
        self
    }

    /// Number of identities currently tracked.
    pub fn tracked_identities(&self) -> usize {
        self.logs.len()
    }

    /// Whether the last compaction left more identities than the ceiling.
    pub fn is_over_ceiling(&self) -> bool {
        self.over_ceiling.load(Ordering::Relaxed)
    }

    /// Snapshot of the timestamps held for an identity.
    ///
    /// Returns `None` if the identity is not tracked. The snapshot may still
    /// contain entries that have expired since the last call for it.
    pub fn history(&self, identity: &str) -> Option<Vec<u64>> {
        self.logs
            .get(identity)
            .map(|log| log.iter().copied().collect())
    }

    /// Reclaim memory according to the compaction policy.
    ///
    /// Returns the number of identities removed. If another compaction is
    /// already running this returns `0` immediately.
    pub fn compact(&self, now_ms: u64) -> usize {
        let Some(_guard) = self.compaction_guard.try_lock() else {
            trace!("Compaction already in progress, skipping");
            return 0;
        };

        let before = self.logs.len();
        match self.compaction {
            CompactionPolicy::Sweep => {
                let floor = self.window_floor(now_ms);
                self.logs.retain(|_, log| {
                    if let Some(floor) = floor {
                        log.expire(floor);
                    }
                    !log.is_empty()
                });
            }
            CompactionPolicy::Clear => self.logs.clear(),
        }
        let after = self.logs.len();
        let removed = before.saturating_sub(after);

        if removed > 0 {
            info!(
                policy = ?self.compaction,
                before = before,
                after = after,
                removed = removed,
                "Compacted rate limiter state"
            );
        } else {
            debug!(policy = ?self.compaction, tracked = after, "Compaction removed nothing");
        }

        // Warn once per excursion above the ceiling, not on every admission.
        let over = after > self.max_tracked_identities;
        let was_over = self.over_ceiling.swap(over, Ordering::Relaxed);
        if over && !was_over {
            warn!(
                tracked = after,
                ceiling = self.max_tracked_identities,
                "Rate limiter still above identity ceiling after compaction"
            );
        } else if !over && was_over {
            info!(
                tracked = after,
                ceiling = self.max_tracked_identities,
                "Rate limiter back under identity ceiling"
            );
        }

        removed
    }

    /// Clear all tracked state.
    pub fn clear(&self) {
        self.logs.clear();
    }

    /// Timestamps at or before this are expired. `None` while `now_ms` is
    /// still inside the first window after the epoch.
    fn window_floor(&self, now_ms: u64) -> Option<u64> {
        now_ms.checked_sub(self.window.window_ms())
    }

    fn check(&self, identity: &str, now_ms: u64) -> Decision {
        let limit = self.window.max_requests();
        let floor = self.window_floor(now_ms);
        let reset_at_ms = now_ms.saturating_add(self.window.window_ms());

        let mut log = match self.logs.get_mut(identity) {
            Some(log) => log,
            None => {
                debug!(identity = %identity, "Tracking new identity");
                self.logs.entry(identity.to_owned()).or_default()
            }
        };

        if let Some(floor) = floor {
            log.expire(floor);
        }
        let count = log.len();

        if count >= limit as usize {
            debug!(
                identity = %identity,
                count = count,
                limit = limit,
                "Rate limit exceeded"
            );
            return Decision::Reject {
                quota: Quota {
                    limit,
                    remaining: 0,
                    reset_at_ms,
                },
                retry_after_secs: self.window.retry_after_secs(),
            };
        }

        log.record(now_ms);
        let remaining = limit - (count as u32 + 1);

        Decision::Allow(Some(Quota {
            limit,
            remaining,
            reset_at_ms,
        }))
    }
}

impl AdmissionControl for SlidingWindowLimiter {
    fn admit(&self, identity: Option<&str>, now_ms: u64) -> Decision {
        let Some(identity) = identity.filter(|id| !id.is_empty()) else {
            trace!("No identity resolved, admitting without metering");
            return Decision::Allow(None);
        };

        trace!(identity = %identity, now_ms = now_ms, "Checking rate limit");

        // The shard guard taken by `check` is released before compaction
        // walks the map.
        let decision = self.check(identity, now_ms);

        if self.logs.len() > self.max_tracked_identities {
            self.compact(now_ms);
        }

        decision
    }

    fn window(&self) -> WindowConfig {
        self.window
    }
}
