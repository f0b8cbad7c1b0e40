//! Per-identity history of admitted requests.

use std::collections::VecDeque;

/// Arrival times (epoch milliseconds) of the requests admitted for one
/// identity, oldest first.
///
/// Entries at or before the window floor are expired. They are dropped by
/// [`RequestLog::expire`] before the log is ever counted for a decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestLog {
    entries: VecDeque<u64>,
}

impl RequestLog {
    /// Create an empty request log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry at or before `floor_ms`.
    ///
    /// Arrivals recorded by concurrent handlers may land slightly out of
    /// order, so this filters the whole log instead of popping the front.
    pub fn expire(&mut self, floor_ms: u64) {
        self.entries.retain(|&ts| ts > floor_ms);
    }

    /// Record an admitted arrival.
    pub fn record(&mut self, now_ms: u64) {
        self.entries.push_back(now_ms);
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the held timestamps, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &u64> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_len() {
        let mut log = RequestLog::new();
        assert!(log.is_empty());

        log.record(10);
        log.record(20);
        assert_eq!(log.len(), 2);
        assert_eq!(log.iter().copied().collect::<Vec<_>>(), vec![10, 20]);
    }

    #[test]
    fn test_expire_drops_entries_at_or_before_floor() {
        let mut log = RequestLog::new();
        for ts in [0, 100, 500, 1000] {
            log.record(ts);
        }

        log.expire(100);
        assert_eq!(log.iter().copied().collect::<Vec<_>>(), vec![500, 1000]);
    }

    #[test]
    fn test_expire_handles_out_of_order_entries() {
        let mut log = RequestLog::new();
        log.record(300);
        log.record(50);
        log.record(400);

        log.expire(100);
        assert_eq!(log.iter().copied().collect::<Vec<_>>(), vec![300, 400]);
    }
}
