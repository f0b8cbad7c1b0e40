//! Admission decisions returned by a limiter.

use chrono::{DateTime, SecondsFormat, Utc};

/// Quota state reported alongside a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Maximum requests per window
    pub limit: u32,
    /// Requests still available in the current window
    pub remaining: u32,
    /// Absolute time (epoch milliseconds) the window ends, measured from this call
    pub reset_at_ms: u64,
}

impl Quota {
    /// The reset time rendered as an RFC 3339 UTC timestamp.
    pub fn reset_at_rfc3339(&self) -> String {
        let millis = i64::try_from(self.reset_at_ms).unwrap_or(i64::MAX);
        DateTime::<Utc>::from_timestamp_millis(millis)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed. `None` means the caller could not be
    /// identified and was admitted without being metered.
    Allow(Option<Quota>),
    /// The request must be answered with 429 and go no further.
    Reject {
        /// Quota at rejection time (`remaining` is always zero)
        quota: Quota,
        /// Seconds the caller should wait before retrying
        retry_after_secs: u64,
    },
}

impl Decision {
    /// Whether the request was admitted.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }

    /// The quota reported with this decision, if the caller was metered.
    pub fn quota(&self) -> Option<&Quota> {
        match self {
            Decision::Allow(quota) => quota.as_ref(),
            Decision::Reject { quota, .. } => Some(quota),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_at_rfc3339() {
        let quota = Quota {
            limit: 3,
            remaining: 2,
            reset_at_ms: 60_000,
        };
        assert_eq!(quota.reset_at_rfc3339(), "1970-01-01T00:01:00.000Z");
    }

    #[test]
    fn test_decision_accessors() {
        let quota = Quota {
            limit: 1,
            remaining: 0,
            reset_at_ms: 10,
        };

        assert!(Decision::Allow(None).is_allowed());
        assert!(Decision::Allow(None).quota().is_none());

        let reject = Decision::Reject {
            quota,
            retry_after_secs: 1,
        };
        assert!(!reject.is_allowed());
        assert_eq!(reject.quota(), Some(&quota));
    }
}
