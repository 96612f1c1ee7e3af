//! External services for the orchestrator.
//!
//! Services provide external dependencies (like time) to the routing path
//! without coupling it to the system clock, so tests can pin "now".

use chrono::{DateTime, NaiveDate, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::domain::types::{ContextId, TimestampUtc, WorkflowId};

/// Services injected into the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct WorkflowServices {
    pub clock: WorkflowClock,
}

/// Clock service for timestamps and workflow id derivation.
#[derive(Debug, Clone, Default)]
pub struct WorkflowClock {
    fixed: Option<DateTime<Utc>>,
    last_issued_millis: Arc<AtomicI64>,
}

impl WorkflowClock {
    /// A clock frozen at `at`; ids stay unique by advancing past the last one.
    #[cfg(test)]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self {
            fixed: Some(at),
            last_issued_millis: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Returns the current UTC timestamp.
    pub fn now(&self) -> TimestampUtc {
        TimestampUtc(self.fixed.unwrap_or_else(Utc::now))
    }

    pub fn today(&self) -> NaiveDate {
        self.now().0.date_naive()
    }

    /// Derives a fresh workflow id from the session and the creation time.
    ///
    /// Creation times are issued strictly increasing (one millisecond apart at
    /// minimum) so two requests from one session never share an id.
    pub fn workflow_id(&self, context_id: &ContextId) -> WorkflowId {
        let now = self.now().0.timestamp_millis();
        let previous = self
            .last_issued_millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        WorkflowId::derive(context_id, now.max(previous + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_clock_issues_unique_ids() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = WorkflowClock::fixed(at);
        let ctx = ContextId::from("ctx");
        let first = clock.workflow_id(&ctx);
        let second = clock.workflow_id(&ctx);
        assert_eq!(
            first,
            WorkflowId::derive(&ctx, at.timestamp_millis())
        );
        assert_ne!(first, second);
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }

    #[test]
    fn test_clones_share_the_id_sequence() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = WorkflowClock::fixed(at);
        let other = clock.clone();
        let ctx = ContextId::from("ctx");
        assert_ne!(clock.workflow_id(&ctx), other.workflow_id(&ctx));
    }
}
