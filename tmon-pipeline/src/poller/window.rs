//! Advancing time window for one monitoring query

use chrono::{DateTime, Utc};
use tmon_common::{MonitorState, QueryKey};

use crate::error::PipelineError;

/// Poll window state for one query key
///
/// The cursor only moves forward and never passes `bound_end`.
#[derive(Debug, Clone)]
pub struct MonitoringWindow {
    pub key: QueryKey,
    cursor: DateTime<Utc>,
    bound_end: Option<DateTime<Utc>>,
    state: MonitorState,
}

impl MonitoringWindow {
    /// New window starting at `start`; `end` of `None` is open-ended
    pub fn new(
        key: QueryKey,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self, PipelineError> {
        if let Some(end) = end {
            if end < start {
                return Err(PipelineError::Validation(format!(
                    "window end {} precedes start {}",
                    end, start
                )));
            }
        }

        Ok(Self {
            key,
            cursor: start,
            bound_end: end,
            state: MonitorState::Idle,
        })
    }

    pub fn cursor(&self) -> DateTime<Utc> {
        self.cursor
    }

    pub fn bound_end(&self) -> Option<DateTime<Utc>> {
        self.bound_end
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn transition_to(&mut self, state: MonitorState) {
        tracing::debug!(key = %self.key, from = ?self.state, to = ?state, "Monitor state transition");
        self.state = state;
    }

    /// Upper edge of the next poll: the bound if set, else `now`
    ///
    /// Never earlier than the cursor, so a clock step backwards yields an
    /// empty window instead of a reversed one.
    pub fn upper_edge(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.bound_end.unwrap_or(now).max(self.cursor)
    }

    /// Move the cursor to `upper`, keeping it monotonic and within the bound
    pub fn advance(&mut self, upper: DateTime<Utc>) {
        let mut next = upper.max(self.cursor);
        if let Some(end) = self.bound_end {
            next = next.min(end);
        }
        self.cursor = next;
    }

    /// Whether polling up to `upper` covers the whole bounded window
    pub fn reaches_end(&self, upper: DateTime<Utc>) -> bool {
        self.bound_end == Some(upper)
    }
}
