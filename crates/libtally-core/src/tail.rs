//! Cursor over newly recorded events

use std::time::Duration;

use crate::error::TallyError;
use crate::store::{EventFilter, EventStore};
use crate::types::event::Event;

/// Poll interval right after new events were seen
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Steady-state poll interval once the store goes quiet
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Follows the store by id, oldest first.
///
/// The interval drops to [`MIN_POLL_INTERVAL`] whenever a poll returns
/// events and doubles on every empty poll up to [`MAX_POLL_INTERVAL`].
#[derive(Debug, Clone)]
pub struct Tailer {
    cursor: i64,
    interval: Duration,
    filter: EventFilter,
}

impl Tailer {
    /// Start after everything already in the store
    pub fn from_end(store: &EventStore, filter: EventFilter) -> Result<Self, TallyError> {
        Ok(Self::from_cursor(store.max_id()?, filter))
    }

    pub fn from_cursor(cursor: i64, filter: EventFilter) -> Self {
        Self {
            cursor,
            interval: MIN_POLL_INTERVAL,
            filter,
        }
    }

    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    /// How long to wait before the next poll
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetch events recorded since the last poll and advance the cursor
    pub fn poll(&mut self, store: &EventStore) -> Result<Vec<Event>, TallyError> {
        let filter = EventFilter {
            since_id: Some(self.cursor),
            ..self.filter.clone()
        };
        let events = store.list(&filter)?;

        if let Some(last) = events.last() {
            self.cursor = self.cursor.max(last.id);
            self.interval = MIN_POLL_INTERVAL;
        } else {
            self.interval = (self.interval * 2).min(MAX_POLL_INTERVAL);
        }
        Ok(events)
    }
}
