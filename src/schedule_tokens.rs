use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::sync_util::lock_ignore_poison;

#[derive(Debug, Clone, Copy)]
struct Entry {
    sequence_number: i64,
    enqueue_at: DateTime<Utc>,
}

/// Tracks broker sequence numbers of scheduled sends by schedule token.
///
/// An entry is added when a send carrying a `schedule_token_id` is accepted
/// by the broker. It lives until the schedule is cancelled or its enqueue
/// time passes, whichever comes first. Expired entries are never returned
/// and are pruned whenever a new entry is recorded.
#[derive(Debug, Default)]
pub(crate) struct ScheduleTokenCache {
    entries: Mutex<HashMap<Uuid, Entry>>,
}

impl ScheduleTokenCache {
    /// Remember `sequence_number` for `token_id`, replacing any older entry.
    pub fn record(&self, token_id: Uuid, sequence_number: i64, enqueue_at: DateTime<Utc>) {
        // ---
        let now = Utc::now();
        let mut entries = lock_ignore_poison(&self.entries);

        entries.retain(|_, entry| entry.enqueue_at > now);
        entries.insert(
            token_id,
            Entry {
                sequence_number,
                enqueue_at,
            },
        );
    }

    /// Sequence number recorded for `token_id`, unless its enqueue time is
    /// at or before `now`.
    pub fn get(&self, token_id: &Uuid, now: DateTime<Utc>) -> Option<i64> {
        lock_ignore_poison(&self.entries)
            .get(token_id)
            .filter(|entry| entry.enqueue_at > now)
            .map(|entry| entry.sequence_number)
    }

    /// Forget `token_id`, but only while it still maps to `sequence_number`.
    ///
    /// Returns true if the entry was removed.
    pub fn remove_if(&self, token_id: &Uuid, sequence_number: i64) -> bool {
        // ---
        let mut entries = lock_ignore_poison(&self.entries);
        match entries.get(token_id) {
            Some(entry) if entry.sequence_number == sequence_number => {
                entries.remove(token_id);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        lock_ignore_poison(&self.entries).len()
    }
}
