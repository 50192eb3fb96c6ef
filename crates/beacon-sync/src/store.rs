//! Client-side notification store.
//!
//! Holds the canonical local view of one user's notifications, newest first
//! and deduplicated by id, together with the derived unread counter. The
//! counter is maintained by exact deltas and must always equal the number of
//! unread records; debug builds re-check it after every mutation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use beacon_core::models::{badge_label, ListFilter, Notification};

/// Result of [`NotificationStore::apply_insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same id was already present; nothing changed.
    Duplicate,
}

/// Result of [`NotificationStore::apply_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The record was replaced in place.
    Updated { read_changed: bool },
    /// The incoming record was identical to the stored one.
    Unchanged,
    /// The id was unknown, so the record was inserted instead.
    Inserted,
}

/// Ordered, deduplicated notification set with a derived unread count.
#[derive(Debug, Clone, Default)]
pub struct NotificationStore {
    items: Vec<Notification>,
    unread: usize,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set with a historical page.
    ///
    /// The page is sorted newest first; repeated ids keep their first
    /// occurrence.
    pub fn seed(&mut self, records: Vec<Notification>) {
        let mut seen = HashSet::with_capacity(records.len());
        let mut items: Vec<Notification> = records
            .into_iter()
            .filter(|n| seen.insert(n.id))
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        self.unread = items.iter().filter(|n| !n.read).count();
        self.items = items;
        self.debug_check();
    }

    /// Merge a newly created record. Duplicate deliveries are no-ops.
    pub fn apply_insert(&mut self, record: Notification) -> InsertOutcome {
        if self.contains(record.id) {
            return InsertOutcome::Duplicate;
        }
        if !record.read {
            self.unread += 1;
        }
        let pos = self.insert_position(record.created_at);
        self.items.insert(pos, record);
        self.debug_check();
        InsertOutcome::Inserted
    }

    /// Replace an existing record in place, or insert it when unknown.
    ///
    /// The stored creation timestamp is kept, so the record never moves.
    pub fn apply_update(&mut self, mut record: Notification) -> UpdateOutcome {
        let Some(idx) = self.position(record.id) else {
            self.apply_insert(record);
            return UpdateOutcome::Inserted;
        };

        let existing = &mut self.items[idx];
        record.created_at = existing.created_at;
        if *existing == record {
            return UpdateOutcome::Unchanged;
        }

        let was_read = existing.read;
        let now_read = record.read;
        *existing = record;
        self.adjust_unread(was_read, now_read);
        self.debug_check();
        UpdateOutcome::Updated {
            read_changed: was_read != now_read,
        }
    }

    /// Delete a record, returning it if it was present.
    pub fn remove(&mut self, id: Uuid) -> Option<Notification> {
        let idx = self.position(id)?;
        let removed = self.items.remove(idx);
        if !removed.read {
            self.unread -= 1;
        }
        self.debug_check();
        Some(removed)
    }

    /// Mark one record read after the remote write was acknowledged.
    ///
    /// Returns `true` when the record existed and was unread. Unknown ids are
    /// ignored: there is no full record to merge.
    pub fn mark_read(&mut self, id: Uuid) -> bool {
        let Some(record) = self.items.iter_mut().find(|n| n.id == id) else {
            return false;
        };
        if record.read {
            return false;
        }
        record.read = true;
        self.unread -= 1;
        self.debug_check();
        true
    }

    /// Mark every record read. Returns how many changed.
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for record in self.items.iter_mut().filter(|n| !n.read) {
            record.read = true;
            changed += 1;
        }
        self.unread = 0;
        self.debug_check();
        changed
    }

    /// Drop every read record. Returns how many were removed.
    pub fn remove_read(&mut self) -> usize {
        let before = self.items.len();
        self.items.retain(|n| !n.read);
        self.debug_check();
        before - self.items.len()
    }

    /// Recompute the counter from the set. Returns `true` if it had drifted.
    pub fn reconcile(&mut self) -> bool {
        let actual = self.recount();
        if actual == self.unread {
            return false;
        }
        tracing::warn!(
            cached = self.unread,
            actual,
            "Unread counter drifted from the notification set, reconciling"
        );
        self.unread = actual;
        true
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Notifications, newest first.
    pub fn notifications(&self) -> &[Notification] {
        &self.items
    }

    pub fn get(&self, id: Uuid) -> Option<&Notification> {
        self.items.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.position(id).is_some()
    }

    pub fn filtered(&self, filter: ListFilter) -> Vec<&Notification> {
        self.items.iter().filter(|n| filter.matches(n)).collect()
    }

    pub fn badge_label(&self) -> Option<String> {
        badge_label(self.unread)
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.items.iter().position(|n| n.id == id)
    }

    // Ahead of every record with the same or an older timestamp.
    fn insert_position(&self, created_at: DateTime<Utc>) -> usize {
        self.items.partition_point(|n| n.created_at > created_at)
    }

    fn adjust_unread(&mut self, was_read: bool, now_read: bool) {
        match (was_read, now_read) {
            (false, true) => self.unread -= 1,
            (true, false) => self.unread += 1,
            _ => {}
        }
    }

    fn recount(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    fn debug_check(&self) {
        debug_assert_eq!(self.unread, self.recount(), "unread counter drifted");
        debug_assert!(
            self.items
                .windows(2)
                .all(|w| w[0].created_at >= w[1].created_at),
            "notifications out of newest-first order"
        );
    }
}
