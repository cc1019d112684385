//! # List Reconciler
//!
//! Ordered, id-unique local collection shared by the polling and event-stream
//! strategies.
//!
//! ## Invariants
//!
//! - At most one item per id.
//! - Items are always sorted by the collection comparator (newest creation
//!   time first by default, ties broken by id so ordering is stable).
//! - Overlapping add/modify events for one id never produce duplicates: both
//!   are upserts.
//!
//! ## New-item badge
//!
//! An `Added` event only counts towards [`Collection::new_item_count`] when
//! the collection already held at least one item before the add. An empty
//! collection that receives its first items is warming up, not receiving
//! news. Modified upserts and snapshots never raise the count, and removing
//! a counted item lowers it.

use crate::shared::event::StreamEvent;
use crate::shared::models::SyncItem;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Ordering of a collection
pub type Comparator<T> = fn(&T, &T) -> Ordering;

/// Default ordering: newest `created_at` first, undated items last, then by id
pub fn newest_first<T: SyncItem>(a: &T, b: &T) -> Ordering {
    let by_time = match (a.created_at(), b.created_at()) {
        (Some(left), Some(right)) => right.cmp(&left),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_time.then_with(|| a.id().cmp(b.id()))
}

/// What applying an event did to the collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Inserted,
    Replaced,
    Removed,
    Unchanged,
}

impl Reconciled {
    pub fn changed(self) -> bool {
        self != Reconciled::Unchanged
    }
}

/// Ordered local replica of one remote collection
#[derive(Debug, Clone)]
pub struct Collection<T> {
    items: Vec<T>,
    comparator: Comparator<T>,
    new_ids: HashSet<String>,
}

impl<T: SyncItem> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SyncItem> Collection<T> {
    pub fn new() -> Self {
        Self::with_comparator(newest_first::<T>)
    }

    pub fn with_comparator(comparator: Comparator<T>) -> Self {
        Self {
            items: Vec::new(),
            comparator,
            new_ids: HashSet::new(),
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.position(id).map(|pos| &self.items[pos])
    }

    pub fn new_item_count(&self) -> usize {
        self.new_ids.len()
    }

    pub fn clear_new_items(&mut self) {
        self.new_ids.clear();
    }

    /// Apply one decoded stream event
    pub fn apply(&mut self, event: StreamEvent<T>) -> Reconciled {
        match event {
            StreamEvent::Snapshot(items) => {
                self.replace_all(items);
                Reconciled::Replaced
            }
            StreamEvent::Added(item) => self.add(item),
            StreamEvent::Modified(item) => self.modify(item),
            StreamEvent::Removed { id } => self.remove(&id),
            StreamEvent::Keepalive => Reconciled::Unchanged,
        }
    }

    /// Replace the whole collection; later duplicates of an id win.
    pub fn replace_all(&mut self, incoming: Vec<T>) {
        let mut index: HashMap<String, usize> = HashMap::with_capacity(incoming.len());
        let mut items: Vec<T> = Vec::with_capacity(incoming.len());

        for mut item in incoming {
            item.normalize();
            match index.get(item.id()) {
                Some(&pos) => items[pos] = item,
                None => {
                    index.insert(item.id().to_string(), items.len());
                    items.push(item);
                }
            }
        }

        items.sort_by(self.comparator);
        self.new_ids.retain(|id| index.contains_key(id));
        self.items = items;
    }

    fn add(&mut self, mut item: T) -> Reconciled {
        item.normalize();
        if let Some(pos) = self.position(item.id()) {
            return self.replace_at(pos, item);
        }

        let warm = !self.items.is_empty();
        let id = item.id().to_string();
        self.insert_sorted(item);
        if warm {
            self.new_ids.insert(id);
        }
        Reconciled::Inserted
    }

    fn modify(&mut self, mut item: T) -> Reconciled {
        item.normalize();
        match self.position(item.id()) {
            Some(pos) => self.replace_at(pos, item),
            None => {
                self.insert_sorted(item);
                Reconciled::Inserted
            }
        }
    }

    fn remove(&mut self, id: &str) -> Reconciled {
        match self.position(id) {
            Some(pos) => {
                self.items.remove(pos);
                self.new_ids.remove(id);
                Reconciled::Removed
            }
            None => Reconciled::Unchanged,
        }
    }

    fn replace_at(&mut self, pos: usize, item: T) -> Reconciled {
        if self.items[pos] == item {
            return Reconciled::Unchanged;
        }

        if (self.comparator)(&self.items[pos], &item) == Ordering::Equal {
            self.items[pos] = item;
        } else {
            self.items.remove(pos);
            self.insert_sorted(item);
        }
        Reconciled::Replaced
    }

    fn insert_sorted(&mut self, item: T) {
        let comparator = self.comparator;
        let pos = self
            .items
            .partition_point(|existing| comparator(existing, &item) == Ordering::Less);
        self.items.insert(pos, item);
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }
}
