//! Insertion-ordered set with oldest-first eviction.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A set of ids that never grows past `cap`; the oldest entry is evicted
/// first. Serializes as a plain list, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedSet {
    order: VecDeque<String>,
    members: HashSet<String>,
    cap: usize,
}

impl BoundedSet {
    /// Create an empty set holding at most `cap` ids.
    pub fn new(cap: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            cap: cap.max(1),
        }
    }

    /// Rebuild from a persisted list (oldest first), trimming to `cap`.
    pub fn from_ids(ids: impl IntoIterator<Item = String>, cap: usize) -> Self {
        let mut set = Self::new(cap);
        for id in ids {
            set.insert(id);
        }
        set
    }

    /// Insert `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.members.contains(&id) {
            return false;
        }
        self.members.insert(id.clone());
        self.order.push_back(id);
        while self.order.len() > self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Ids, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Change the cap, evicting the oldest entries if it shrank.
    pub fn set_cap(&mut self, cap: usize) {
        self.cap = cap.max(1);
        while self.order.len() > self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
    }
}

impl Serialize for BoundedSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.order.iter())
    }
}

impl<'de> Deserialize<'de> for BoundedSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ids = Vec::<String>::deserialize(deserializer)?;
        // Callers re-apply their configured cap via `set_cap`.
        let cap = ids.len().max(1);
        Ok(Self::from_ids(ids, cap))
    }
}
