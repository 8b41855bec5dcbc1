//! # Expiring Window Buffer
//!
//! A fixed-capacity ring keyed by a non-decreasing integer (usually a slide
//! id). The buffer holds at most one value per key and at most `capacity`
//! consecutive keys, `[newest - capacity + 1, newest]`.
//!
//! Advancing the newest key reuses slots. Any value pushed out of the window
//! is handed back to the caller as an [`Expired`] entry instead of being
//! dropped silently, and keys skipped by the advance become explicit gaps.
//!
//! ```rust
//! use stream_knn_core::ExpiringWindowBuffer;
//!
//! let mut buffer = ExpiringWindowBuffer::new(2).unwrap();
//! assert!(buffer.push(0, "a").unwrap().is_empty());
//! assert!(buffer.push(1, "b").unwrap().is_empty());
//!
//! let expired = buffer.push(2, "c").unwrap();
//! assert_eq!(expired[0].key, 0);
//! assert_eq!(expired[0].value, "a");
//! assert!(buffer.push(0, "late").is_err());
//! ```

use crate::error::KnnError;
use thiserror::Error;
use tracing::warn;

/// A value displaced out of the window by a newer key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired<V> {
    pub key: i64,
    pub value: V,
}

/// Reason a push was refused. The buffer is left unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejected {
    #[error("key {key} is too late: newest key is {newest}, window holds {capacity} keys")]
    TooLate {
        key: i64,
        newest: i64,
        capacity: usize,
    },
}

#[derive(Debug, Clone)]
struct Slot<V> {
    key: Option<i64>,
    value: Option<V>,
}

impl<V> Slot<V> {
    fn empty() -> Self {
        Self {
            key: None,
            value: None,
        }
    }
}

/// Ring buffer with explicit expiry of displaced entries.
#[derive(Debug, Clone)]
pub struct ExpiringWindowBuffer<V> {
    slots: Vec<Slot<V>>,
    newest: Option<i64>,
}

impl<V> ExpiringWindowBuffer<V> {
    pub fn new(capacity: usize) -> Result<Self, KnnError> {
        if capacity == 0 {
            return Err(KnnError::config("window buffer capacity must be at least 1"));
        }
        Ok(Self {
            slots: (0..capacity).map(|_| Slot::empty()).collect(),
            newest: None,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot_index(&self, key: i64) -> usize {
        key.rem_euclid(self.slots.len() as i64) as usize
    }

    /// Stores `value` under `key`.
    ///
    /// * A key at least `capacity` steps behind the newest key is rejected.
    /// * A key inside the current window overwrites that key's slot.
    /// * A key beyond the newest advances the window. Entries pushed out are
    ///   returned in ascending key order; skipped keys become empty gaps.
    pub fn push(&mut self, key: i64, value: V) -> Result<Vec<Expired<V>>, Rejected> {
        let capacity = self.capacity();
        let mut expired = Vec::new();

        match self.newest {
            Some(newest) if key <= newest => {
                if newest.saturating_sub(key) >= capacity as i64 {
                    warn!(
                        "⏰ Rejected window push for key {} (newest {}, capacity {})",
                        key, newest, capacity
                    );
                    return Err(Rejected::TooLate {
                        key,
                        newest,
                        capacity,
                    });
                }
            }
            newest => {
                let window_start = key.saturating_sub(capacity as i64 - 1);
                let first = match newest {
                    Some(newest) => (newest + 1).max(window_start),
                    None => window_start,
                };
                for k in first..=key {
                    let index = self.slot_index(k);
                    let slot = &mut self.slots[index];
                    if let (Some(old_key), Some(old_value)) = (slot.key, slot.value.take()) {
                        expired.push(Expired {
                            key: old_key,
                            value: old_value,
                        });
                    }
                    slot.key = Some(k);
                }
                expired.sort_by_key(|e| e.key);
                self.newest = Some(key);
            }
        }

        let index = self.slot_index(key);
        self.slots[index] = Slot {
            key: Some(key),
            value: Some(value),
        };
        Ok(expired)
    }

    /// Raw slot read for `key`, without checking which key wrote the slot.
    ///
    /// Reading a key outside the live window returns whatever was last stored
    /// in the slot it wraps onto. Use [`Self::get_checked`] when the key is
    /// not known to be live.
    pub fn get(&self, key: i64) -> Option<&V> {
        self.slots[self.slot_index(key)].value.as_ref()
    }

    /// Returns the value stored for exactly `key`, if it is still live.
    pub fn get_checked(&self, key: i64) -> Option<&V> {
        let slot = &self.slots[self.slot_index(key)];
        if slot.key == Some(key) {
            slot.value.as_ref()
        } else {
            None
        }
    }

    pub fn get_checked_mut(&mut self, key: i64) -> Option<&mut V> {
        let index = self.slot_index(key);
        let slot = &mut self.slots[index];
        if slot.key == Some(key) {
            slot.value.as_mut()
        } else {
            None
        }
    }

    /// Highest key ever pushed.
    pub fn newest(&self) -> Option<i64> {
        self.newest
    }

    /// Lowest key in the window that still holds a value.
    pub fn oldest(&self) -> Option<i64> {
        self.iter().next().map(|(key, _)| key)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &V)> + '_ {
        let span = self.capacity() as i64 - 1;
        self.newest
            .into_iter()
            .flat_map(move |newest| newest.saturating_sub(span)..=newest)
            .filter_map(move |key| self.get_checked(key).map(|value| (key, value)))
    }

    /// Drains every live entry in ascending key order and resets the buffer.
    pub fn drain(&mut self) -> Vec<Expired<V>> {
        let mut entries: Vec<Expired<V>> = self
            .slots
            .iter_mut()
            .filter_map(|slot| match (slot.key, slot.value.take()) {
                (Some(key), Some(value)) => Some(Expired { key, value }),
                _ => None,
            })
            .collect();
        entries.sort_by_key(|e| e.key);
        self.clear();
        entries
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = Slot::empty());
        self.newest = None;
    }
}
