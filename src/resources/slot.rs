//! Slot identities and the generation-checked slot table
//!
//! The registry keys its bookkeeping on [`SlotId`]s handed out by a
//! [`SlotTable`]. A slot index is only recycled after both the strong and
//! weak counts of its entry have reached zero, and every reuse bumps the
//! slot's generation, so a stale `SlotId` can never alias a newer entry.
//!
//! # Memory Layout
//!
//! Entries are stored in a `Vec<Slot<E>>` where each slot is either:
//! - `Occupied` - holds a live entry and the generation it was issued with
//! - `Vacant` - links to the next free slot and remembers the last generation

use std::fmt;

// ============================================================================
// Slot Identity
// ============================================================================

/// Identity of a registry slot.
///
/// Two ids are equal only if both the index and the generation match. The
/// payload stored in the slot plays no part in its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    /// Index into the slot table.
    #[must_use]
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation the slot carried when this id was issued.
    #[must_use]
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:v{}", self.index, self.generation)
    }
}

// ============================================================================
// Slot Table
// ============================================================================

#[derive(Debug)]
enum Slot<E> {
    Occupied { generation: u32, entry: E },
    /// `next_free` is `None` at the end of the free list.
    Vacant {
        generation: u32,
        next_free: Option<u32>,
    },
}

/// Dense table of entries addressed by generation-checked [`SlotId`]s.
///
/// | Operation | Time Complexity |
/// |-----------|-----------------|
/// | `insert`  | O(1) amortized  |
/// | `remove`  | O(1)            |
/// | `get`     | O(1)            |
#[derive(Debug)]
pub(crate) struct SlotTable<E> {
    slots: Vec<Slot<E>>,
    /// Head of the LIFO free list
    free_head: Option<u32>,
    /// Number of occupied slots
    len: usize,
}

impl<E> SlotTable<E> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            len: 0,
        }
    }

    /// Store an entry, reusing the most recently freed slot if there is one.
    pub(crate) fn insert(&mut self, entry: E) -> SlotId {
        self.len += 1;

        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let (generation, next_free) = match *slot {
                Slot::Vacant {
                    generation,
                    next_free,
                } => (generation, next_free),
                Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            self.free_head = next_free;
            *slot = Slot::Occupied { generation, entry };
            SlotId { index, generation }
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            assert!(index < u32::MAX, "slot table exhausted the u32 index space");
            self.slots.push(Slot::Occupied {
                generation: 0,
                entry,
            });
            SlotId {
                index,
                generation: 0,
            }
        }
    }

    /// Remove the entry for `id`, returning it.
    ///
    /// The slot's generation is bumped before it goes back on the free
    /// list. A slot whose generation is exhausted is retired instead.
    pub(crate) fn remove(&mut self, id: SlotId) -> Option<E> {
        let slot = self.slots.get_mut(id.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == id.generation => {}
            _ => return None,
        }

        let next_generation = id.generation.checked_add(1);
        let vacant = Slot::Vacant {
            generation: next_generation.unwrap_or(u32::MAX),
            next_free: next_generation.and(self.free_head),
        };
        let Slot::Occupied { entry, .. } = std::mem::replace(slot, vacant) else {
            unreachable!("slot checked as occupied above");
        };

        if next_generation.is_some() {
            self.free_head = Some(id.index);
        }
        self.len -= 1;
        Some(entry)
    }

    #[inline]
    pub(crate) fn get(&self, id: SlotId) -> Option<&E> {
        match self.slots.get(id.index as usize)? {
            Slot::Occupied { generation, entry } if *generation == id.generation => Some(entry),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: SlotId) -> Option<&mut E> {
        match self.slots.get_mut(id.index as usize)? {
            Slot::Occupied { generation, entry } if *generation == id.generation => Some(entry),
            _ => None,
        }
    }

    /// Number of occupied slots.
    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    /// Iterate over occupied entries.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &E> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied { entry, .. } => Some(entry),
            Slot::Vacant { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut table = SlotTable::with_capacity(4);
        let a = table.insert("a");
        let b = table.insert("b");

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(a), Some(&"a"));
        assert_eq!(table.get(b), Some(&"b"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_reuse_bumps_generation() {
        let mut table = SlotTable::with_capacity(0);
        let first = table.insert(1);
        assert_eq!(table.remove(first), Some(1));

        let second = table.insert(2);
        assert_eq!(first.index(), second.index(), "freed slot should be reused");
        assert_eq!(second.generation(), first.generation() + 1);

        // The stale id no longer resolves
        assert!(table.get(first).is_none());
        assert!(table.remove(first).is_none());
        assert_eq!(table.get(second), Some(&2));
    }

    #[test]
    fn test_free_list_is_lifo() {
        let mut table = SlotTable::with_capacity(0);
        let ids: Vec<_> = (0..3).map(|i| table.insert(i)).collect();

        table.remove(ids[1]);
        table.remove(ids[0]);
        table.remove(ids[2]);

        assert_eq!(table.insert(10).index(), 2);
        assert_eq!(table.insert(11).index(), 0);
        assert_eq!(table.insert(12).index(), 1);
    }

    #[test]
    fn test_double_remove() {
        let mut table = SlotTable::with_capacity(0);
        let id = table.insert(());
        assert!(table.remove(id).is_some());
        assert!(table.remove(id).is_none(), "double remove should be rejected");
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_exhausted_generation_is_retired() {
        let mut table = SlotTable::with_capacity(0);
        let id = table.insert(());
        table.slots[0] = Slot::Occupied {
            generation: u32::MAX,
            entry: (),
        };
        let last = SlotId {
            index: id.index(),
            generation: u32::MAX,
        };
        assert!(table.remove(last).is_some());

        let fresh = table.insert(());
        assert_ne!(fresh.index(), last.index(), "retired slot must not be reused");
    }

    #[test]
    fn test_iter_skips_vacant() {
        let mut table = SlotTable::with_capacity(0);
        table.insert(1);
        let middle = table.insert(2);
        table.insert(3);
        table.remove(middle);

        let values: Vec<i32> = table.iter().copied().collect();
        assert_eq!(values, vec![1, 3]);
    }

    #[test]
    fn test_slot_id_display() {
        let mut table = SlotTable::with_capacity(0);
        let id = table.insert(());
        assert_eq!(id.to_string(), "#0:v0");
    }
}
