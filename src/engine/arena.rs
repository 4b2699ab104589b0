//! Generation-checked slot arena.
//!
//! Connections and channels live in arenas and are referred to by
//! [`Index`]. Removing an entry bumps its slot generation, so a handle kept
//! past removal no longer resolves even after the slot is reused. Freed slots
//! are reused lowest-first, which keeps slot numbers small and stable for
//! logging.

use std::collections::BTreeSet;

/// Handle to an arena entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Index {
    slot: u32,
    generation: u32,
}

impl Index {
    /// Slot number. Unique among live entries, reused after removal.
    pub fn slot(&self) -> u32 {
        self.slot
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot arena with generation-checked handles.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: BTreeSet<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: BTreeSet::new(),
            len: 0,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the arena has no live entries.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index the next insert will return.
    pub fn next_index(&self) -> Index {
        match self.free.first() {
            Some(&slot) => Index {
                slot,
                generation: self.slots[slot as usize].generation,
            },
            None => Index {
                slot: self.slots.len() as u32,
                generation: 0,
            },
        }
    }

    /// Insert a value built from its own index.
    pub fn insert_with(&mut self, build: impl FnOnce(Index) -> T) -> Index {
        let index = self.next_index();
        let value = build(index);
        if self.free.remove(&index.slot) {
            self.slots[index.slot as usize].value = Some(value);
        } else {
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
        }
        self.len += 1;
        index
    }

    /// Insert a value.
    #[cfg(test)]
    pub fn insert(&mut self, value: T) -> Index {
        self.insert_with(|_| value)
    }

    /// Shared access to a live entry.
    pub fn get(&self, index: Index) -> Option<&T> {
        self.slots
            .get(index.slot as usize)
            .filter(|s| s.generation == index.generation)
            .and_then(|s| s.value.as_ref())
    }

    /// Exclusive access to a live entry.
    pub fn get_mut(&mut self, index: Index) -> Option<&mut T> {
        self.slots
            .get_mut(index.slot as usize)
            .filter(|s| s.generation == index.generation)
            .and_then(|s| s.value.as_mut())
    }

    /// Whether `index` refers to a live entry.
    pub fn contains(&self, index: Index) -> bool {
        self.get(index).is_some()
    }

    /// Remove an entry, invalidating every handle to it.
    pub fn remove(&mut self, index: Index) -> Option<T> {
        let slot = self.slots.get_mut(index.slot as usize)?;
        if slot.generation != index.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.insert(index.slot);
        self.len -= 1;
        Some(value)
    }

    /// Handles of all live entries in slot order.
    pub fn indices(&self) -> Vec<Index> {
        self.iter().map(|(index, _)| index).collect()
    }

    /// Iterate live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Index, &T)> {
        self.slots.iter().enumerate().filter_map(|(slot, s)| {
            s.value.as_ref().map(|v| {
                (
                    Index {
                        slot: slot as u32,
                        generation: s.generation,
                    },
                    v,
                )
            })
        })
    }
}
