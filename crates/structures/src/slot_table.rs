use std::num::NonZeroU64;

/// Key to an item in a [`SlotTable`].
///
/// Keys carry the generation of the slot they were issued for, so a key kept
/// after its item was removed will not alias a later item stored in the same
/// slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    /// Packs the key into a nonzero integer. Generations start at 1, so the
    /// result is never zero.
    #[must_use]
    pub fn to_bits(self) -> NonZeroU64 {
        let value = u64::from(self.generation) << 32 | u64::from(self.index);
        NonZeroU64::new(value).unwrap_or(NonZeroU64::MAX)
    }

    #[must_use]
    pub fn from_bits(bits: NonZeroU64) -> Self {
        let raw = bits.get();
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }

    #[must_use]
    pub fn index(self) -> u32 {
        self.index
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

/// A table of values addressed by generational keys.
///
/// Removed slots go on a free list and are reused by later inserts. A slot
/// whose generation counter saturates is retired instead of reused.
pub struct SlotTable<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotTable<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// The number of live items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts a value and returns its key.
    ///
    /// ## Panics
    ///
    /// Panics if the table would exceed `u32::MAX` slots.
    pub fn insert(&mut self, value: T) -> Key {
        self.len += 1;

        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            debug_assert!(entry.value.is_none());
            entry.value = Some(value);
            Key {
                index,
                generation: entry.generation,
            }
        } else {
            let index = u32::try_from(self.entries.len()).expect("max u32::MAX slots!");
            self.entries.push(Entry {
                generation: 1,
                value: Some(value),
            });
            Key {
                index,
                generation: 1,
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: Key) -> Option<&T> {
        let entry = self.entries.get(key.index as usize)?;
        if entry.generation == key.generation {
            entry.value.as_ref()
        } else {
            None
        }
    }

    #[must_use]
    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        let entry = self.entries.get_mut(key.index as usize)?;
        if entry.generation == key.generation {
            entry.value.as_mut()
        } else {
            None
        }
    }

    #[must_use]
    pub fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    /// Removes the value identified by the key.
    ///
    /// ## Returns
    ///
    /// Returns the value if the key is live and `None` otherwise, so removing
    /// twice is harmless.
    pub fn remove(&mut self, key: Key) -> Option<T> {
        let entry = self.entries.get_mut(key.index as usize)?;
        if entry.generation != key.generation {
            return None;
        }

        let value = entry.value.take()?;
        self.len -= 1;

        if entry.generation < u32::MAX {
            entry.generation += 1;
            self.free.push(key.index);
        }

        Some(value)
    }

    /// Iterates over all live items in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Key, &T)> + '_ {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            entry.value.as_ref().map(|value| {
                (
                    Key {
                        index: index as u32,
                        generation: entry.generation,
                    },
                    value,
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_one() {
        let mut table = SlotTable::<u32>::new();

        let key = table.insert(42);
        assert_eq!(key.index(), 0);
        assert_eq!(table.get(key), Some(&42));
        assert_eq!(table.get_mut(key), Some(&mut 42));
        assert_eq!(table.len(), 1);

        assert_eq!(table.remove(key), Some(42));
        assert_eq!(table.get(key), None);
        assert!(table.is_empty());
        assert_eq!(table.entries[0].generation, 2);
    }

    #[test]
    fn remove_twice() {
        let mut table = SlotTable::<u32>::new();
        let key = table.insert(42);

        assert_eq!(table.remove(key), Some(42));
        assert_eq!(table.remove(key), None);

        let _ = table.insert(43);
        assert_eq!(table.remove(key), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn stale_key_does_not_alias() {
        let mut table = SlotTable::<u32>::new();

        let a = table.insert(42);
        assert_eq!(table.remove(a), Some(42));

        let b = table.insert(43);
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert_eq!(table.get(a), None);
        assert_eq!(table.get(b), Some(&43));
    }

    #[test]
    fn bits() {
        let mut table = SlotTable::<u32>::new();
        let _ = table.insert(1);
        let key = table.insert(2);

        let bits = key.to_bits();
        assert_eq!(bits.get(), 1 << 32 | 1);
        assert_eq!(Key::from_bits(bits), key);
        assert_eq!(format!("{key:?}"), "Key { index: 1, generation: 1 }");
    }

    #[test]
    fn iter_skips_removed() {
        let mut table = SlotTable::<u32>::new();
        let keys = (0..5).map(|i| table.insert(i)).collect::<Vec<_>>();

        table.remove(keys[1]);
        table.remove(keys[3]);

        let values = table.iter().map(|(_, v)| *v).collect::<Vec<_>>();
        assert_eq!(values, vec![0, 2, 4]);
    }

    #[test]
    fn drop_once() {
        use std::{cell::Cell, rc::Rc};

        struct Counted(Rc<Cell<usize>>);

        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let drops = Rc::new(Cell::new(0));
        let mut table = SlotTable::new();

        let a = table.insert(Counted(drops.clone()));
        drop(table.remove(a));
        assert_eq!(drops.get(), 1);

        let _ = table.insert(Counted(drops.clone()));
        drop(table);
        assert_eq!(drops.get(), 2);
    }
}
