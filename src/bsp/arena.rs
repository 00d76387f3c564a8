//! Generation-tagged fixed-capacity arena
//!
//! Slots never move. Removing a value bumps the slot's generation, so keys
//! to the old occupant stop resolving even after the slot is reused.

/// Handle to an arena slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Key {
    index: u8,
    generation: u16,
}

impl Key {
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(self) -> u16 {
        self.generation
    }
}

struct Slot<T> {
    generation: u16,
    value: Option<T>,
}

impl<T> Slot<T> {
    const VACANT: Self = Slot {
        generation: 0,
        value: None,
    };
}

/// At most 256 slots, addressed by `u8` index
pub struct Arena<T, const N: usize> {
    slots: [Slot<T>; N],
    len: usize,
}

impl<T, const N: usize> Arena<T, N> {
    const CAPACITY_OK: () = assert!(N <= 256, "arena index is a u8");

    pub const fn new() -> Self {
        let () = Self::CAPACITY_OK;
        Arena {
            slots: [const { Slot::VACANT }; N],
            len: 0,
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == N
    }

    fn key_at(&self, index: usize) -> Key {
        Key {
            index: index as u8,
            generation: self.slots[index].generation,
        }
    }

    /// Store `value` in the first free slot, handing it back when full
    pub fn insert(&mut self, value: T) -> Result<Key, T> {
        match self.slots.iter().position(|s| s.value.is_none()) {
            Some(index) => self.insert_at(index, value),
            None => Err(value),
        }
    }

    /// Store `value` in slot `index` if it is free
    pub fn insert_at(&mut self, index: usize, value: T) -> Result<Key, T> {
        match self.slots.get_mut(index) {
            Some(slot) if slot.value.is_none() => {
                slot.value = Some(value);
                self.len += 1;
                Ok(self.key_at(index))
            }
            _ => Err(value),
        }
    }

    pub fn get(&self, key: Key) -> Option<&T> {
        let slot = self.slots.get(key.index())?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        let slot = self.slots.get_mut(key.index())?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_mut()
    }

    #[inline]
    pub fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    /// Take the value out and invalidate every key to it
    pub fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.slots.get_mut(key.index())?;
        if slot.generation != key.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.len -= 1;
        Some(value)
    }

    /// Key of the occupant of slot `index`
    pub fn key_of(&self, index: usize) -> Option<Key> {
        let slot = self.slots.get(index)?;
        slot.value.as_ref().map(|_| self.key_at(index))
    }

    /// First occupant matching `pred`
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<Key> {
        self.iter().find(|(_, v)| pred(v)).map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let value = slot.value.as_ref()?;
            Some((
                Key {
                    index: index as u8,
                    generation: slot.generation,
                },
                value,
            ))
        })
    }
}

impl<T, const N: usize> Default for Arena<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_until_full() {
        let mut arena: Arena<u32, 2> = Arena::new();
        let a = arena.insert(1).unwrap();
        let b = arena.insert(2).unwrap();
        assert_ne!(a, b);
        assert!(arena.is_full());
        assert_eq!(arena.insert(3), Err(3));
        assert_eq!(arena.get(a), Some(&1));
        assert_eq!(arena.get(b), Some(&2));
    }

    #[test]
    fn test_stale_key_after_reuse() {
        let mut arena: Arena<u32, 1> = Arena::new();
        let old = arena.insert(7).unwrap();
        assert_eq!(arena.remove(old), Some(7));
        assert_eq!(arena.remove(old), None);

        let new = arena.insert(8).unwrap();
        assert_eq!(old.index(), new.index());
        assert_ne!(old.generation(), new.generation());
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.get(new), Some(&8));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_insert_at_and_key_of() {
        let mut arena: Arena<&str, 4> = Arena::new();
        let k = arena.insert_at(2, "line2").unwrap();
        assert_eq!(k.index(), 2);
        assert_eq!(arena.insert_at(2, "again"), Err("again"));
        assert_eq!(arena.insert_at(9, "oob"), Err("oob"));
        assert_eq!(arena.key_of(2), Some(k));
        assert_eq!(arena.key_of(1), None);
    }

    #[test]
    fn test_iter_and_find() {
        let mut arena: Arena<u8, 4> = Arena::new();
        let a = arena.insert(10).unwrap();
        let b = arena.insert(20).unwrap();
        arena.remove(a);
        let keys: heapless::Vec<Key, 4> = arena.iter().map(|(k, _)| k).collect();
        assert_eq!(keys.as_slice(), &[b]);
        assert_eq!(arena.find(|v| *v == 20), Some(b));
        assert_eq!(arena.find(|v| *v == 10), None);
    }
}
