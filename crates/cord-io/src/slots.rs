//! Generational slot table
//!
//! Sockets live in a vector of slots; a [`SocketId`] names a slot together
//! with the generation it was issued for, so an id kept after its socket was
//! released never resolves to a later occupant of the same slot.

use std::fmt;

/// Handle to a socket owned by the reactor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId {
    slot: usize,
    generation: u64,
}

impl SocketId {
    /// Slot index, also used as the readiness token
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot, self.generation)
    }
}

struct Entry<T> {
    generation: u64,
    value: T,
}

pub(crate) struct SlotTable<T> {
    slots: Vec<Option<Entry<T>>>,
    free: Vec<usize>,
    next_generation: u64,
    len: usize,
}

impl<T> SlotTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            next_generation: 0,
            len: 0,
        }
    }

    /// Insert a value built from its own id; nothing is stored when `build` fails
    pub(crate) fn insert_with<E>(
        &mut self,
        build: impl FnOnce(SocketId) -> Result<T, E>,
    ) -> Result<SocketId, E> {
        let slot = self.free.last().copied().unwrap_or(self.slots.len());
        let id = SocketId {
            slot,
            generation: self.next_generation,
        };
        let value = build(id)?;

        if self.free.last() == Some(&slot) {
            self.free.pop();
        } else {
            self.slots.push(None);
        }
        self.slots[slot] = Some(Entry {
            generation: id.generation,
            value,
        });
        self.next_generation += 1;
        self.len += 1;
        Ok(id)
    }

    pub(crate) fn get(&self, id: SocketId) -> Option<&T> {
        match self.slots.get(id.slot) {
            Some(Some(entry)) if entry.generation == id.generation => Some(&entry.value),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, id: SocketId) -> Option<&mut T> {
        match self.slots.get_mut(id.slot) {
            Some(Some(entry)) if entry.generation == id.generation => Some(&mut entry.value),
            _ => None,
        }
    }

    /// Id of the current occupant of a slot
    pub(crate) fn id_at(&self, slot: usize) -> Option<SocketId> {
        match self.slots.get(slot) {
            Some(Some(entry)) => Some(SocketId {
                slot,
                generation: entry.generation,
            }),
            _ => None,
        }
    }

    pub(crate) fn remove(&mut self, id: SocketId) -> Option<T> {
        let cell = self.slots.get_mut(id.slot)?;
        match cell {
            Some(entry) if entry.generation == id.generation => {}
            _ => return None,
        }
        let entry = cell.take()?;
        self.free.push(id.slot);
        self.len -= 1;
        Some(entry.value)
    }

    pub(crate) fn ids(&self) -> Vec<SocketId> {
        (0..self.slots.len()).filter_map(|slot| self.id_at(slot)).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}
