use crate::types::{Tick, Ticked};

/// Fixed-capacity history indexed by `tick % capacity`.
///
/// Slot `i` holds the last value written for any tick congruent to `i`, so
/// writing tick `T + capacity` replaces tick `T`. [`RingBuffer::read`] returns
/// whatever is in the slot; [`RingBuffer::get`] additionally checks that the
/// stored value belongs to the requested tick.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
}

impl<T> RingBuffer<T> {
    /// Creates an empty buffer. A zero capacity is bumped to one so indexing
    /// never divides by zero.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn index(&self, tick: Tick) -> usize {
        tick as usize % self.slots.len()
    }

    /// Stores `value` for `tick`, overwriting whatever shared the slot.
    pub fn write(&mut self, tick: Tick, value: T) {
        let index = self.index(tick);
        self.slots[index] = Some(value);
    }

    /// Returns the last value written to the slot for `tick`, without
    /// checking which tick it was written for.
    pub fn read(&self, tick: Tick) -> Option<&T> {
        self.slots[self.index(tick)].as_ref()
    }

    /// Empties every slot.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

impl<T: Ticked> RingBuffer<T> {
    /// Returns the value for `tick` only if the slot still holds it.
    pub fn get(&self, tick: Tick) -> Option<&T> {
        self.read(tick).filter(|value| value.tick() == tick)
    }

    /// Stores `value` under its own tick.
    pub fn insert(&mut self, value: T) {
        self.write(value.tick(), value);
    }

    /// Takes the value for `tick` out of its slot. A slot holding another
    /// tick is left alone.
    pub fn remove(&mut self, tick: Tick) -> Option<T> {
        self.get(tick)?;
        let index = self.index(tick);
        self.slots[index].take()
    }
}
