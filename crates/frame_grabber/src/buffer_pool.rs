//! Mapped capture buffers of one device
//!
//! A pool is a fixed sequence of slots. Each slot carries at most one mapped
//! region and an owner: a slot queued with the driver belongs to the
//! driver until it is dequeued again.

use tracing::trace;

use crate::error::SlotError;

/// Read-only view of a mapped buffer.
pub type Region = Box<dyn AsRef<[u8]> + Send>;

/// Who may touch a slot's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOwner {
    Application,
    Driver,
}

struct Slot {
    region: Option<Region>,
    owner: SlotOwner,
}

impl Slot {
    fn empty() -> Self {
        Self {
            region: None,
            owner: SlotOwner::Application,
        }
    }
}

/// Buffer slots of a device.
#[derive(Default)]
pub struct BufferPool {
    slots: Vec<Slot>,
    allocated: bool,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `n` empty slots. Does nothing when the pool is already allocated.
    pub fn allocate(&mut self, n: usize) {
        if self.allocated {
            return;
        }
        self.slots = (0..n).map(|_| Slot::empty()).collect();
        self.allocated = true;
    }

    /// Assign the mapped region of slot `index`.
    ///
    /// A slot is set at most once; out-of-range indices and already set
    /// slots are left untouched.
    pub fn set(&mut self, index: u32, region: Region) {
        match self.slots.get_mut(index as usize) {
            Some(slot) if slot.region.is_none() => slot.region = Some(region),
            Some(_) => trace!(index, "buffer slot already mapped"),
            None => trace!(index, len = self.slots.len(), "buffer slot out of range"),
        }
    }

    /// Bytes of slot `index`, if it is mapped.
    pub fn start(&self, index: u32) -> Option<&[u8]> {
        self.slots
            .get(index as usize)
            .and_then(|slot| slot.region.as_ref())
            .map(|region| (**region).as_ref())
    }

    /// Length of slot `index`, 0 if it is not mapped.
    pub fn length(&self, index: u32) -> usize {
        self.start(index).map_or(0, <[u8]>::len)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    pub fn is_mapped(&self, index: u32) -> bool {
        self.start(index).is_some()
    }

    pub fn owner(&self, index: u32) -> Option<SlotOwner> {
        self.slots.get(index as usize).map(|slot| slot.owner)
    }

    /// Move slot `index` to the driver before queueing it.
    pub fn hand_to_driver(&mut self, index: u32) -> Result<(), SlotError> {
        let slot = self.slot_mut(index)?;
        match slot.owner {
            SlotOwner::Application => {
                slot.owner = SlotOwner::Driver;
                Ok(())
            }
            SlotOwner::Driver => Err(SlotError::AlreadyQueued { index }),
        }
    }

    /// Take slot `index` back from the driver after dequeueing it.
    pub fn take_from_driver(&mut self, index: u32) -> Result<(), SlotError> {
        let slot = self.slot_mut(index)?;
        match slot.owner {
            SlotOwner::Driver => {
                slot.owner = SlotOwner::Application;
                Ok(())
            }
            SlotOwner::Application => Err(SlotError::NotQueued { index }),
        }
    }

    /// Return every slot to the application. Only valid once streaming stopped.
    pub fn reclaim_all(&mut self) {
        for slot in &mut self.slots {
            slot.owner = SlotOwner::Application;
        }
    }

    /// Number of slots currently owned by the driver.
    pub fn queued(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.owner == SlotOwner::Driver)
            .count()
    }

    /// Drop every mapping and slot.
    pub fn release(&mut self) {
        self.slots.clear();
        self.allocated = false;
    }

    fn slot_mut(&mut self, index: u32) -> Result<&mut Slot, SlotError> {
        let len = self.slots.len();
        self.slots
            .get_mut(index as usize)
            .ok_or(SlotError::OutOfRange { index, len })
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("len", &self.slots.len())
            .field("queued", &self.queued())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(fill: u8, len: usize) -> Region {
        Box::new(vec![fill; len])
    }

    #[test]
    fn test_allocate_once() {
        let mut pool = BufferPool::new();
        pool.allocate(3);
        pool.allocate(5);

        assert_eq!(pool.len(), 3);
        assert!(!pool.is_mapped(0));
        assert_eq!(pool.length(0), 0);
    }

    #[test]
    fn test_set_is_idempotent() {
        let mut pool = BufferPool::new();
        pool.allocate(2);

        pool.set(0, region(0xaa, 4));
        pool.set(0, region(0xbb, 8));

        assert_eq!(pool.start(0), Some(&[0xaa; 4][..]));
        assert_eq!(pool.length(0), 4);
    }

    #[test]
    fn test_out_of_range_access() {
        let mut pool = BufferPool::new();
        pool.allocate(2);
        pool.set(7, region(1, 1));

        assert_eq!(pool.start(7), None);
        assert_eq!(pool.length(7), 0);
        assert_eq!(pool.owner(7), None);
        assert_eq!(
            pool.hand_to_driver(2),
            Err(SlotError::OutOfRange { index: 2, len: 2 })
        );
    }

    #[test]
    fn test_slot_hand_off() {
        let mut pool = BufferPool::new();
        pool.allocate(2);

        pool.hand_to_driver(1).unwrap();
        assert_eq!(pool.owner(1), Some(SlotOwner::Driver));
        assert_eq!(
            pool.hand_to_driver(1),
            Err(SlotError::AlreadyQueued { index: 1 })
        );

        pool.take_from_driver(1).unwrap();
        assert_eq!(
            pool.take_from_driver(1),
            Err(SlotError::NotQueued { index: 1 })
        );
    }

    #[test]
    fn test_reclaim_and_release() {
        let mut pool = BufferPool::new();
        pool.allocate(3);
        pool.set(0, region(0, 16));
        pool.hand_to_driver(0).unwrap();
        pool.hand_to_driver(2).unwrap();
        assert_eq!(pool.queued(), 2);

        pool.reclaim_all();
        assert_eq!(pool.queued(), 0);

        pool.release();
        assert!(pool.is_empty());
        assert!(!pool.is_allocated());

        pool.allocate(4);
        assert_eq!(pool.len(), 4);
    }
}
