//! Page frame descriptors.
//!
//! Every physical frame the allocator may ever manage owns exactly one
//! [`PageDescriptor`]. The descriptors are handed to the allocator once,
//! and the index of a descriptor inside that table is the frame's [`Pfn`].

use core::mem;

/// A page frame number, the dense index of a physical frame.
pub type Pfn = usize;

/// The allocator's view of a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// The frame was never made available for allocation.
    Absent,
    /// The frame is the header of a free block of the given order.
    ///
    /// `prev` and `next` link the block into the free area of its order,
    /// sorted by ascending address.
    Free {
        order: usize,
        prev: Option<Pfn>,
        next: Option<Pfn>,
    },
    /// The frame is the header of an allocated block of the given order.
    Allocated { order: usize },
    /// The frame lies inside a free or allocated block, but is not its header.
    Interior,
    /// The frame was permanently withdrawn from the free pool.
    Reserved,
}

/// The side table entry that is attached to every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDescriptor {
    state: FrameState,
}

impl PageDescriptor {
    /// A descriptor for a frame that is not managed by any allocator.
    pub const EMPTY: Self = Self {
        state: FrameState::Absent,
    };

    /// Create a new, unmanaged descriptor.
    pub const fn new() -> Self {
        Self::EMPTY
    }

    /// Return the current state of this frame.
    pub fn state(&self) -> FrameState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: FrameState) {
        self.state = state;
    }
}

impl Default for PageDescriptor {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Return the frame number of `desc`, if it is part of `table`.
pub fn pfn_of(table: &[PageDescriptor], desc: &PageDescriptor) -> Option<Pfn> {
    let base = table.as_ptr() as usize;
    let offset = (desc as *const PageDescriptor as usize).checked_sub(base)?;

    let pfn = offset / mem::size_of::<PageDescriptor>();
    let candidate = table.get(pfn)?;
    core::ptr::eq(candidate, desc).then(|| pfn)
}

/// Return the descriptor of the given frame, if it is part of `table`.
pub fn descriptor(table: &[PageDescriptor], pfn: Pfn) -> Option<&PageDescriptor> {
    table.get(pfn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pfn_descriptor_conversion() {
        let table = [PageDescriptor::EMPTY; 16];

        for pfn in 0..table.len() {
            let desc = descriptor(&table, pfn).unwrap();
            assert_eq!(pfn_of(&table, desc), Some(pfn));
        }

        assert!(descriptor(&table, 16).is_none());
    }

    #[test]
    fn foreign_descriptor_has_no_pfn() {
        let table = [PageDescriptor::EMPTY; 4];
        let other = PageDescriptor::new();

        assert_eq!(pfn_of(&table, &other), None);
        assert_eq!(pfn_of(&table[..2], &table[3]), None);
    }

    #[test]
    fn new_descriptor_is_absent() {
        assert_eq!(PageDescriptor::default().state(), FrameState::Absent);
    }
}
