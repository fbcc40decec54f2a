//! The per-order lists of free blocks.
//!
//! The lists are intrusive: the links of a free block are stored inside
//! the descriptor of its header frame, so the table itself only stores
//! the head of every list.

use super::{addr, ORDER_COUNT};
use crate::frame::{FrameState, PageDescriptor, Pfn};

/// Address-ordered, doubly linked lists of free block headers,
/// one for every order.
pub struct FreeAreas<'a> {
    frames: &'a mut [PageDescriptor],
    heads: [Option<Pfn>; ORDER_COUNT],
    lengths: [usize; ORDER_COUNT],
}

impl<'a> FreeAreas<'a> {
    /// Create a table that does not describe any frame.
    pub const fn new() -> Self {
        Self {
            frames: &mut [],
            heads: [None; ORDER_COUNT],
            lengths: [0; ORDER_COUNT],
        }
    }

    /// Replace the descriptor table and forget every free block.
    ///
    /// Every descriptor is reset to [`FrameState::Absent`].
    pub fn attach(&mut self, frames: &'a mut [PageDescriptor]) {
        frames
            .iter_mut()
            .for_each(|desc| desc.set_state(FrameState::Absent));

        self.frames = frames;
        self.heads = [None; ORDER_COUNT];
        self.lengths = [0; ORDER_COUNT];
    }

    /// Return the number of frames that are described by this table.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Return the state of the given frame.
    ///
    /// Frames outside of the descriptor table are [`FrameState::Absent`].
    pub fn state(&self, pfn: Pfn) -> FrameState {
        self.frames
            .get(pfn)
            .map_or(FrameState::Absent, PageDescriptor::state)
    }

    /// Overwrite the state of the given frame.
    ///
    /// Must not be used on the header of a free block, use [`remove`](Self::remove)
    /// instead so the lists stay intact.
    pub fn set_state(&mut self, pfn: Pfn, state: FrameState) {
        debug_assert!(
            !matches!(self.state(pfn), FrameState::Free { .. }),
            "frame {:#x} is still linked into a free area",
            pfn
        );
        self.frames[pfn].set_state(state);
    }

    /// Overwrite the state of every frame in `start..end`.
    pub fn set_range_state(&mut self, start: Pfn, end: Pfn, state: FrameState) {
        self.frames[start..end]
            .iter_mut()
            .for_each(|desc| desc.set_state(state));
    }

    /// Check if there is no free block of the given order.
    pub fn is_empty(&self, order: usize) -> bool {
        self.heads[order].is_none()
    }

    /// Return the number of free blocks of the given order.
    pub fn len(&self, order: usize) -> usize {
        self.lengths[order]
    }

    /// Return the free block with the lowest address of the given order.
    pub fn first(&self, order: usize) -> Option<Pfn> {
        self.heads[order]
    }

    /// Return the free block that follows `pfn` in its free area.
    pub fn next(&self, pfn: Pfn) -> Option<Pfn> {
        self.links(pfn).1
    }

    /// Check if `pfn` is the header of a free block of the given order.
    pub fn contains(&self, order: usize, pfn: Pfn) -> bool {
        matches!(self.state(pfn), FrameState::Free { order: o, .. } if o == order)
    }

    /// Iterate over the free blocks of the given order, in ascending address order.
    pub fn iter(&self, order: usize) -> Iter<'_, 'a> {
        Iter {
            areas: self,
            cursor: self.heads[order],
        }
    }

    /// Insert the block starting at `pfn` into the free area of `order`.
    ///
    /// # Panics
    ///
    /// If the block is not aligned, doesn't fit into the descriptor table,
    /// or is already free.
    pub fn insert(&mut self, order: usize, pfn: Pfn) {
        assert!(
            addr::is_aligned(pfn, order),
            "block {:#x} is not aligned to order {}",
            pfn,
            order
        );
        assert!(
            pfn + addr::pages_per_block(order) <= self.frames.len(),
            "block {:#x} of order {} exceeds the descriptor table",
            pfn,
            order
        );
        assert!(
            !matches!(self.state(pfn), FrameState::Free { .. }),
            "block {:#x} is already free",
            pfn
        );

        // find the neighbours of the new block
        let mut prev = None;
        let mut next = self.heads[order];
        while let Some(cur) = next {
            if cur > pfn {
                break;
            }

            prev = Some(cur);
            next = self.links(cur).1;
        }

        self.frames[pfn].set_state(FrameState::Free { order, prev, next });

        match prev {
            Some(prev) => self.set_next(prev, Some(pfn)),
            None => self.heads[order] = Some(pfn),
        }
        if let Some(next) = next {
            self.set_prev(next, Some(pfn));
        }

        self.lengths[order] += 1;
    }

    /// Remove the block starting at `pfn` from the free area of `order`.
    ///
    /// The header is left in the [`FrameState::Interior`] state, the caller
    /// is responsible for giving it a new state.
    ///
    /// # Panics
    ///
    /// If the block is not free at the given order.
    pub fn remove(&mut self, order: usize, pfn: Pfn) {
        let (prev, next) = match self.state(pfn) {
            FrameState::Free { order: o, prev, next } if o == order => (prev, next),
            state => panic!(
                "block {:#x} is not free at order {} (state: {:?})",
                pfn, order, state
            ),
        };

        match prev {
            Some(prev) => self.set_next(prev, next),
            None => self.heads[order] = next,
        }
        if let Some(next) = next {
            self.set_prev(next, prev);
        }

        self.frames[pfn].set_state(FrameState::Interior);
        self.lengths[order] -= 1;
    }

    fn links(&self, pfn: Pfn) -> (Option<Pfn>, Option<Pfn>) {
        match self.state(pfn) {
            FrameState::Free { prev, next, .. } => (prev, next),
            state => unreachable!("frame {:#x} in a free area has state {:?}", pfn, state),
        }
    }

    fn set_prev(&mut self, pfn: Pfn, new: Option<Pfn>) {
        if let FrameState::Free { order, next, .. } = self.state(pfn) {
            self.frames[pfn].set_state(FrameState::Free {
                order,
                prev: new,
                next,
            });
        }
    }

    fn set_next(&mut self, pfn: Pfn, new: Option<Pfn>) {
        if let FrameState::Free { order, prev, .. } = self.state(pfn) {
            self.frames[pfn].set_state(FrameState::Free {
                order,
                prev,
                next: new,
            });
        }
    }
}

/// Iterator over the headers of one free area.
pub struct Iter<'t, 'a> {
    areas: &'t FreeAreas<'a>,
    cursor: Option<Pfn>,
}

impl Iterator for Iter<'_, '_> {
    type Item = Pfn;

    fn next(&mut self) -> Option<Self::Item> {
        let pfn = self.cursor?;
        self.cursor = self.areas.next(pfn);
        Some(pfn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn areas(frames: &mut [PageDescriptor]) -> FreeAreas<'_> {
        let mut areas = FreeAreas::new();
        areas.attach(frames);
        areas
    }

    #[test]
    fn insert_keeps_address_order() {
        let mut frames = [PageDescriptor::EMPTY; 32];
        let mut areas = areas(&mut frames);

        for &pfn in &[8, 0, 24, 4, 16] {
            areas.insert(2, pfn);
        }

        assert_eq!(areas.iter(2).collect::<Vec<_>>(), [0, 4, 8, 16, 24]);
        assert_eq!(areas.len(2), 5);
        assert_eq!(areas.first(2), Some(0));
        assert!(areas.is_empty(1));
        assert!(areas.contains(2, 16));
        assert!(!areas.contains(3, 16));
    }

    #[test]
    fn remove_relinks_neighbours() {
        let mut frames = [PageDescriptor::EMPTY; 16];
        let mut areas = areas(&mut frames);

        for pfn in 0..4 {
            areas.insert(0, pfn * 2);
        }

        areas.remove(0, 2);
        assert_eq!(areas.iter(0).collect::<Vec<_>>(), [0, 4, 6]);
        assert_eq!(areas.state(2), FrameState::Interior);

        areas.remove(0, 0);
        assert_eq!(areas.first(0), Some(4));

        areas.remove(0, 6);
        assert_eq!(areas.iter(0).collect::<Vec<_>>(), [4]);
        assert_eq!(
            areas.state(4),
            FrameState::Free {
                order: 0,
                prev: None,
                next: None
            }
        );

        areas.remove(0, 4);
        assert!(areas.is_empty(0));
        assert_eq!(areas.len(0), 0);
    }

    #[test]
    fn out_of_range_frames_are_absent() {
        let mut frames = [PageDescriptor::EMPTY; 4];
        let areas = areas(&mut frames);

        assert_eq!(areas.state(100), FrameState::Absent);
        assert_eq!(areas.frame_count(), 4);
    }

    #[test]
    #[should_panic(expected = "already free")]
    fn duplicate_insert_panics() {
        let mut frames = [PageDescriptor::EMPTY; 8];
        let mut areas = areas(&mut frames);

        areas.insert(1, 2);
        areas.insert(1, 2);
    }

    #[test]
    #[should_panic(expected = "not aligned")]
    fn unaligned_insert_panics() {
        let mut frames = [PageDescriptor::EMPTY; 8];
        let mut areas = areas(&mut frames);

        areas.insert(2, 2);
    }

    #[test]
    #[should_panic(expected = "is not free at order")]
    fn removing_absent_block_panics() {
        let mut frames = [PageDescriptor::EMPTY; 8];
        let mut areas = areas(&mut frames);

        areas.insert(1, 0);
        areas.remove(1, 4);
    }
}
