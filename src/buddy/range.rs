//! Adding and withdrawing whole ranges of frames.

use super::{addr, BuddyAllocator};
use crate::frame::{FrameState, Pfn};

impl BuddyAllocator<'_> {
    /// Makes the frames `start..start + count` available for allocation.
    ///
    /// The range doesn't need to be aligned. It is split into as few blocks as
    /// possible, meaning that a range of `2^4 + 1` frames starting at frame `16`
    /// is added as one order `4` block and one order `0` block.
    ///
    /// # Panics
    ///
    /// If the range exceeds the descriptor table, or any of its frames is
    /// already managed by this allocator.
    pub fn insert_page_range(&mut self, start: Pfn, count: usize) {
        if count == 0 {
            return;
        }

        let end = self.range_end(start, count);
        log::debug!("Adding frames {:#x}..{:#x} to the buddy allocator", start, end);

        let mut cursor = start;
        while cursor < end {
            let order = addr::largest_fitting_order(cursor, end - cursor);
            let block_end = cursor + addr::pages_per_block(order);

            if let Some(pfn) =
                (cursor..block_end).find(|&pfn| self.areas.state(pfn) != FrameState::Absent)
            {
                panic!(
                    "frame {:#x} is already managed (state: {:?})",
                    pfn,
                    self.areas.state(pfn)
                );
            }

            log::trace!("adding block {:#x} with order {}", cursor, order);
            self.areas.set_range_state(cursor, block_end, FrameState::Interior);
            self.areas.insert(order, cursor);
            self.coalesce(order, cursor);

            cursor = block_end;
        }

        // update statistics
        self.stats.total += count;
        self.stats.free += count;
    }

    /// Permanently withdraws the free frames in `start..start + count`.
    ///
    /// Free blocks that stick out of the range are split until the part
    /// inside of it can be removed. Frames that are already reserved or were
    /// never added are skipped.
    ///
    /// # Panics
    ///
    /// If the range exceeds the descriptor table, or contains frames of an
    /// allocated block.
    pub fn remove_page_range(&mut self, start: Pfn, count: usize) {
        if count == 0 {
            return;
        }

        let end = self.range_end(start, count);
        log::debug!("Reserving frames {:#x}..{:#x}", start, end);

        let mut reserved = 0;
        let mut cursor = start;
        while cursor < end {
            let (block, order) = match self.containing_block(cursor) {
                Some((block, FrameState::Free { order, .. })) => (block, order),
                Some((block, state)) => panic!(
                    "can't reserve frame {:#x}, it belongs to block {:#x} ({:?})",
                    cursor, block, state
                ),
                None => {
                    cursor += 1;
                    continue;
                }
            };

            let block_end = block + addr::pages_per_block(order);
            if block < start || block_end > end {
                // only a part of the block is inside the range, so split it
                // and look at the halves. an order `0` block always fits.
                self.split_block(order, block);
                continue;
            }

            self.areas.remove(order, block);
            self.areas.set_range_state(block, block_end, FrameState::Reserved);
            reserved += block_end - block;

            cursor = block_end;
        }

        // update statistics
        self.stats.free -= reserved;
        self.stats.reserved += reserved;
    }

    /// Finds the free or allocated block that contains the given frame.
    ///
    /// Returns the header of the block and its state.
    fn containing_block(&self, pfn: Pfn) -> Option<(Pfn, FrameState)> {
        match self.areas.state(pfn) {
            FrameState::Absent | FrameState::Reserved => return None,
            _ => {}
        }

        // the header is the first frame, aligned to the block's order, that
        // is not an interior frame.
        (0..super::ORDER_COUNT).find_map(|order| {
            let header = pfn - addr::block_offset(pfn, order);

            match self.areas.state(header) {
                state @ FrameState::Free { order, .. } | state @ FrameState::Allocated { order }
                    if header + addr::pages_per_block(order) > pfn =>
                {
                    Some((header, state))
                }
                _ => None,
            }
        })
    }

    /// Returns the end of the range, checking that it is described by the
    /// descriptor table.
    fn range_end(&self, start: Pfn, count: usize) -> Pfn {
        match start.checked_add(count) {
            Some(end) if end <= self.areas.frame_count() => end,
            _ => panic!(
                "range {:#x}+{:#x} exceeds the descriptor table of {:#x} frames",
                start,
                count,
                self.areas.frame_count()
            ),
        }
    }
}
