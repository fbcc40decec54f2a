//! Implementation of a Buddy Allocator that is responsible for allocating
//! physical page frames, either directly for the kernel or as backing
//! memory for higher level allocators.

pub mod addr;
pub mod free_area;
mod range;

use self::free_area::FreeAreas;
use crate::alloc::{AllocStats, Error, PageAllocator, Result};
use crate::frame::{FrameState, PageDescriptor, Pfn};
use core::{cmp, fmt, ops::Range};

/// The maximum order for the buddy allocator (inclusive).
///
/// The largest block holds `2^18` frames, which is 1 GiB of 4 KiB pages.
pub const MAX_ORDER: usize = 18;

/// The size of the orders array inside the buddy allocator.
pub const ORDER_COUNT: usize = MAX_ORDER + 1;

/// A naturally aligned run of `2^order` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block {
    pfn: Pfn,
    order: usize,
}

impl Block {
    /// Create a block from its header frame and order.
    pub fn new(pfn: Pfn, order: usize) -> Self {
        debug_assert!(addr::is_aligned(pfn, order));
        Self { pfn, order }
    }

    /// The first frame of this block.
    pub fn pfn(&self) -> Pfn {
        self.pfn
    }

    /// The order of this block.
    pub fn order(&self) -> usize {
        self.order
    }

    /// The number of frames inside this block.
    pub fn pages(&self) -> usize {
        addr::pages_per_block(self.order)
    }

    /// All frames that are covered by this block.
    pub fn frames(&self) -> Range<Pfn> {
        self.pfn..self.pfn + self.pages()
    }

    /// Check if two blocks share at least one frame.
    pub fn overlaps(&self, other: &Block) -> bool {
        let (a, b) = (self.frames(), other.frames());
        a.start < b.end && b.start < a.end
    }
}

/// The central structure that is responsible for allocating
/// page frames using the buddy allocation algorithm.
///
/// The allocator does no locking on its own, every call must be serialized
/// by the caller, e.g. by using a [`LockedAllocator`](crate::LockedAllocator).
pub struct BuddyAllocator<'a> {
    areas: FreeAreas<'a>,
    stats: AllocStats,
    initialized: bool,
}

impl<'a> BuddyAllocator<'a> {
    /// Create an empty and uninitialized buddy allocator.
    pub const fn new() -> Self {
        Self {
            areas: FreeAreas::new(),
            stats: AllocStats::with_name("Buddy Allocator"),
            initialized: false,
        }
    }

    /// The name of this allocation algorithm.
    pub fn name(&self) -> &'static str {
        "buddy"
    }

    /// Hand the table of all page descriptors to this allocator.
    ///
    /// The index of a descriptor inside `frames` is its frame number. No frame
    /// is available for allocation until it was passed to
    /// [`insert_page_range`](Self::insert_page_range).
    ///
    /// Returns `false` if the allocator was already initialized or `frames` is empty.
    pub fn init(&mut self, frames: &'a mut [PageDescriptor]) -> bool {
        if self.initialized {
            log::warn!("Buddy Page Allocator is already initialized");
            return false;
        }

        if frames.is_empty() {
            log::warn!("Buddy Page Allocator received an empty descriptor table");
            return false;
        }

        let count = frames.len();
        self.areas.attach(frames);
        self.initialized = true;

        log::info!("Buddy Page Allocator online, describing {} frames", count);
        true
    }

    /// Allocates a block of `2^order` contiguous frames.
    ///
    /// The lowest free block of the smallest sufficient order is used, larger
    /// blocks are split on demand. If no block is large enough, the free areas
    /// are [defragmented](Self::defragment) once before giving up.
    ///
    /// # Panics
    ///
    /// If `order` is larger than [`MAX_ORDER`].
    pub fn allocate(&mut self, order: usize) -> Result<Block> {
        assert!(
            order <= MAX_ORDER,
            "tried to allocate order {} (maximum is {})",
            order,
            MAX_ORDER
        );

        let pfn = match self.take_block(order) {
            Some(pfn) => pfn,
            None => {
                self.defragment();
                match self.take_block(order) {
                    Some(pfn) => pfn,
                    None => {
                        log::warn!("out of memory while allocating order {}", order);
                        return Err(Error::OutOfMemory);
                    }
                }
            }
        };

        self.areas.set_state(pfn, FrameState::Allocated { order });

        // update statistics
        let pages = addr::pages_per_block(order);
        self.stats.free -= pages;
        self.stats.allocated += pages;

        Ok(Block::new(pfn, order))
    }

    /// Deallocates a block that was allocated with the given order and
    /// merges it with its buddies as far as possible.
    ///
    /// # Panics
    ///
    /// If `pfn` is not the header of a block that is currently allocated
    /// with exactly this order.
    pub fn free(&mut self, pfn: Pfn, order: usize) {
        assert!(
            order <= MAX_ORDER,
            "tried to free order {} (maximum is {})",
            order,
            MAX_ORDER
        );

        match self.areas.state(pfn) {
            FrameState::Allocated { order: o } if o == order => {}
            state => panic!(
                "tried to free block {:#x} of order {}, but its state is {:?}",
                pfn, order, state
            ),
        }

        self.areas.insert(order, pfn);
        self.coalesce(order, pfn);

        // update statistics
        let pages = addr::pages_per_block(order);
        self.stats.allocated -= pages;
        self.stats.free += pages;
    }

    /// Merges every pair of free buddies, starting at order `0`.
    ///
    /// Returns the number of merges that were performed.
    pub fn defragment(&mut self) -> usize {
        let mut merges = 0;

        // merging only ever inserts into the next order, so
        // a single pass from the bottom to the top is enough.
        for order in 0..MAX_ORDER {
            let mut cursor = self.areas.first(order);

            while let Some(block) = cursor {
                let next = self.areas.next(block);

                // free areas are sorted, so the upper buddy of `block`
                // can only be its direct successor.
                let upper = addr::buddy_of(block, order);
                if next == Some(upper) && addr::is_aligned(block, order + 1) {
                    let after = next.and_then(|next| self.areas.next(next));
                    self.merge_if_possible(order, block);
                    merges += 1;
                    cursor = after;
                } else {
                    cursor = next;
                }
            }
        }

        log::debug!("defragmentation pass performed {} merges", merges);
        merges
    }

    /// Logs the free areas of every order.
    pub fn dump_state(&self) {
        log::debug!("BUDDY STATE:");
        for order in 0..ORDER_COUNT {
            log::debug!("{}", self.free_area_line(order));
        }
    }

    /// Writes the free areas of every order into `w`, one line per order.
    pub fn write_state<W: fmt::Write>(&self, w: &mut W) -> fmt::Result {
        (0..ORDER_COUNT).try_for_each(|order| writeln!(w, "{}", self.free_area_line(order)))
    }

    /// Return a copy of the statistics for this allocator.
    pub fn stats(&self) -> AllocStats {
        self.stats.clone()
    }

    /// Return the state of the given frame.
    pub fn frame_state(&self, pfn: Pfn) -> FrameState {
        self.areas.state(pfn)
    }

    /// Iterate over the headers of all free blocks of the given order.
    pub fn free_area(&self, order: usize) -> impl Iterator<Item = Pfn> + '_ {
        self.areas.iter(order)
    }

    /// Return the number of free blocks of the given order.
    pub fn free_blocks(&self, order: usize) -> usize {
        self.areas.len(order)
    }

    /// Removes a block of the given order from the free areas,
    /// splitting a larger block if necessary.
    fn take_block(&mut self, order: usize) -> Option<Pfn> {
        let donor = (order..ORDER_COUNT).find(|&o| !self.areas.is_empty(o))?;
        let mut block = self.areas.first(donor)?;

        // walk down from the donor order, always splitting the lower half
        // of the previous split. the upper halves stay free.
        for source in (order + 1..=donor).rev() {
            block = self.split_block(source, block);
        }

        self.areas.remove(order, block);
        Some(block)
    }

    /// Splits the first block of the given order.
    ///
    /// Returns the lower half, which stays free at `order - 1`.
    pub fn split(&mut self, order: usize) -> Pfn {
        let block = self
            .areas
            .first(order)
            .unwrap_or_else(|| panic!("tried to split the empty free area of order {}", order));
        self.split_block(order, block)
    }

    /// Splits the free `block` of the given order into its two halves and
    /// inserts both into the free area of `order - 1`.
    ///
    /// Returns the lower half.
    pub(crate) fn split_block(&mut self, order: usize, block: Pfn) -> Pfn {
        assert!(
            order >= 1 && order <= MAX_ORDER,
            "can't split a block of order {}",
            order
        );

        // +-- `block`               +-- `buddy`
        // v                         v
        // +-------------------------+-------------------------+
        // |                       `order`                     |
        // +-------------------------+-------------------------+
        // |      `order - 1`        |       `order - 1`       |
        // +-------------------------+-------------------------+
        let target = order - 1;
        let buddy = addr::buddy_of(block, target);

        self.areas.remove(order, block);
        self.areas.insert(target, block);
        self.areas.insert(target, buddy);

        log::trace!("split block {:#x} of order {}", block, order);
        block
    }

    /// Merges the free `block` with its buddy, if the buddy is free too.
    ///
    /// Returns the merged block, which is now free at `order + 1`.
    pub fn merge_if_possible(&mut self, order: usize, block: Pfn) -> Option<Pfn> {
        assert!(
            self.areas.contains(order, block),
            "block {:#x} is not free at order {}",
            block,
            order
        );

        if order >= MAX_ORDER {
            return None;
        }

        let buddy = addr::buddy_of(block, order);
        if !self.areas.contains(order, buddy) {
            return None;
        }

        self.areas.remove(order, block);
        self.areas.remove(order, buddy);

        // the upper half becomes part of the merged block, which is
        // headed by the lower one.
        let merged = cmp::min(block, buddy);
        self.areas.set_state(cmp::max(block, buddy), FrameState::Interior);
        self.areas.insert(order + 1, merged);

        log::trace!("merged block {:#x} into order {}", merged, order + 1);
        Some(merged)
    }

    /// Merges the free `block` upwards until its buddy is not free
    /// anymore or the maximum order is reached.
    pub(crate) fn coalesce(&mut self, mut order: usize, mut block: Pfn) -> (Pfn, usize) {
        while let Some(merged) = self.merge_if_possible(order, block) {
            block = merged;
            order += 1;
        }

        (block, order)
    }

    fn free_area_line(&self, order: usize) -> FreeAreaLine<'_, 'a> {
        FreeAreaLine { alloc: self, order }
    }
}

impl Default for BuddyAllocator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> PageAllocator<'a> for BuddyAllocator<'a> {
    fn name(&self) -> &'static str {
        BuddyAllocator::name(self)
    }

    fn init(&mut self, frames: &'a mut [PageDescriptor]) -> bool {
        BuddyAllocator::init(self, frames)
    }

    fn allocate(&mut self, order: usize) -> Result<Block> {
        BuddyAllocator::allocate(self, order)
    }

    fn free(&mut self, pfn: Pfn, order: usize) {
        BuddyAllocator::free(self, pfn, order)
    }

    fn insert_page_range(&mut self, start: Pfn, count: usize) {
        BuddyAllocator::insert_page_range(self, start, count)
    }

    fn remove_page_range(&mut self, start: Pfn, count: usize) {
        BuddyAllocator::remove_page_range(self, start, count)
    }

    fn dump_state(&self) {
        BuddyAllocator::dump_state(self)
    }
}

/// One line of the state dump: `[order] pfn pfn ...`, pfns in hex.
struct FreeAreaLine<'b, 'a> {
    alloc: &'b BuddyAllocator<'a>,
    order: usize,
}

impl fmt::Display for FreeAreaLine<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.order)?;
        self.alloc
            .free_area(self.order)
            .try_for_each(|pfn| write!(f, " {:x}", pfn))
    }
}
