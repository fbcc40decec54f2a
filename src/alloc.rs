//! Page allocation APIs.

use crate::buddy::{self, Block, BuddyAllocator, MAX_ORDER};
use crate::frame::{PageDescriptor, Pfn};
use crate::unit::{self, KIB};
use core::fmt;
use displaydoc_lite::displaydoc;
use spin::{Mutex, MutexGuard};

/// The size of a single page in memory.
///
/// This is also the size of an order-0 block.
pub const PAGE_SIZE: usize = 4 * KIB;

/// Result for every page allocation operation.
pub type Result<T, E = Error> = core::result::Result<T, E>;

displaydoc! {
    /// Any recoverable error that can happen while allocating pages.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Error {
        /// tried to allocate, but there was no free block large enough.
        OutOfMemory,
        /// tried to allocate zero pages using `alloc_pages`.
        AllocateZeroPages,
        /// tried to allocate more pages than the largest order can hold.
        OrderTooLarge,
    }
}

/// Interface every page allocation algorithm provides to the memory manager.
///
/// Callers serialize all calls, usually by holding a [`LockedAllocator`] guard.
pub trait PageAllocator<'a> {
    /// Friendly name of the algorithm, used for selection.
    fn name(&self) -> &'static str;

    /// Hand the descriptor table to the algorithm.
    ///
    /// Returns `true` if the algorithm was successfully initialized.
    fn init(&mut self, frames: &'a mut [PageDescriptor]) -> bool;

    /// Allocate `2^order` contiguous frames.
    fn allocate(&mut self, order: usize) -> Result<Block>;

    /// Release a block previously returned by [`allocate`](Self::allocate).
    fn free(&mut self, pfn: Pfn, order: usize);

    /// Make `count` frames starting at `start` available for allocation.
    fn insert_page_range(&mut self, start: Pfn, count: usize);

    /// Permanently withdraw the free frames in `start..start + count`.
    fn remove_page_range(&mut self, start: Pfn, count: usize);

    /// Log the current state of the algorithm.
    fn dump_state(&self);
}

/// Statistics for a page allocator, counted in frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocStats {
    /// The name of the allocator that collected these stats.
    pub name: &'static str,
    /// Frames that were ever made available.
    pub total: usize,
    /// Frames that are currently free.
    pub free: usize,
    /// Frames that are currently handed out.
    pub allocated: usize,
    /// Frames that were withdrawn for good.
    pub reserved: usize,
}

impl AllocStats {
    /// Create a new [`AllocStats`] instance for the given allocator name.
    pub const fn with_name(name: &'static str) -> Self {
        Self {
            name,
            total: 0,
            free: 0,
            allocated: 0,
            reserved: 0,
        }
    }
}

impl fmt::Display for AllocStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = |frames: usize| unit::bytes(frames * PAGE_SIZE);

        writeln!(f, "{}", self.name)?;
        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(f, "\nAllocated: {}", bytes(self.allocated))?;
        writeln!(f, "Free: {}", bytes(self.free))?;
        writeln!(f, "Reserved: {}", bytes(self.reserved))?;
        writeln!(f, "Total: {}", bytes(self.total))?;
        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(f)?;
        Ok(())
    }
}

/// A [`BuddyAllocator`] behind a spin lock.
///
/// Every call takes the lock exactly once. Use [`lock`](Self::lock) to run
/// several operations inside the same critical section.
pub struct LockedAllocator<'a>(Mutex<BuddyAllocator<'a>>);

impl<'a> LockedAllocator<'a> {
    /// Create an uninitialized allocator, usable inside a `static`.
    pub const fn new() -> Self {
        Self(Mutex::new(BuddyAllocator::new()))
    }

    /// Acquire exclusive access to the allocator.
    pub fn lock(&self) -> MutexGuard<'_, BuddyAllocator<'a>> {
        self.0.lock()
    }

    /// Hand the descriptor table to the allocator.
    pub fn init(&self, frames: &'a mut [PageDescriptor]) -> bool {
        self.lock().init(frames)
    }

    /// Allocate a single page.
    pub fn alloc(&self) -> Result<Block> {
        self.lock().allocate(0)
    }

    /// Allocate at least `count` contiguous pages.
    ///
    /// The request is rounded up to the next power of two.
    pub fn alloc_pages(&self, count: usize) -> Result<Block> {
        if count == 0 {
            return Err(Error::AllocateZeroPages);
        }

        let order = buddy::addr::order_for_count(count);
        if order > MAX_ORDER {
            return Err(Error::OrderTooLarge);
        }

        self.lock().allocate(order)
    }

    /// Release a block that was returned by this allocator.
    pub fn free(&self, block: Block) {
        self.lock().free(block.pfn(), block.order())
    }

    /// Make `count` frames starting at `start` available for allocation.
    pub fn insert_page_range(&self, start: Pfn, count: usize) {
        self.lock().insert_page_range(start, count)
    }

    /// Permanently withdraw the free frames in `start..start + count`.
    pub fn remove_page_range(&self, start: Pfn, count: usize) {
        self.lock().remove_page_range(start, count)
    }

    /// Return the statistics for this allocator.
    pub fn stats(&self) -> AllocStats {
        self.lock().stats()
    }
}

impl Default for LockedAllocator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameState;

    #[test]
    fn alloc_pages_rounds_up() {
        crate::testing::init_logging();

        let mut frames = [PageDescriptor::EMPTY; 16];
        let alloc = LockedAllocator::new();
        assert!(alloc.init(&mut frames));
        alloc.insert_page_range(0, 16);

        let block = alloc.alloc_pages(3).unwrap();
        assert_eq!(block.order(), 2);
        assert_eq!(block.pages(), 4);

        let single = alloc.alloc().unwrap();
        assert_eq!(single.order(), 0);
        assert!(!block.frames().contains(&single.pfn()));

        alloc.free(block);
        alloc.free(single);
        assert_eq!(alloc.stats().free, 16);
        assert_eq!(alloc.lock().free_blocks(4), 1);
    }

    #[test]
    fn alloc_pages_rejects_bad_counts() {
        let alloc = LockedAllocator::new();

        assert_eq!(alloc.alloc_pages(0), Err(Error::AllocateZeroPages));
        assert_eq!(
            alloc.alloc_pages((1 << MAX_ORDER) + 1),
            Err(Error::OrderTooLarge)
        );
        assert_eq!(alloc.alloc(), Err(Error::OutOfMemory));
    }

    #[test]
    fn guard_spans_several_operations() {
        let mut frames = [PageDescriptor::EMPTY; 8];
        let alloc = LockedAllocator::new();
        alloc.init(&mut frames);

        {
            let mut guard = alloc.lock();
            guard.insert_page_range(0, 8);
            guard.remove_page_range(6, 2);
            assert_eq!(guard.frame_state(7), FrameState::Reserved);
        }

        let stats = alloc.stats();
        assert_eq!(stats.total, 8);
        assert_eq!(stats.reserved, 2);
        assert_eq!(stats.free, 6);
    }

    #[test]
    fn stats_display() {
        let stats = AllocStats {
            name: "buddy",
            total: 4,
            free: 2,
            allocated: 1,
            reserved: 1,
        };

        let text = stats.to_string();
        assert!(text.starts_with("buddy\n~~~~~\n"));
        assert!(text.contains("Allocated: 4.00 KiB"));
        assert!(text.contains("Free: 8.00 KiB"));
        assert!(text.contains("Total: 16.00 KiB"));
    }

    #[test]
    fn error_display() {
        assert!(Error::OutOfMemory.to_string().contains("no free block"));
        assert!(Error::AllocateZeroPages.to_string().contains("zero pages"));
    }
}
