//! A binary buddy allocator for physical page frames.
//!
//! The allocator hands out power-of-two sized, naturally aligned runs of
//! page frames and coalesces freed buddies back into larger blocks.
//! Frames are identified by their page frame number ([`Pfn`]) and all
//! bookkeeping lives in a caller provided side table of
//! [`PageDescriptor`]s, so no operation allocates memory on its own.
#![deny(rust_2018_idioms, rustdoc::broken_intra_doc_links)]
#![cfg_attr(not(test), no_std)]

pub mod alloc;
pub mod buddy;
pub mod frame;
pub mod unit;

#[cfg(test)]
mod testing;

pub use self::alloc::{AllocStats, Error, LockedAllocator, PageAllocator, Result};
pub use self::buddy::{Block, BuddyAllocator, MAX_ORDER, ORDER_COUNT};
pub use self::frame::{FrameState, PageDescriptor, Pfn};
