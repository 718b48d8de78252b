//! # fitalloc - A Manual Heap Allocator
//!
//! This crate manages raw memory itself: it grows its region from the
//! operating system, carves it into blocks and hands out payloads through
//! `allocate`, `release` and `resize`, without going through any other
//! general-purpose allocator.
//!
//! ## Overview
//!
//! Every payload is preceded by a block header. For the fit strategies the
//! headers form one doubly linked list in address order:
//!
//! ```text
//!   Heap Memory (fit strategies):
//!
//!   ┌────────────────────────────────────────────────────────────────────┐
//!   │ ┌─────┬──────────┐ ┌─────┬──────┐ ┌─────┬───────────────┐          │
//!   │ │ hdr │  used    │ │ hdr │ free │ │ hdr │     used      │ ...      │
//!   │ └─────┴──────────┘ └─────┴──────┘ └─────┴───────────────┘          │
//!   │    ▲                  ▲              ▲                       ▲     │
//!   │  first ◄──prev/next──►│◄──prev/next─►│ last              Program   │
//!   │                                                            Break   │
//!   └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   fitalloc
//!   ├── align       - Alignment macros (align!, align_to!)
//!   ├── block       - Block header and address arithmetic
//!   ├── config      - Strategy and Config
//!   ├── error       - HeapError
//!   ├── fit         - First/best/worst-fit placement
//!   ├── grower      - Heap extension (sbrk, arena, mmap)
//!   ├── heap        - Heap: allocate/release/resize, split and coalesce
//!   ├── locked      - LockedHeap, a GlobalAlloc wrapper
//!   └── segregated  - Power-of-two size-class lists
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use fitalloc::{Config, Heap, Strategy};
//!
//! let mut heap = Heap::new(Config::new(Strategy::BestFit));
//!
//! let ptr = heap.allocate(16) as *mut u64;
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     *ptr = 42;
//!     let ptr = heap.resize(ptr.cast(), 64) as *mut u64;
//!     assert_eq!(*ptr, 42);
//!     heap.release(ptr.cast());
//! }
//! ```
//!
//! ## Strategies
//!
//! - **First-fit**: first free block that is large enough.
//! - **Best-fit**: smallest free block that is large enough.
//! - **Worst-fit**: largest free block that is large enough.
//! - **Segregated**: one list per power-of-two size class (8, 16, 32, ...
//!   bytes). Blocks in a class all have the class capacity and are never
//!   split or merged; requests above the largest class fail.
//!
//! The fit strategies split oversized blocks on allocation and merge a
//! released block with its free neighbours, but only when the two are
//! actually adjacent in memory.
//!
//! ## Limitations
//!
//! - **Single-threaded**: a [`Heap`] must not be shared; wrap it in a
//!   [`LockedHeap`] for that.
//! - **Fixed alignment**: payloads are aligned to [`align::ALIGNMENT`] (8).
//! - **Never shrinks**: memory taken from the OS is kept for reuse.
//! - **Unix-only**: growth goes through `libc` (`sbrk`, `mmap`).

use core::sync::atomic::{AtomicBool, Ordering};

#[macro_use]
#[allow(unused_macros)]
mod alog;

pub mod align;
pub mod block;
pub mod config;
pub mod error;
pub mod fit;
pub mod grower;
pub mod heap;
pub mod locked;
pub mod segregated;

pub use config::{Config, Strategy};
pub use error::HeapError;
pub use grower::{ArenaGrower, HeapGrower, MmapGrower, SbrkGrower};
pub use heap::{BlockInfo, Heap, HeapStats};
pub use locked::LockedHeap;

static ALLOC_LOG: AtomicBool = AtomicBool::new(false);

/// Turns on allocator logging through the `log` facade.
///
/// Do not enable this while the heap is the global allocator and the logger
/// allocates: the nested allocation would spin on the heap's own lock.
pub fn enable_logging() {
  ALLOC_LOG.store(true, Ordering::Relaxed);
}

/// Turns allocator logging off again.
pub fn disable_logging() {
  ALLOC_LOG.store(false, Ordering::Relaxed);
}

pub(crate) fn should_log() -> bool {
  ALLOC_LOG.load(Ordering::Relaxed)
}
