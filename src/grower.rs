//! Sources of fresh memory for the heap.
//!
//! ```text
//!   SbrkGrower       one region, grows upward with the program break
//!   ┌──────┬──────┬───────────┬─────────
//!   │ ext1 │ ext2 │   ext3    │ ...        (contiguous unless someone else
//!   └──────┴──────┴───────────┴─────────    moves the break in between)
//!
//!   ArenaGrower      one pre-mapped region, handed out front to back
//!   ┌──────┬──────┬───────────┬──────────────────┐
//!   │ ext1 │ ext2 │   ext3    │      unused      │ ← fails once full
//!   └──────┴──────┴───────────┴──────────────────┘
//!
//!   MmapGrower       one mapping per extension, rounded up to pages
//!   ┌──────┬───┐   ┌──────┬───┐   ┌───────────┬──┐
//!   │ ext1 │///│   │ ext2 │///│   │   ext3    │//│  (never contiguous)
//!   └──────┴───┘   └──────┴───┘   └───────────┴──┘
//! ```

use core::ptr::{self, NonNull};

use libc::{c_void, intptr_t, sbrk};

use crate::{
  align, align_to,
  error::{HeapError, Result},
};

/// Something the heap can ask for more memory.
///
/// # Safety
///
/// Every pointer returned by `grow` must be aligned to
/// [`ALIGNMENT`](crate::align::ALIGNMENT), valid
/// for reads and writes of the requested number of bytes, not overlap any
/// earlier grant, and stay valid for as long as the grower is alive.
pub unsafe trait HeapGrower {
  /// Hands out `bytes` fresh bytes, or `None` when no more memory is available.
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Option<NonNull<u8>>;
}

/// Grows the heap by moving the program break with `sbrk(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SbrkGrower;

impl SbrkGrower {
  pub const fn new() -> Self {
    Self
  }
}

const SBRK_FAILED: *mut c_void = usize::MAX as *mut c_void;

unsafe impl HeapGrower for SbrkGrower {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Option<NonNull<u8>> {
    let increment = intptr_t::try_from(bytes).ok()?;

    unsafe {
      let brk = sbrk(0) as usize;
      let pad = align!(brk) - brk;
      if pad != 0 && sbrk(pad as intptr_t) == SBRK_FAILED {
        aerror!("sbrk failed while aligning the break by {} bytes", pad);
        return None;
      }

      let address = sbrk(increment);
      if address == SBRK_FAILED {
        aerror!("sbrk({}) failed", bytes);
        return None;
      }

      atrace!("sbrk({}) -> {:p}", bytes, address);
      NonNull::new(address.cast::<u8>())
    }
  }
}

fn page_size() -> usize {
  match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
    size if size > 0 => size as usize,
    _ => 4096,
  }
}

fn map_anonymous(len: usize) -> Option<NonNull<u8>> {
  let address = unsafe {
    libc::mmap(
      ptr::null_mut(),
      len,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
      -1,
      0,
    )
  };
  if address == libc::MAP_FAILED {
    aerror!("mmap of {} bytes failed", len);
    return None;
  }
  NonNull::new(address.cast::<u8>())
}

/// A fixed region mapped up front and handed out in order.
///
/// Successive grants are contiguous, which makes the arena behave like the
/// program break while keeping each heap isolated. The region is unmapped
/// when the grower is dropped.
#[derive(Debug)]
pub struct ArenaGrower {
  base: NonNull<u8>,
  capacity: usize,
  used: usize,
}

// The arena exclusively owns its mapping.
unsafe impl Send for ArenaGrower {}

impl ArenaGrower {
  /// Maps `capacity` bytes, rounded up to whole pages.
  pub fn new(capacity: usize) -> Result<Self> {
    let capacity = align_to!(capacity.max(1), page_size());
    let base = map_anonymous(capacity).ok_or(HeapError::Exhausted {
      requested: capacity,
    })?;

    adebug!("arena of {} bytes mapped at {:p}", capacity, base);
    Ok(Self {
      base,
      capacity,
      used: 0,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn used(&self) -> usize {
    self.used
  }

  pub fn remaining(&self) -> usize {
    self.capacity - self.used
  }

  pub fn base(&self) -> *const u8 {
    self.base.as_ptr()
  }
}

unsafe impl HeapGrower for ArenaGrower {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Option<NonNull<u8>> {
    let start = align!(self.used);
    let end = start.checked_add(bytes)?;
    if end > self.capacity {
      awarn!(
        "arena exhausted: {} bytes requested, {} remaining",
        bytes,
        self.remaining()
      );
      return None;
    }

    self.used = end;
    NonNull::new(unsafe { self.base.as_ptr().add(start) })
  }
}

impl Drop for ArenaGrower {
  fn drop(&mut self) {
    unsafe {
      libc::munmap(self.base.as_ptr().cast::<c_void>(), self.capacity);
    }
  }
}

/// Maps every extension separately. Grants are page-aligned and never
/// adjacent to the previous one, and they are never unmapped.
#[derive(Debug, Clone, Copy)]
pub struct MmapGrower {
  page_size: usize,
}

impl MmapGrower {
  pub fn new() -> Self {
    Self {
      page_size: page_size(),
    }
  }
}

impl Default for MmapGrower {
  fn default() -> Self {
    Self::new()
  }
}

unsafe impl HeapGrower for MmapGrower {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Option<NonNull<u8>> {
    let len = bytes.checked_add(self.page_size - 1)? & !(self.page_size - 1);
    map_anonymous(len.max(self.page_size))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::align::ALIGNMENT;

  #[test]
  fn test_arena_grants_are_contiguous() {
    let mut arena = ArenaGrower::new(4096).unwrap();

    let first = arena.grow(40).unwrap();
    let second = arena.grow(64).unwrap();

    assert_eq!(first.as_ptr() as *const u8, arena.base());
    assert_eq!(second.as_ptr() as usize, first.as_ptr() as usize + 40);
    assert_eq!(arena.used(), 104);
  }

  #[test]
  fn test_arena_keeps_grants_aligned() {
    let mut arena = ArenaGrower::new(4096).unwrap();

    arena.grow(3).unwrap();
    let next = arena.grow(8).unwrap();

    assert_eq!(next.as_ptr() as usize % ALIGNMENT, 0);
  }

  #[test]
  fn test_arena_exhaustion() {
    let mut arena = ArenaGrower::new(4096).unwrap();
    let capacity = arena.capacity();

    assert!(arena.grow(capacity + 1).is_none());
    assert!(arena.grow(capacity).is_some());
    assert!(arena.grow(1).is_none());
    assert_eq!(arena.remaining(), 0);
  }

  #[test]
  fn test_mmap_grants_are_separate_pages() {
    let mut grower = MmapGrower::new();

    let first = grower.grow(64).unwrap();
    let second = grower.grow(64).unwrap();

    assert_eq!(first.as_ptr() as usize % grower.page_size, 0);
    assert_ne!(second.as_ptr() as usize, first.as_ptr() as usize + 64);
  }
}
