use core::{mem, ptr};

/// Header stored directly in front of every payload handed out by the heap.
///
/// Blocks form an intrusive doubly linked list. For the fit strategies the
/// list is in address order; under the segregated strategy each size class
/// keeps its own singly linked chain through `next`.
#[derive(Debug)]
#[repr(C)]
pub struct Block {
  pub is_free: bool,
  /// Payload bytes, not counting the header.
  pub size: usize,
  pub prev: *mut Block,
  pub next: *mut Block,
}

/// Bytes taken by a [`Block`] header in front of each payload.
pub const HEADER_SIZE: usize = mem::size_of::<Block>();

impl Block {
  pub const fn new(
    size: usize,
    is_free: bool,
  ) -> Self {
    Self {
      is_free,
      size,
      prev: ptr::null_mut(),
      next: ptr::null_mut(),
    }
  }

  /// Writes a fresh header at `at` and returns it as a block pointer.
  ///
  /// # Safety
  ///
  /// `at` must be valid for writes of `HEADER_SIZE + size` bytes and aligned
  /// for `Block`.
  pub unsafe fn format(
    at: *mut u8,
    size: usize,
    is_free: bool,
  ) -> *mut Block {
    let block = at.cast::<Block>();
    unsafe { block.write(Block::new(size, is_free)) };
    block
  }

  /// Address of the payload that follows `block`'s header.
  ///
  /// # Safety
  ///
  /// `block` must point at a header produced by this heap.
  #[inline]
  pub unsafe fn payload(block: *mut Block) -> *mut u8 {
    unsafe { block.cast::<u8>().add(HEADER_SIZE) }
  }

  /// Recovers the header from a payload address returned by the heap.
  ///
  /// # Safety
  ///
  /// `payload` must have been returned by [`Block::payload`].
  #[inline]
  pub unsafe fn from_payload(payload: *mut u8) -> *mut Block {
    unsafe { payload.sub(HEADER_SIZE) }.cast::<Block>()
  }

  /// One past the last payload byte of `block`.
  ///
  /// # Safety
  ///
  /// `block` must point at a live header.
  #[inline]
  pub unsafe fn end(block: *mut Block) -> *mut u8 {
    unsafe { Block::payload(block).add((*block).size) }
  }

  /// Returns true when `next` starts exactly where `prev`'s payload ends.
  ///
  /// Growers are not required to hand out adjacent memory, so this must hold
  /// before two blocks may be merged.
  ///
  /// # Safety
  ///
  /// `prev` must point at a live header.
  #[inline]
  pub unsafe fn is_contiguous_with(
    prev: *mut Block,
    next: *mut Block,
  ) -> bool {
    unsafe { Block::end(prev) == next.cast::<u8>() }
  }
}

/// Walks a block chain through the `next` links.
pub struct Chain {
  current: *mut Block,
}

impl Chain {
  /// # Safety
  ///
  /// Every block reachable from `head` must stay live while the chain is
  /// being walked.
  pub unsafe fn new(head: *mut Block) -> Self {
    Self { current: head }
  }
}

impl Iterator for Chain {
  type Item = *mut Block;

  fn next(&mut self) -> Option<Self::Item> {
    if self.current.is_null() {
      return None;
    }
    let block = self.current;
    self.current = unsafe { (*block).next };
    Some(block)
  }
}
