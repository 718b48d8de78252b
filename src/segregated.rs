//! Segregated size-class ("quick") lists.
//!
//! ```text
//!   class 0 (8 B)    anchor ─► [8] ─► [8] ─► [8]
//!   class 1 (16 B)   anchor ─► [16]
//!   class 2 (32 B)   anchor ─► [32] ─► [32]
//!   class 3 (64 B)   anchor
//! ```
//!
//! Every anchor is a zero-payload block that is never handed out. All blocks
//! in a class share the class capacity, so nothing is ever split or merged.

use core::ptr;

use crate::{
  block::{Block, Chain},
  config::MAX_SIZE_CLASSES,
  error::{HeapError, Result},
};

/// Payload capacity of class 0.
pub const MIN_CLASS_SIZE: usize = 8;

/// Payload capacity of class `index`.
pub const fn class_capacity(index: usize) -> usize {
  MIN_CLASS_SIZE << index
}

/// Smallest class among the first `classes` that can hold `size` bytes.
pub fn class_index(
  size: usize,
  classes: usize,
) -> Option<usize> {
  let size = size.max(MIN_CLASS_SIZE);
  if classes == 0 || size > class_capacity(classes - 1) {
    return None;
  }
  let index = size.next_power_of_two().trailing_zeros() - MIN_CLASS_SIZE.trailing_zeros();
  Some(index as usize)
}

#[derive(Debug)]
pub struct SizeClasses {
  anchors: [*mut Block; MAX_SIZE_CLASSES],
  count: usize,
}

impl SizeClasses {
  /// `count` is clamped to `1..=MAX_SIZE_CLASSES`.
  pub const fn new(count: usize) -> Self {
    let count = if count == 0 {
      1
    } else if count > MAX_SIZE_CLASSES {
      MAX_SIZE_CLASSES
    } else {
      count
    };
    Self {
      anchors: [ptr::null_mut(); MAX_SIZE_CLASSES],
      count,
    }
  }

  pub fn count(&self) -> usize {
    self.count
  }

  /// Largest request any class can serve.
  pub fn max_size(&self) -> usize {
    class_capacity(self.count - 1)
  }

  pub fn is_initialized(&self) -> bool {
    self.anchors[..self.count].iter().all(|anchor| !anchor.is_null())
  }

  /// Anchors of every class, or nothing before the first allocation.
  pub fn anchors(&self) -> &[*mut Block] {
    if self.is_initialized() {
      &self.anchors[..self.count]
    } else {
      &[]
    }
  }

  /// Creates the missing anchors. A failed extension leaves the anchors made
  /// so far in place so a later call can finish the job.
  pub fn init<F>(
    &mut self,
    mut extend: F,
  ) -> Result<()>
  where
    F: FnMut(usize) -> Result<*mut Block>,
  {
    for anchor in self.anchors[..self.count].iter_mut().filter(|a| a.is_null()) {
      *anchor = extend(0)?;
    }
    Ok(())
  }

  /// Hands out a free block of the class serving `size`, extending the heap
  /// by exactly the class capacity when the class has none left.
  ///
  /// # Safety
  ///
  /// The classes must be initialized and every block on their lists live.
  pub unsafe fn allocate<F>(
    &mut self,
    size: usize,
    extend: F,
  ) -> Result<*mut Block>
  where
    F: FnOnce(usize) -> Result<*mut Block>,
  {
    let index = class_index(size, self.count).ok_or(HeapError::ClassOverflow {
      size,
      max: self.max_size(),
    })?;

    let anchor = self.anchors[index];
    let mut tail = anchor;
    for block in unsafe { Chain::new(anchor) } {
      unsafe {
        if (*block).is_free {
          (*block).is_free = false;
          atrace!("reusing {:p} from class {}", block, index);
          return Ok(block);
        }
      }
      tail = block;
    }

    let block = extend(class_capacity(index))?;
    unsafe { (*tail).next = block };
    atrace!("appended {:p} to class {}", block, index);
    Ok(block)
  }
}
