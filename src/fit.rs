//! Placement policies over the address-ordered block list.

use crate::block::{Block, Chain};

/// Chooses which free block satisfies a request.
pub trait Placement {
  /// Returns a free block whose payload holds at least `size` bytes.
  fn select(
    &self,
    blocks: Chain,
    size: usize,
  ) -> Option<*mut Block>;
}

/// Takes the first candidate in address order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstFit;

/// Takes the smallest candidate; ties go to the earliest.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestFit;

/// Takes the largest candidate; ties go to the earliest.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorstFit;

fn candidates(
  blocks: Chain,
  size: usize,
) -> impl Iterator<Item = *mut Block> {
  blocks.filter(move |&block| unsafe { (*block).is_free && (*block).size >= size })
}

impl Placement for FirstFit {
  fn select(
    &self,
    blocks: Chain,
    size: usize,
  ) -> Option<*mut Block> {
    candidates(blocks, size).next()
  }
}

impl Placement for BestFit {
  fn select(
    &self,
    blocks: Chain,
    size: usize,
  ) -> Option<*mut Block> {
    candidates(blocks, size)
      .reduce(|best, block| unsafe { if (*block).size < (*best).size { block } else { best } })
  }
}

impl Placement for WorstFit {
  fn select(
    &self,
    blocks: Chain,
    size: usize,
  ) -> Option<*mut Block> {
    candidates(blocks, size)
      .reduce(|worst, block| unsafe { if (*block).size > (*worst).size { block } else { worst } })
  }
}
