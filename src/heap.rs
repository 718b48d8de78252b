use core::ptr::{self, NonNull};

use crate::{
  align,
  align::ALIGNMENT,
  block::{Block, Chain, HEADER_SIZE},
  config::{Config, Strategy},
  error::{HeapError, Result},
  fit::{BestFit, FirstFit, Placement, WorstFit},
  grower::{HeapGrower, SbrkGrower},
  segregated::SizeClasses,
};

/// Largest payload the heap will try to extend for.
const MAX_REQUEST: usize = isize::MAX as usize - HEADER_SIZE - ALIGNMENT;

/// A manually managed heap.
///
/// All state lives in this value: the address-ordered block list used by the
/// fit strategies, the size-class anchors used by the segregated strategy, and
/// the grower the heap extends itself from. Memory obtained from the grower is
/// never given back.
#[derive(Debug)]
pub struct Heap<G: HeapGrower = SbrkGrower> {
  config: Config,
  grower: G,
  first: *mut Block,
  last: *mut Block,
  classes: SizeClasses,
  extended: usize,
}

// Every block reachable from the heap lives in memory owned by its grower.
unsafe impl<G: HeapGrower + Send> Send for Heap<G> {}

impl Heap<SbrkGrower> {
  /// A heap growing with the program break.
  pub const fn new(config: Config) -> Self {
    Self::with_grower(SbrkGrower::new(), config)
  }
}

impl Default for Heap<SbrkGrower> {
  fn default() -> Self {
    Self::new(Config::default())
  }
}

impl<G: HeapGrower> Heap<G> {
  pub const fn with_grower(
    grower: G,
    config: Config,
  ) -> Self {
    Self {
      config,
      grower,
      first: ptr::null_mut(),
      last: ptr::null_mut(),
      classes: SizeClasses::new(config.size_classes()),
      extended: 0,
    }
  }

  pub fn config(&self) -> Config {
    self.config
  }

  pub fn strategy(&self) -> Strategy {
    self.config.strategy()
  }

  pub fn grower(&self) -> &G {
    &self.grower
  }

  /// Total bytes obtained from the grower, headers included.
  pub fn extended_bytes(&self) -> usize {
    self.extended
  }

  /// Allocates `size` bytes, returning null on failure or for `size == 0`.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    match self.try_allocate(size) {
      Ok(payload) => payload.as_ptr(),
      Err(HeapError::ZeroSize) => ptr::null_mut(),
      Err(err) => {
        adebug!("allocate({}) failed: {}", size, err);
        ptr::null_mut()
      }
    }
  }

  /// Allocates `size` bytes. The payload is aligned to [`ALIGNMENT`] as long
  /// as the grower honours its contract.
  pub fn try_allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    if size == 0 {
      return Err(HeapError::ZeroSize);
    }

    let block = match self.config.strategy() {
      Strategy::Segregated => self.allocate_segregated(size)?,
      _ if size > MAX_REQUEST => return Err(HeapError::Exhausted { requested: size }),
      _ => self.allocate_fit(align!(size))?,
    };

    let payload = unsafe { Block::payload(block) };
    atrace!("allocate({}) -> {:p}", size, payload);
    NonNull::new(payload).ok_or(HeapError::Exhausted { requested: size })
  }

  /// Marks the block behind `payload` free and, unless the heap is
  /// segregated, merges it with free neighbours. Null is ignored.
  ///
  /// # Safety
  ///
  /// `payload` must be null or a live allocation from this heap.
  pub unsafe fn release(
    &mut self,
    payload: *mut u8,
  ) {
    if payload.is_null() {
      return;
    }

    unsafe {
      let block = Block::from_payload(payload);
      debug_assert!(!(*block).is_free, "double release of {:p}", payload);
      (*block).is_free = true;
      atrace!("release({:p}) size={}", payload, (*block).size);

      if self.config.strategy().splits_and_coalesces() {
        self.coalesce(block);
      }
    }
  }

  /// Moves an allocation into a block of `new_size` bytes. Returns null when
  /// the new block cannot be obtained (the old one is then left untouched)
  /// and when `new_size == 0` (the old one is then released).
  ///
  /// # Safety
  ///
  /// `payload` must be null or a live allocation from this heap.
  pub unsafe fn resize(
    &mut self,
    payload: *mut u8,
    new_size: usize,
  ) -> *mut u8 {
    match unsafe { self.try_resize(payload, new_size) } {
      Ok(payload) => payload.as_ptr(),
      Err(_) => ptr::null_mut(),
    }
  }

  /// Like [`Heap::resize`], but reports why no block was returned.
  /// A zero `new_size` releases `payload` and yields [`HeapError::ZeroSize`].
  ///
  /// # Safety
  ///
  /// `payload` must be null or a live allocation from this heap.
  pub unsafe fn try_resize(
    &mut self,
    payload: *mut u8,
    new_size: usize,
  ) -> Result<NonNull<u8>> {
    if payload.is_null() {
      return self.try_allocate(new_size);
    }
    if new_size == 0 {
      unsafe { self.release(payload) };
      return Err(HeapError::ZeroSize);
    }

    let old_size = unsafe { self.usable_size(payload) };
    let moved = self.try_allocate(new_size)?;

    unsafe {
      ptr::copy_nonoverlapping(payload, moved.as_ptr(), old_size.min(new_size));
      self.release(payload);
    }
    Ok(moved)
  }

  /// Payload capacity of the block behind `payload`, which may exceed the
  /// size originally requested. Zero for null.
  ///
  /// # Safety
  ///
  /// `payload` must be null or a live allocation from this heap.
  pub unsafe fn usable_size(
    &self,
    payload: *mut u8,
  ) -> usize {
    if payload.is_null() {
      return 0;
    }
    unsafe { (*Block::from_payload(payload)).size }
  }

  /// Every block the heap manages, in list order. Under the segregated
  /// strategy the size classes are walked one after another, anchors included.
  pub fn blocks(&self) -> Blocks<'_> {
    match self.config.strategy() {
      Strategy::Segregated => Blocks {
        chain: unsafe { Chain::new(ptr::null_mut()) },
        rest: self.classes.anchors(),
      },
      _ => Blocks {
        chain: unsafe { Chain::new(self.first) },
        rest: &[],
      },
    }
  }

  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      extended: self.extended,
      ..HeapStats::default()
    };

    for block in self.blocks() {
      stats.blocks += 1;
      stats.metadata += HEADER_SIZE;
      if block.is_free {
        stats.free_blocks += 1;
        stats.free += block.size;
      } else {
        stats.live += block.size;
      }
    }

    stats
  }

  /// Logs a one-line summary of the heap.
  pub fn print_state(&self) {
    let stats = self.stats();
    ainfo!(
      "{} heap: {} blocks ({} free), live={} free={} metadata={} extended={}",
      self.config.strategy(),
      stats.blocks,
      stats.free_blocks,
      stats.live,
      stats.free,
      stats.metadata,
      stats.extended
    );
  }

  fn grow(
    grower: &mut G,
    extended: &mut usize,
    size: usize,
  ) -> Result<*mut Block> {
    let bytes = size + HEADER_SIZE;
    let address = grower.grow(bytes).ok_or_else(|| {
      aerror!("heap extension of {} bytes failed", bytes);
      HeapError::Exhausted { requested: bytes }
    })?;
    *extended += bytes;

    let block = unsafe { Block::format(address.as_ptr(), size, false) };
    adebug!("extended heap by {} bytes, new block at {:p}", bytes, block);
    Ok(block)
  }

  /// Extends the heap and appends the new block to the address-ordered list.
  fn extend(
    &mut self,
    size: usize,
  ) -> Result<*mut Block> {
    let block = Self::grow(&mut self.grower, &mut self.extended, size)?;

    unsafe {
      if self.last.is_null() {
        self.first = block;
      } else {
        (*block).prev = self.last;
        (*self.last).next = block;
      }
    }
    self.last = block;
    Ok(block)
  }

  fn find_fit(
    &self,
    size: usize,
  ) -> Option<*mut Block> {
    let blocks = unsafe { Chain::new(self.first) };
    match self.config.strategy() {
      Strategy::FirstFit => FirstFit.select(blocks, size),
      Strategy::BestFit => BestFit.select(blocks, size),
      Strategy::WorstFit => WorstFit.select(blocks, size),
      Strategy::Segregated => None,
    }
  }

  fn allocate_fit(
    &mut self,
    size: usize,
  ) -> Result<*mut Block> {
    let block = match self.find_fit(size) {
      Some(block) => {
        unsafe { (*block).is_free = false };
        block
      }
      None => self.extend(size)?,
    };

    unsafe {
      if (*block).size > size + HEADER_SIZE {
        self.split(block, size);
      }
    }
    Ok(block)
  }

  fn allocate_segregated(
    &mut self,
    size: usize,
  ) -> Result<*mut Block> {
    let Heap {
      grower,
      extended,
      classes,
      ..
    } = self;

    if !classes.is_initialized() {
      classes.init(|size| Self::grow(grower, extended, size))?;
      ainfo!(
        "initialized {} size classes, largest {} bytes",
        classes.count(),
        classes.max_size()
      );
    }

    unsafe { classes.allocate(size, |size| Self::grow(grower, extended, size)) }
  }

  /// Shrinks `block` to `size` and turns the rest into a free block right
  /// behind it.
  unsafe fn split(
    &mut self,
    block: *mut Block,
    size: usize,
  ) {
    unsafe {
      let remainder_size = (*block).size - size - HEADER_SIZE;
      let remainder = Block::format(Block::payload(block).add(size), remainder_size, true);
      (*block).size = size;

      let next = (*block).next;
      (*remainder).prev = block;
      (*remainder).next = next;
      if next.is_null() {
        self.last = remainder;
      } else {
        (*next).prev = remainder;
      }
      (*block).next = remainder;

      atrace!("split {:p}: kept {}, remainder {}", block, size, remainder_size);
      self.coalesce(remainder);
    }
  }

  /// Merges a free block with its free, contiguous neighbours: the successor
  /// first, then the predecessor.
  unsafe fn coalesce(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      let next = (*block).next;
      if !next.is_null() && (*next).is_free && Block::is_contiguous_with(block, next) {
        self.absorb_next(block);
      }

      let prev = (*block).prev;
      if !prev.is_null() && (*prev).is_free && Block::is_contiguous_with(prev, block) {
        self.absorb_next(prev);
      }
    }
  }

  unsafe fn absorb_next(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      let absorbed = (*block).next;
      (*block).size += HEADER_SIZE + (*absorbed).size;

      let after = (*absorbed).next;
      (*block).next = after;
      if after.is_null() {
        self.last = block;
      } else {
        (*after).prev = block;
      }

      atrace!("merged {:p} into {:p}, size now {}", absorbed, block, (*block).size);
    }
  }
}

/// A snapshot of one block, as yielded by [`Heap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub payload: *const u8,
  pub size: usize,
  pub is_free: bool,
}

/// Iterator over the blocks of a heap.
pub struct Blocks<'a> {
  chain: Chain,
  rest: &'a [*mut Block],
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      if let Some(block) = self.chain.next() {
        return Some(unsafe {
          BlockInfo {
            payload: Block::payload(block),
            size: (*block).size,
            is_free: (*block).is_free,
          }
        });
      }

      let (&head, rest) = self.rest.split_first()?;
      self.rest = rest;
      self.chain = unsafe { Chain::new(head) };
    }
  }
}

/// Byte accounting for a heap. `live + free + metadata == extended` as long
/// as every extension became exactly one block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  /// Bytes obtained from the grower.
  pub extended: usize,
  /// Payload bytes of allocated blocks.
  pub live: usize,
  /// Payload bytes of free blocks.
  pub free: usize,
  /// Header bytes of all blocks.
  pub metadata: usize,
  pub blocks: usize,
  pub free_blocks: usize,
}

impl HeapStats {
  pub fn accounted(&self) -> usize {
    self.live + self.free + self.metadata
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::grower::{ArenaGrower, MmapGrower};

  const ARENA_SIZE: usize = 0x10000;

  fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
    crate::enable_logging();
  }

  fn arena_heap(strategy: Strategy) -> Heap<ArenaGrower> {
    init_logging();
    let arena = ArenaGrower::new(ARENA_SIZE).expect("Failed to map arena");
    Heap::with_grower(arena, Config::new(strategy))
  }

  fn free_sizes<G: HeapGrower>(heap: &Heap<G>) -> Vec<usize> {
    heap.blocks().filter(|b| b.is_free).map(|b| b.size).collect()
  }

  #[test]
  fn test_alloc() {
    let mut heap = arena_heap(Strategy::FirstFit);

    unsafe {
      let first = heap.allocate(8).cast::<u64>();
      *first = 3;
      assert_eq!(*first, 3);

      let second = heap.allocate(12).cast::<u16>();
      for i in 0..6 {
        *second.add(i) = (i + 1) as u16;
      }

      assert_eq!(*first, 3);
      for i in 0..6 {
        assert_eq!(*second.add(i), (i + 1) as u16);
      }

      heap.release(first.cast());

      // Same block, no split: 4 rounds up to the 8 the block holds.
      let third = heap.allocate(4);
      assert_eq!(third, first.cast::<u8>());

      heap.release(third);

      // Too big for the released block, so the heap extends past it.
      let fourth = heap.allocate(16);
      assert!(fourth > third);
      assert_eq!(fourth as usize % ALIGNMENT, 0);

      fourth.cast::<u128>().write_unaligned(25);
      assert_eq!(fourth.cast::<u128>().read_unaligned(), 25);
      assert_eq!(*second.add(5), 6);
    }
  }

  #[test]
  fn test_zero_size_is_a_no_op() {
    for strategy in Strategy::ALL {
      let mut heap = arena_heap(strategy);

      assert!(heap.allocate(0).is_null());
      assert_eq!(heap.try_allocate(0), Err(HeapError::ZeroSize));
      assert_eq!(heap.extended_bytes(), 0);
      assert_eq!(heap.blocks().count(), 0);
    }
  }

  #[test]
  fn test_requests_are_rounded_to_alignment() {
    let mut heap = arena_heap(Strategy::FirstFit);

    let payload = heap.allocate(13);

    assert_eq!(unsafe { heap.usable_size(payload) }, 16);
    assert_eq!(payload as usize % ALIGNMENT, 0);
    assert_eq!(heap.extended_bytes(), 16 + HEADER_SIZE);
  }

  #[test]
  fn test_split_leaves_free_remainder() {
    let mut heap = arena_heap(Strategy::FirstFit);

    let big = heap.allocate(256);
    let guard = heap.allocate(8);
    unsafe { heap.release(big) };

    let small = heap.allocate(64);

    assert_eq!(small, big);
    assert_eq!(unsafe { heap.usable_size(small) }, 64);
    assert_eq!(free_sizes(&heap), vec![256 - 64 - HEADER_SIZE]);

    let sizes: Vec<_> = heap.blocks().map(|b| b.size).collect();
    assert_eq!(sizes, vec![64, 256 - 64 - HEADER_SIZE, 8]);
    assert!(!guard.is_null());
  }

  #[test]
  fn test_no_split_when_remainder_would_not_fit_a_header() {
    let mut heap = arena_heap(Strategy::FirstFit);

    let block = heap.allocate(64);
    heap.allocate(8);
    unsafe { heap.release(block) };

    let reused = heap.allocate(64 - HEADER_SIZE);

    assert_eq!(reused, block);
    assert_eq!(unsafe { heap.usable_size(reused) }, 64);
    assert!(free_sizes(&heap).is_empty());
  }

  #[test]
  fn test_split_remainder_merges_with_free_successor() {
    let mut heap = arena_heap(Strategy::FirstFit);

    let a = heap.allocate(128);
    let b = heap.allocate(64);
    heap.allocate(8);
    unsafe {
      heap.release(b);
      heap.release(a);
    }
    // a and b merged into one free block.
    assert_eq!(free_sizes(&heap), vec![128 + HEADER_SIZE + 64]);

    let c = heap.allocate(16);

    assert_eq!(c, a);
    assert_eq!(free_sizes(&heap), vec![128 + 64 - 16]);
  }

  #[test]
  fn test_release_merges_both_neighbours() {
    let mut heap = arena_heap(Strategy::FirstFit);

    let a = heap.allocate(32);
    let b = heap.allocate(32);
    let c = heap.allocate(32);
    heap.allocate(32);

    unsafe {
      heap.release(a);
      heap.release(c);
    }
    assert_eq!(free_sizes(&heap), vec![32, 32]);

    unsafe { heap.release(b) };
    assert_eq!(free_sizes(&heap), vec![3 * 32 + 2 * HEADER_SIZE]);
    assert_eq!(heap.stats().blocks, 2);
  }

  #[test]
  fn test_merging_the_tail_updates_last() {
    let mut heap = arena_heap(Strategy::FirstFit);

    let a = heap.allocate(32);
    let b = heap.allocate(32);
    unsafe {
      heap.release(b);
      heap.release(a);
    }
    assert_eq!(heap.stats().blocks, 1);

    // A new extension must be linked behind the merged block.
    heap.allocate(512);
    let sizes: Vec<_> = heap.blocks().map(|b| b.size).collect();
    assert_eq!(sizes, vec![32 + HEADER_SIZE + 32, 512]);
  }

  #[test]
  fn test_non_contiguous_blocks_are_not_merged() {
    init_logging();
    let mut heap = Heap::with_grower(MmapGrower::new(), Config::new(Strategy::FirstFit));

    let a = heap.allocate(32);
    let b = heap.allocate(32);
    unsafe {
      heap.release(a);
      heap.release(b);
    }

    assert_eq!(free_sizes(&heap), vec![32, 32]);
  }

  #[test]
  fn test_segregated_reuses_within_class() {
    let mut heap = arena_heap(Strategy::Segregated);

    let a = heap.allocate(5);
    let b = heap.allocate(8);
    unsafe { heap.release(a) };
    let c = heap.allocate(3);

    assert_eq!(c, a);
    assert_ne!(b, a);
    assert_eq!(unsafe { heap.usable_size(c) }, 8);
  }

  #[test]
  fn test_segregated_never_merges() {
    let mut heap = arena_heap(Strategy::Segregated);

    let a = heap.allocate(16);
    let b = heap.allocate(16);
    unsafe {
      heap.release(a);
      heap.release(b);
    }

    assert_eq!(free_sizes(&heap), vec![16, 16]);
    let anchors = heap.blocks().filter(|b| b.size == 0).count();
    assert_eq!(anchors, 4);
  }

  #[test]
  fn test_segregated_class_overflow() {
    let mut heap = arena_heap(Strategy::Segregated);

    assert_eq!(
      heap.try_allocate(65),
      Err(HeapError::ClassOverflow { size: 65, max: 64 })
    );
    assert!(heap.allocate(1000).is_null());
    assert!(!heap.allocate(64).is_null());
  }

  #[test]
  fn test_segregated_huge_request_is_class_overflow() {
    let mut heap = arena_heap(Strategy::Segregated);

    assert_eq!(
      heap.try_allocate(usize::MAX),
      Err(HeapError::ClassOverflow {
        size: usize::MAX,
        max: 64
      })
    );
    assert!(heap.allocate(usize::MAX).is_null());
  }

  #[test]
  fn test_single_size_class_heap() {
    init_logging();
    assert!(
      Config::new(Strategy::Segregated)
        .try_with_size_classes(0)
        .is_err()
    );
    let config = Config::new(Strategy::Segregated).with_size_classes(1);
    let arena = ArenaGrower::new(ARENA_SIZE).expect("Failed to map arena");
    let mut heap = Heap::with_grower(arena, config);

    assert!(!heap.allocate(8).is_null());
    assert_eq!(
      heap.try_allocate(9),
      Err(HeapError::ClassOverflow { size: 9, max: 8 })
    );
    assert_eq!(heap.blocks().filter(|b| b.size == 0).count(), 1);
  }

  #[test]
  fn test_exhaustion_leaves_heap_usable() {
    for strategy in [Strategy::FirstFit, Strategy::BestFit, Strategy::WorstFit] {
      let mut heap = arena_heap(strategy);
      let capacity = heap.grower().capacity();

      let small = heap.allocate(64);
      assert!(heap.allocate(capacity).is_null());
      assert!(matches!(
        heap.try_allocate(capacity),
        Err(HeapError::Exhausted { .. })
      ));

      let stats = heap.stats();
      assert_eq!(stats.accounted(), stats.extended);
      unsafe { heap.release(small) };
      assert_eq!(heap.allocate(64), small);
    }
  }

  #[test]
  fn test_oversized_request_is_refused() {
    let mut heap = arena_heap(Strategy::FirstFit);

    assert_eq!(
      heap.try_allocate(usize::MAX),
      Err(HeapError::Exhausted {
        requested: usize::MAX
      })
    );
    assert_eq!(heap.extended_bytes(), 0);
  }

  #[test]
  fn test_resize_zero_releases() {
    let mut heap = arena_heap(Strategy::FirstFit);

    let payload = heap.allocate(32);
    let moved = unsafe { heap.resize(payload, 0) };

    assert!(moved.is_null());
    assert_eq!(free_sizes(&heap), vec![32]);
  }

  #[test]
  fn test_resize_null_allocates() {
    let mut heap = arena_heap(Strategy::BestFit);

    let payload = unsafe { heap.resize(ptr::null_mut(), 24) };

    assert!(!payload.is_null());
    assert_eq!(unsafe { heap.usable_size(payload) }, 24);
  }

  #[test]
  fn test_failed_resize_keeps_old_block() {
    let mut heap = arena_heap(Strategy::FirstFit);
    let capacity = heap.grower().capacity();

    let payload = heap.allocate(16);
    unsafe { payload.write_bytes(0x5A, 16) };

    let moved = unsafe { heap.resize(payload, capacity) };

    assert!(moved.is_null());
    assert!(free_sizes(&heap).is_empty());
    assert_eq!(unsafe { *payload.add(15) }, 0x5A);
  }

  #[test]
  fn test_shrinking_resize_copies_prefix() {
    let mut heap = arena_heap(Strategy::WorstFit);

    let payload = heap.allocate(64);
    for i in 0..64 {
      unsafe { *payload.add(i) = i as u8 };
    }

    let moved = unsafe { heap.resize(payload, 8) };

    let copied = unsafe { core::slice::from_raw_parts(moved, 8) };
    assert_eq!(copied, &[0, 1, 2, 3, 4, 5, 6, 7]);
  }
}
