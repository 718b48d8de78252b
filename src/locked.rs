use core::alloc::{GlobalAlloc, Layout};

use spin::{Mutex, MutexGuard};

use crate::{
  align::ALIGNMENT,
  config::Config,
  grower::{HeapGrower, SbrkGrower},
  heap::Heap,
};

/// A [`Heap`] behind a spin lock, usable as `#[global_allocator]`.
///
/// ```rust,ignore
/// use fitalloc::{Config, LockedHeap, Strategy};
///
/// #[global_allocator]
/// static HEAP: LockedHeap = LockedHeap::new(Config::new(Strategy::BestFit));
/// ```
///
/// Requests for alignments above [`ALIGNMENT`] are refused with null.
#[derive(Debug)]
pub struct LockedHeap<G: HeapGrower = SbrkGrower> {
  inner: Mutex<Heap<G>>,
}

impl LockedHeap<SbrkGrower> {
  pub const fn new(config: Config) -> Self {
    Self::with_heap(Heap::new(config))
  }
}

impl<G: HeapGrower> LockedHeap<G> {
  pub const fn with_heap(heap: Heap<G>) -> Self {
    Self {
      inner: Mutex::new(heap),
    }
  }

  /// Locks the heap for direct use or inspection.
  pub fn lock(&self) -> MutexGuard<'_, Heap<G>> {
    self.inner.lock()
  }

  /// Returns the heap if nobody else holds the lock.
  pub fn try_lock(&self) -> Option<MutexGuard<'_, Heap<G>>> {
    self.inner.try_lock()
  }

  pub fn into_inner(self) -> Heap<G> {
    self.inner.into_inner()
  }
}

unsafe impl<G: HeapGrower + Send> GlobalAlloc for LockedHeap<G> {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      awarn!("alignment {} above {} refused", layout.align(), ALIGNMENT);
      return core::ptr::null_mut();
    }
    self.inner.lock().allocate(layout.size())
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    _layout: Layout,
  ) {
    unsafe { self.inner.lock().release(ptr) }
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return core::ptr::null_mut();
    }
    unsafe { self.inner.lock().resize(ptr, new_size) }
  }
}
