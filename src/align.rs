/// Granularity every payload size is rounded up to. Must be a power of two.
pub const ALIGNMENT: usize = 8;

/// Rounds `value` up to the heap's fixed [`ALIGNMENT`].
///
/// # Examples
///
/// ```rust
/// use fitalloc::align;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(8), 8);
/// assert_eq!(align!(1), 8);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::align::ALIGNMENT)
  };
}

/// Rounds `value` up to `align`, which must be a power of two.
///
/// # Examples
///
/// ```rust
/// use fitalloc::align_to;
///
/// assert_eq!(align_to!(4097, 4096), 8192);
/// assert_eq!(align_to!(24, 16), 32);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}
