use thiserror::Error;

/// Reasons an operation on a [`Heap`](crate::Heap) or its configuration can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
  /// A zero-byte allocation was requested.
  #[error("zero-size allocation requested")]
  ZeroSize,
  /// The grower could not provide more memory.
  #[error("heap extension of {requested} bytes refused")]
  Exhausted { requested: usize },
  /// A segregated-list request is larger than the largest size class.
  #[error("{size} bytes exceeds the largest size class ({max} bytes)")]
  ClassOverflow { size: usize, max: usize },
  #[error("size class count must be between 1 and {max}, got {count}", max = crate::config::MAX_SIZE_CLASSES)]
  InvalidSizeClasses { count: usize },
  #[error("size class count `{0}` is not a number")]
  UnparsableSizeClasses(String),
  #[error("unknown placement strategy `{0}`")]
  UnknownStrategy(String),
}

pub type Result<T> = core::result::Result<T, HeapError>;
