//! Construction-time heap configuration.

use core::{fmt, str::FromStr};
use std::env;

use crate::error::{HeapError, Result};

/// Upper bound on the number of segregated size classes.
pub const MAX_SIZE_CLASSES: usize = 16;
/// Size classes used when none are configured.
pub const DEFAULT_SIZE_CLASSES: usize = 4;

pub const STRATEGY_ENV: &str = "FITALLOC_STRATEGY";
pub const SIZE_CLASSES_ENV: &str = "FITALLOC_SIZE_CLASSES";

/// Placement policy a heap uses to pick a block for each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
  /// First free block large enough, in address order.
  FirstFit,
  /// Smallest free block large enough.
  BestFit,
  /// Largest free block large enough.
  WorstFit,
  /// Power-of-two size classes with one list each; never splits or merges.
  #[default]
  Segregated,
}

impl Strategy {
  pub const ALL: [Strategy; 4] = [
    Strategy::FirstFit,
    Strategy::BestFit,
    Strategy::WorstFit,
    Strategy::Segregated,
  ];

  pub const fn name(self) -> &'static str {
    match self {
      Strategy::FirstFit => "first-fit",
      Strategy::BestFit => "best-fit",
      Strategy::WorstFit => "worst-fit",
      Strategy::Segregated => "segregated",
    }
  }

  /// Whether blocks are split on allocation and merged on release.
  pub const fn splits_and_coalesces(self) -> bool {
    !matches!(self, Strategy::Segregated)
  }
}

impl fmt::Display for Strategy {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for Strategy {
  type Err = HeapError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
      "first-fit" | "first" => Ok(Strategy::FirstFit),
      "best-fit" | "best" => Ok(Strategy::BestFit),
      "worst-fit" | "worst" => Ok(Strategy::WorstFit),
      "segregated" | "quick" | "quick-fit" => Ok(Strategy::Segregated),
      _ => Err(HeapError::UnknownStrategy(s.to_string())),
    }
  }
}

/// Settings fixed for the lifetime of a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  strategy: Strategy,
  size_classes: usize,
}

impl Config {
  pub const fn new(strategy: Strategy) -> Self {
    Self {
      strategy,
      size_classes: DEFAULT_SIZE_CLASSES,
    }
  }

  pub const fn strategy(&self) -> Strategy {
    self.strategy
  }

  /// Number of segregated size classes; class `i` holds `8 << i` bytes.
  pub const fn size_classes(&self) -> usize {
    self.size_classes
  }

  /// Panics if `count` is outside `1..=MAX_SIZE_CLASSES`; in a `const`
  /// context that is a compile error.
  pub const fn with_size_classes(
    mut self,
    count: usize,
  ) -> Self {
    assert!(
      count >= 1 && count <= MAX_SIZE_CLASSES,
      "size class count out of range"
    );
    self.size_classes = count;
    self
  }

  pub fn try_with_size_classes(
    self,
    count: usize,
  ) -> Result<Self> {
    if count == 0 || count > MAX_SIZE_CLASSES {
      return Err(HeapError::InvalidSizeClasses { count });
    }
    Ok(self.with_size_classes(count))
  }

  /// Reads `FITALLOC_STRATEGY` and `FITALLOC_SIZE_CLASSES`, falling back to
  /// the defaults for unset variables.
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| env::var(key).ok())
  }

  fn from_lookup<F>(lookup: F) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let strategy = match lookup(STRATEGY_ENV) {
      Some(value) => value.parse()?,
      None => Strategy::default(),
    };
    let config = Config::new(strategy);

    match lookup(SIZE_CLASSES_ENV) {
      Some(value) => {
        let count = value
          .trim()
          .parse()
          .map_err(|_| HeapError::UnparsableSizeClasses(value.clone()))?;
        config.try_with_size_classes(count)
      }
      None => Ok(config),
    }
  }

  /// Payload capacity of the largest size class.
  pub const fn max_class_size(&self) -> usize {
    crate::segregated::MIN_CLASS_SIZE << (self.size_classes - 1)
  }
}

impl Default for Config {
  fn default() -> Self {
    Config::new(Strategy::default())
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;

  fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |key| map.get(key).cloned()
  }

  #[test]
  fn test_default_is_four_segregated_classes() {
    let config = Config::default();
    assert_eq!(config.strategy, Strategy::Segregated);
    assert_eq!(config.size_classes, 4);
    assert_eq!(config.max_class_size(), 64);
  }

  #[test]
  fn test_strategy_parse() {
    assert_eq!("first-fit".parse::<Strategy>(), Ok(Strategy::FirstFit));
    assert_eq!("Best_Fit".parse::<Strategy>(), Ok(Strategy::BestFit));
    assert_eq!(" worst ".parse::<Strategy>(), Ok(Strategy::WorstFit));
    assert_eq!("quick".parse::<Strategy>(), Ok(Strategy::Segregated));
    assert_eq!(
      "next-fit".parse::<Strategy>(),
      Err(HeapError::UnknownStrategy("next-fit".to_string()))
    );
  }

  #[test]
  fn test_strategy_display_parses_back() {
    for strategy in Strategy::ALL {
      assert_eq!(strategy.to_string().parse::<Strategy>(), Ok(strategy));
    }
  }

  #[test]
  fn test_size_class_bounds() {
    let config = Config::new(Strategy::Segregated);
    assert!(config.try_with_size_classes(0).is_err());
    assert!(config.try_with_size_classes(MAX_SIZE_CLASSES + 1).is_err());
    assert_eq!(
      config
        .try_with_size_classes(MAX_SIZE_CLASSES)
        .map(|c| c.max_class_size()),
      Ok(8 << (MAX_SIZE_CLASSES - 1))
    );
  }

  #[test]
  fn test_from_lookup() {
    let config = Config::from_lookup(lookup_from(&[
      (STRATEGY_ENV, "best-fit"),
      (SIZE_CLASSES_ENV, "6"),
    ]))
    .unwrap();
    assert_eq!(config.strategy, Strategy::BestFit);
    assert_eq!(config.size_classes, 6);

    assert_eq!(Config::from_lookup(lookup_from(&[])), Ok(Config::default()));
    assert_eq!(
      Config::from_lookup(lookup_from(&[(SIZE_CLASSES_ENV, "many")])),
      Err(HeapError::UnparsableSizeClasses("many".to_string()))
    );
    assert_eq!(
      Config::from_lookup(lookup_from(&[(SIZE_CLASSES_ENV, "0")])),
      Err(HeapError::InvalidSizeClasses { count: 0 })
    );
  }

  #[test]
  fn test_accessors_expose_validated_values() {
    let config = Config::new(Strategy::WorstFit).with_size_classes(7);
    assert_eq!(config.strategy(), Strategy::WorstFit);
    assert_eq!(config.size_classes(), 7);
    assert_eq!(
      Config::new(Strategy::Segregated).try_with_size_classes(20),
      Err(HeapError::InvalidSizeClasses { count: 20 })
    );
  }
}
