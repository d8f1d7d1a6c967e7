//! Worker-lane count policy.
//!
//! Callers configure parallelism as an explicit count, a percentage of
//! the machine's execution units, or "max". When unspecified, the default
//! uses every available unit - except on Windows-class hosts, where one
//! unit is left free to keep the desktop responsive.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How many worker lanes to drive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Parallelism {
    /// Platform default: all available units, one fewer on Windows.
    #[default]
    Auto,
    /// Every available execution unit, on every platform.
    Max,
    /// An explicit lane count.
    Count(usize),
    /// A percentage of available execution units.
    Percentage(f64),
}

impl Parallelism {
    /// Resolve to a concrete lane count for this host.
    pub fn resolve(self) -> usize {
        let available = std::thread::available_parallelism().map_or(1, |n| n.get());
        self.resolve_with(available, cfg!(windows))
    }

    fn resolve_with(self, available: usize, windows: bool) -> usize {
        let resolved = match self {
            Self::Auto => {
                if windows {
                    available.saturating_sub(1)
                } else {
                    available
                }
            }
            Self::Max => available,
            Self::Count(n) => n,
            Self::Percentage(p) => ((available as f64) * p / 100.0).floor() as usize,
        };
        resolved.max(1)
    }
}

impl FromStr for Parallelism {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("max") {
            return Ok(Self::Max);
        }
        if let Some(percent) = s.strip_suffix('%') {
            let value: f64 = percent
                .trim()
                .parse()
                .map_err(|_| anyhow!("Invalid parallelism percentage: '{s}'"))?;
            if !(0.0..=100.0).contains(&value) {
                return Err(anyhow!("Parallelism percentage out of range: '{s}'"));
            }
            return Ok(Self::Percentage(value));
        }
        let count: usize = s
            .parse()
            .map_err(|_| anyhow!("Invalid parallelism value: '{s}'"))?;
        Ok(Self::Count(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_uses_all_units_on_unix() {
        assert_eq!(Parallelism::Auto.resolve_with(8, false), 8);
    }

    #[test]
    fn test_auto_leaves_one_unit_on_windows() {
        assert_eq!(Parallelism::Auto.resolve_with(8, true), 7);
        // Never resolves to zero, even on a single-core host.
        assert_eq!(Parallelism::Auto.resolve_with(1, true), 1);
    }

    #[test]
    fn test_max_ignores_platform() {
        assert_eq!(Parallelism::Max.resolve_with(8, true), 8);
    }

    #[test]
    fn test_percentage_floors_with_minimum_of_one() {
        assert_eq!(Parallelism::Percentage(50.0).resolve_with(8, false), 4);
        assert_eq!(Parallelism::Percentage(10.0).resolve_with(4, false), 1);
    }

    #[test]
    fn test_explicit_count_clamped_to_one() {
        assert_eq!(Parallelism::Count(3).resolve_with(8, false), 3);
        assert_eq!(Parallelism::Count(0).resolve_with(8, false), 1);
    }

    #[test]
    fn test_parsing() {
        assert_eq!("max".parse::<Parallelism>().unwrap(), Parallelism::Max);
        assert_eq!("MAX".parse::<Parallelism>().unwrap(), Parallelism::Max);
        assert_eq!("4".parse::<Parallelism>().unwrap(), Parallelism::Count(4));
        assert_eq!("50%".parse::<Parallelism>().unwrap(), Parallelism::Percentage(50.0));
        assert!("150%".parse::<Parallelism>().is_err());
        assert!("banana".parse::<Parallelism>().is_err());
    }
}
