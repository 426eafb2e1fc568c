//! Arc identities and the running speed accumulator merged across workers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;
use thiserror::Error;

/// A directed segment between two consecutive stops of a line.
///
/// Travels as the canonical string `"lineId-origin-destination"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArcKey {
    pub line_id: i64,
    pub origin: i64,
    pub destination: i64,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid arc key {0:?}: expected lineId-origin-destination")]
pub struct ArcKeyParseError(pub String);

impl ArcKey {
    pub fn new(line_id: i64, origin: i64, destination: i64) -> Self {
        Self {
            line_id,
            origin,
            destination,
        }
    }
}

impl fmt::Display for ArcKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.line_id, self.origin, self.destination)
    }
}

impl FromStr for ArcKey {
    type Err = ArcKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ArcKeyParseError(s.to_string());
        let mut parts = s.split('-');
        let mut next = || -> Result<i64, ArcKeyParseError> {
            parts
                .next()
                .and_then(|p| p.trim().parse().ok())
                .ok_or_else(invalid)
        };
        let key = ArcKey::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(key)
    }
}

impl TryFrom<String> for ArcKey {
    type Error = ArcKeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ArcKey> for String {
    fn from(key: ArcKey) -> Self {
        key.to_string()
    }
}

/// Running sum of observed speeds and their count for one arc.
///
/// Merging is field-wise addition, so any order of merges yields the same
/// state. The average is always derived, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ArcAccumulator {
    pub sum_speeds_kmh: f64,
    pub observation_count: u64,
}

impl ArcAccumulator {
    pub fn new(sum_speeds_kmh: f64, observation_count: u64) -> Self {
        Self {
            sum_speeds_kmh,
            observation_count,
        }
    }

    /// A single accepted speed observation.
    pub fn observation(speed_kmh: f64) -> Self {
        Self::new(speed_kmh, 1)
    }

    /// Average speed in km/h, or `None` when nothing has been observed.
    pub fn average(&self) -> Option<f64> {
        if self.observation_count == 0 {
            None
        } else {
            Some(self.sum_speeds_kmh / self.observation_count as f64)
        }
    }
}

impl AddAssign for ArcAccumulator {
    fn add_assign(&mut self, rhs: Self) {
        self.sum_speeds_kmh += rhs.sum_speeds_kmh;
        self.observation_count += rhs.observation_count;
    }
}

impl Add for ArcAccumulator {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}
