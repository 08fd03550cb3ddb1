//! Core type definitions for pulse access.

use crate::error::{CoreError, CoreResult};
use crate::sample::SlicePolicy;
use std::fmt;

/// Shot numbers must be below this value.
pub const SHOT_LIMIT: i32 = 214_748;

/// Largest valid run number.
pub const MAX_RUN: i32 = 9999;

/// Identifier of an open session within its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// A physical pulse file: experiment name, shot and run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PulseTarget {
    name: String,
    shot: i32,
    run: i32,
}

impl PulseTarget {
    /// Creates a target, checking the shot and run ranges.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the shot is outside `[0, 214748)` or
    /// the run outside `[0, 9999]`.
    pub fn new(name: impl Into<String>, shot: i32, run: i32) -> CoreResult<Self> {
        if !(0..SHOT_LIMIT).contains(&shot) {
            return Err(CoreError::invalid_argument(format!(
                "Invalid shot number {shot}. Must be between 0 and {SHOT_LIMIT}"
            )));
        }
        if !(0..=MAX_RUN).contains(&run) {
            return Err(CoreError::invalid_argument(format!(
                "Invalid run number {run}. Must be between 0 and {MAX_RUN}"
            )));
        }
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::invalid_argument("empty pulse file name"));
        }
        Ok(Self { name, shot, run })
    }

    /// Experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shot number.
    #[must_use]
    pub const fn shot(&self) -> i32 {
        self.shot
    }

    /// Run number.
    #[must_use]
    pub const fn run(&self) -> i32 {
        self.run
    }

    /// Shot and run folded into one number, `shot * 10000 + run`.
    #[must_use]
    pub fn file_number(&self) -> i64 {
        i64::from(self.shot) * 10_000 + i64::from(self.run)
    }
}

impl fmt::Display for PulseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.name, self.shot, self.run)
    }
}

/// What a put bracket writes.
#[derive(Debug, Clone, PartialEq)]
pub enum PutKind {
    /// Replace the whole record. Time-series fields share `times`, which
    /// is empty for a record without time-dependent fields.
    Full {
        /// Shared time array of the record.
        times: Vec<f64>,
    },
    /// Append one slice at `time` to every time-dependent field.
    Slice {
        /// Time of the slice.
        time: f64,
    },
    /// Overwrite the last slice of every time-dependent field.
    ReplaceLast,
}

impl PutKind {
    /// A full put of a record without time-dependent fields.
    #[must_use]
    pub const fn non_timed() -> Self {
        Self::Full { times: Vec::new() }
    }

    /// A full put of a time-dependent record.
    #[must_use]
    pub fn timed(times: Vec<f64>) -> Self {
        Self::Full { times }
    }
}

/// What a get bracket reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GetKind {
    /// Every field in full.
    Full,
    /// Time-dependent fields resolved at one time.
    Slice {
        /// Requested time.
        time: f64,
        /// How to pick between samples.
        policy: SlicePolicy,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_ranges() {
        assert!(PulseTarget::new("iter", 0, 0).is_ok());
        assert!(PulseTarget::new("iter", SHOT_LIMIT - 1, MAX_RUN).is_ok());

        let err = PulseTarget::new("iter", SHOT_LIMIT, 0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid argument: Invalid shot number 214748. Must be between 0 and 214748"
        );
        assert!(PulseTarget::new("iter", -1, 0).is_err());
        assert!(PulseTarget::new("iter", 1, 10_000).is_err());
        assert!(PulseTarget::new("", 1, 1).is_err());
    }

    #[test]
    fn file_number_folds_shot_and_run() {
        let target = PulseTarget::new("jet", 12, 3).unwrap();
        assert_eq!(target.file_number(), 120_003);
        assert_eq!(target.to_string(), "jet:12/3");
    }

    #[test]
    fn session_id_display() {
        assert_eq!(SessionId(4).to_string(), "session:4");
    }
}
