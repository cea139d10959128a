//! Call-level status codes shared by every protocol operation.

use serde::{Deserialize, Serialize};

/// Outcome of one protocol call.
///
/// Calls never abort on the first bad item: they handle as much of the
/// request as they can and report the most severe condition met on the way.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum Status {
    /// Every requested and supported item was handled as asked.
    #[default]
    #[strum(serialize = "OK")]
    Ok,
    /// Some requested index is not supported by this object.
    #[strum(serialize = "BAD_INDEX")]
    BadIndex,
    /// The reply could not carry everything, or a value was rejected.
    #[strum(serialize = "NO_MEMORY")]
    NoMemory,
    /// Some item needed to wait while the call forbade waiting.
    #[strum(serialize = "BLOCKING")]
    Blocking,
    /// A waiting call did not finish within the object's time bound.
    #[strum(serialize = "TIMED_OUT")]
    TimedOut,
    /// The object can no longer honor its contracts.
    #[strum(serialize = "CORRUPTED")]
    Corrupted,
}

impl Status {
    /// Rank used when several conditions hit in a single call.
    const fn severity(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::BadIndex => 1,
            Self::NoMemory => 2,
            Self::Blocking => 3,
            Self::TimedOut => 4,
            Self::Corrupted => 5,
        }
    }

    /// Returns the more severe of the two statuses.
    pub const fn merge(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Raises `self` to `other` when `other` is more severe.
    pub fn raise(&mut self, other: Self) {
        *self = self.merge(other);
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_most_severe() {
        assert_eq!(Status::Ok.merge(Status::BadIndex), Status::BadIndex);
        assert_eq!(Status::TimedOut.merge(Status::NoMemory), Status::TimedOut);
        assert_eq!(Status::Corrupted.merge(Status::TimedOut), Status::Corrupted);
        assert_eq!(Status::Blocking.merge(Status::Ok), Status::Blocking);
    }

    #[test]
    fn test_raise_accumulates() {
        let mut status = Status::Ok;
        status.raise(Status::BadIndex);
        status.raise(Status::Blocking);
        status.raise(Status::NoMemory);
        assert_eq!(status, Status::Blocking);
    }

    #[test]
    fn test_wire_names_round_trip() {
        assert_eq!(Status::TimedOut.to_string(), "TIMED_OUT");
        assert_eq!("NO_MEMORY".parse::<Status>().unwrap(), Status::NoMemory);
    }
}
