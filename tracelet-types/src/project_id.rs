use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use thiserror::Error;

/// Error returned when the last path segment of a DSN is not a project id.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("project id must be a positive integer")]
pub struct ParseProjectIdError(#[source] Option<ParseIntError>);

/// The numeric id of the project that receives the telemetry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProjectId(u64);

impl ProjectId {
    /// Wraps a raw project id.
    pub const fn new(id: u64) -> Self {
        ProjectId(id)
    }

    /// The raw project id.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for ProjectId {
    fn from(id: u64) -> Self {
        ProjectId(id)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ProjectId {
    type Err = ParseProjectIdError;

    fn from_str(segment: &str) -> Result<Self, Self::Err> {
        // `u64::from_str` accepts a leading `+`, ids never carry one
        if !segment.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseProjectIdError(None));
        }
        segment
            .parse()
            .map(ProjectId)
            .map_err(|err| ParseProjectIdError(Some(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_digits_only() {
        assert_eq!("1337".parse::<ProjectId>().unwrap().value(), 1337);
        assert!("+7".parse::<ProjectId>().is_err());
        assert!("7a".parse::<ProjectId>().is_err());
        assert!("".parse::<ProjectId>().is_err());
        assert!("99999999999999999999999".parse::<ProjectId>().is_err());
    }

    #[test]
    fn displays_as_number() {
        assert_eq!(ProjectId::from(9).to_string(), "9");
    }
}
