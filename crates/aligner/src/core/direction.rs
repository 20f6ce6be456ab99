//! Recursion directions and the non-empty sets callers request.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::AlignmentError;

/// Which way the boundary recursion walks the token axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// `P(B_i = j | B_{i-1} = k)`, final boundary pinned to the last frame.
    Forward,
    /// `P(B_i = j | B_{i+1} = k)`, evaluated on reflected sequences.
    Backward,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = AlignmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "forward" | "fwd" => Ok(Direction::Forward),
            "backward" | "bwd" => Ok(Direction::Backward),
            other => Err(AlignmentError::UnknownDirection(other.to_string())),
        }
    }
}

/// A non-empty subset of `{forward, backward}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Direction>", into = "Vec<Direction>")]
pub struct DirectionSet {
    forward: bool,
    backward: bool,
}

impl DirectionSet {
    pub const FORWARD: Self = Self {
        forward: true,
        backward: false,
    };
    pub const BACKWARD: Self = Self {
        forward: false,
        backward: true,
    };
    pub const BOTH: Self = Self {
        forward: true,
        backward: true,
    };

    /// Builds a set from a list, rejecting an empty request.
    pub fn from_directions(directions: &[Direction]) -> Result<Self, AlignmentError> {
        let forward = directions.contains(&Direction::Forward);
        let backward = directions.contains(&Direction::Backward);
        if !forward && !backward {
            return Err(AlignmentError::EmptyDirections);
        }
        Ok(Self { forward, backward })
    }

    /// Parses a comma separated list such as `"forward,backward"`.
    pub fn parse_list(value: &str) -> Result<Self, AlignmentError> {
        let directions = value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Direction::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_directions(&directions)
    }

    pub fn contains(&self, direction: Direction) -> bool {
        match direction {
            Direction::Forward => self.forward,
            Direction::Backward => self.backward,
        }
    }

    pub fn is_bidirectional(&self) -> bool {
        self.forward && self.backward
    }

    /// Requested directions, forward first.
    pub fn directions(&self) -> Vec<Direction> {
        let mut out = Vec::with_capacity(2);
        if self.forward {
            out.push(Direction::Forward);
        }
        if self.backward {
            out.push(Direction::Backward);
        }
        out
    }
}

impl Default for DirectionSet {
    fn default() -> Self {
        Self::BOTH
    }
}

impl TryFrom<Vec<Direction>> for DirectionSet {
    type Error = AlignmentError;

    fn try_from(value: Vec<Direction>) -> Result<Self, Self::Error> {
        Self::from_directions(&value)
    }
}

impl From<DirectionSet> for Vec<Direction> {
    fn from(value: DirectionSet) -> Self {
        value.directions()
    }
}

impl fmt::Display for DirectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.directions().iter().map(Direction::as_str).collect();
        f.write_str(&names.join(","))
    }
}
