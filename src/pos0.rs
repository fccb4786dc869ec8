//! Forensic positions.
//!
//! A [`Pos0`] names one byte of the evidence stream: a *forensic path* of
//! decode stages plus an offset within the innermost stage. The path
//! `1000-HIBER-33423-ZIP` reads "offset 1000 of the input, decoded by the
//! HIBER stage; offset 33423 of that, decoded by the ZIP stage". The empty
//! path is the raw input itself.

use std::fmt;
use std::ops::Add;
use std::str::FromStr;

use snafu::Snafu;

/// Position of one byte: forensic path plus offset.
///
/// Ordered by path, then offset, so features sort the way the evidence was
/// discovered.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pos0 {
    path: String,
    offset: u64,
}

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(display("invalid forensic path: {input:?}"))]
pub struct ParsePos0Error {
    input: String,
}

fn is_stage_token(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_alphabetic())
}

impl Pos0 {
    pub fn new(path: impl Into<String>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }

    /// Position `offset` bytes into the raw input.
    pub fn at(offset: u64) -> Self {
        Self {
            path: String::new(),
            offset,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Recursion depth: the number of decode stages in the path.
    pub fn depth(&self) -> u32 {
        self.path.split('-').filter(|t| is_stage_token(t)).count() as u32
    }

    /// The stage tokens of the path joined by `-`, e.g. `HIBER-ZIP`.
    pub fn alpha_part(&self) -> String {
        self.path
            .split('-')
            .filter(|t| is_stage_token(t))
            .collect::<Vec<_>>()
            .join("-")
    }

    /// The innermost decode stage, if the path has one.
    pub fn last_stage(&self) -> Option<&str> {
        self.path.split('-').rev().find(|t| is_stage_token(t))
    }

    /// The position of byte 0 of a buffer produced by decoding at this
    /// position: the stringified position becomes the new path and the
    /// offset restarts at zero.
    pub fn decoded(&self, stage: &str) -> Self {
        Self {
            path: format!("{}-{}", self, stage),
            offset: 0,
        }
    }
}

impl Add<u64> for &Pos0 {
    type Output = Pos0;

    fn add(self, rhs: u64) -> Pos0 {
        Pos0 {
            path: self.path.clone(),
            offset: self.offset + rhs,
        }
    }
}

impl fmt::Display for Pos0 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.offset)
        } else {
            write!(f, "{}-{}", self.path, self.offset)
        }
    }
}

impl FromStr for Pos0 {
    type Err = ParsePos0Error;

    /// Inverse of `Display`: the trailing dash-separated token is the
    /// offset, everything before it is the path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParsePos0Error {
            input: s.to_string(),
        };
        match s.rsplit_once('-') {
            None => Ok(Pos0::at(s.parse().map_err(|_| err())?)),
            Some((path, last)) => {
                if path.is_empty() {
                    return Err(err());
                }
                Ok(Pos0::new(path, last.parse().map_err(|_| err())?))
            }
        }
    }
}
