//! Replication positions
//!
//! A position is encoded as `<flavor>/<value>`. Two flavors are understood:
//!
//! - `MySQL56/<server-uuid>:<first>-<last>[:<first>-<last>...],...` — a GTID set.
//!   One set is at least another when it contains every transaction of it.
//! - `FilePos/<binlog-file>:<offset>` — a binlog coordinate, ordered by file name
//!   and then by offset.
//!
//! The empty string decodes to the zero position.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

const MYSQL56_FLAVOR: &str = "MySQL56";
const FILE_POS_FLAVOR: &str = "FilePos";

/// Inclusive range of transaction sequence numbers
type Interval = (u64, u64);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Position {
    #[default]
    Zero,
    /// Server uuid → sorted, non-overlapping, non-adjacent intervals
    GtidSet(BTreeMap<String, Vec<Interval>>),
    FilePos { file: String, offset: u64 },
}

impl Position {
    /// Decode an encoded position string
    pub fn decode(encoded: &str) -> Result<Self> {
        if encoded.is_empty() {
            return Ok(Position::Zero);
        }
        let (flavor, value) = encoded
            .split_once('/')
            .ok_or_else(|| decode_error(encoded, "missing flavor prefix"))?;
        match flavor {
            MYSQL56_FLAVOR => parse_gtid_set(encoded, value),
            FILE_POS_FLAVOR => parse_file_pos(encoded, value),
            other => Err(decode_error(
                encoded,
                &format!("unknown flavor {:?}", other),
            )),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Position::Zero => true,
            Position::GtidSet(set) => set.is_empty(),
            Position::FilePos { .. } => false,
        }
    }

    /// Whether this position includes everything in `other`.
    ///
    /// Positions of different flavors are never comparable, except that every
    /// position is at least the zero position.
    pub fn at_least(&self, other: &Position) -> bool {
        if other.is_zero() {
            return true;
        }
        match (self, other) {
            (Position::GtidSet(mine), Position::GtidSet(theirs)) => {
                theirs.iter().all(|(uuid, intervals)| {
                    let Some(own) = mine.get(uuid) else {
                        return false;
                    };
                    intervals.iter().all(|&(first, last)| {
                        own.iter().any(|&(a, b)| a <= first && last <= b)
                    })
                })
            }
            (
                Position::FilePos { file, offset },
                Position::FilePos {
                    file: other_file,
                    offset: other_offset,
                },
            ) => (file, offset) >= (other_file, other_offset),
            _ => false,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Zero => Ok(()),
            Position::GtidSet(set) => {
                write!(f, "{}/", MYSQL56_FLAVOR)?;
                let mut first_uuid = true;
                for (uuid, intervals) in set {
                    if !first_uuid {
                        f.write_str(",")?;
                    }
                    first_uuid = false;
                    f.write_str(uuid)?;
                    for &(first, last) in intervals {
                        if first == last {
                            write!(f, ":{}", first)?;
                        } else {
                            write!(f, ":{}-{}", first, last)?;
                        }
                    }
                }
                Ok(())
            }
            Position::FilePos { file, offset } => {
                write!(f, "{}/{}:{}", FILE_POS_FLAVOR, file, offset)
            }
        }
    }
}

fn decode_error(encoded: &str, reason: &str) -> Error {
    Error::PositionDecodeError {
        position: encoded.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_gtid_set(encoded: &str, value: &str) -> Result<Position> {
    let mut set: BTreeMap<String, Vec<Interval>> = BTreeMap::new();

    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let mut parts = entry.split(':');
        let uuid = parts.next().unwrap_or_default().to_ascii_lowercase();
        if uuid.is_empty() {
            return Err(decode_error(encoded, "empty server uuid"));
        }

        let mut intervals = Vec::new();
        for part in parts {
            let (first, last) = match part.split_once('-') {
                Some((a, b)) => (parse_seq(encoded, a)?, parse_seq(encoded, b)?),
                None => {
                    let n = parse_seq(encoded, part)?;
                    (n, n)
                }
            };
            if first == 0 || last < first {
                return Err(decode_error(
                    encoded,
                    &format!("invalid interval {:?}", part),
                ));
            }
            intervals.push((first, last));
        }
        if intervals.is_empty() {
            return Err(decode_error(
                encoded,
                &format!("no intervals for server {}", uuid),
            ));
        }
        set.entry(uuid).or_default().extend(intervals);
    }

    for intervals in set.values_mut() {
        normalize(intervals);
    }
    Ok(Position::GtidSet(set))
}

fn parse_seq(encoded: &str, s: &str) -> Result<u64> {
    s.parse()
        .map_err(|_| decode_error(encoded, &format!("invalid sequence number {:?}", s)))
}

/// Sort and merge overlapping or adjacent intervals
fn normalize(intervals: &mut Vec<Interval>) {
    intervals.sort_unstable();
    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for &(first, last) in intervals.iter() {
        match merged.last_mut() {
            Some(prev) if first <= prev.1.saturating_add(1) => prev.1 = prev.1.max(last),
            _ => merged.push((first, last)),
        }
    }
    *intervals = merged;
}

fn parse_file_pos(encoded: &str, value: &str) -> Result<Position> {
    let (file, offset) = value
        .rsplit_once(':')
        .ok_or_else(|| decode_error(encoded, "expected <file>:<offset>"))?;
    if file.is_empty() {
        return Err(decode_error(encoded, "empty binlog file"));
    }
    let offset = offset
        .parse()
        .map_err(|_| decode_error(encoded, &format!("invalid offset {:?}", offset)))?;
    Ok(Position::FilePos {
        file: file.to_string(),
        offset,
    })
}
