//! [`ChangePosition`], an opaque coordinate into a MySQL binlog.
//!
//! The ordering here is what lets the coordinator compare "has the streamer
//! caught up to the position recorded when `FlushAndStop` was called" without
//! either side knowing anything about the other's internal representation.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A position in a MySQL binary log: a file name (with the standard
/// `.NNNNNN` sequence suffix), a byte offset within that file, and
/// optionally the GTID of the transaction the position falls within.
///
/// Comparison first orders by the numeric suffix of `binlog_file` (so
/// `mysql-bin.000002` sorts after `mysql-bin.000001` regardless of string
/// length), then by `offset` within the same file. Positions from binlog
/// files with different basenames are incomparable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePosition {
    /// The binlog file name, e.g. `mysql-bin.000003`.
    pub binlog_file: String,
    /// Byte offset of the next event to read within `binlog_file`.
    pub offset: u64,
    /// The GTID in effect when this position was recorded, if GTID mode is
    /// enabled on the source.
    pub gtid: Option<String>,
}

impl ChangePosition {
    /// Construct a position with no GTID attached.
    pub fn new(binlog_file: impl Into<String>, offset: u64) -> Self {
        ChangePosition {
            binlog_file: binlog_file.into(),
            offset,
            gtid: None,
        }
    }

    fn file_parts(&self) -> Option<(&str, u64)> {
        let (basename, suffix) = self.binlog_file.rsplit_once('.')?;
        let suffix = suffix.parse::<u64>().ok()?;
        Some((basename, suffix))
    }
}

impl fmt::Display for ChangePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.binlog_file, self.offset)
    }
}

impl PartialOrd for ChangePosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.binlog_file == other.binlog_file {
            return Some(self.offset.cmp(&other.offset));
        }

        let (basename, suffix) = self.file_parts()?;
        let (other_basename, other_suffix) = other.file_parts()?;

        if basename != other_basename {
            return None;
        }

        Some(suffix.cmp(&other_suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_file_orders_by_offset() {
        let a = ChangePosition::new("mysql-bin.000001", 100);
        let b = ChangePosition::new("mysql-bin.000001", 200);
        assert!(a < b);
    }

    #[test]
    fn later_file_orders_after_earlier_file() {
        let a = ChangePosition::new("mysql-bin.000001", 999_999);
        let b = ChangePosition::new("mysql-bin.000002", 4);
        assert!(a < b);
    }

    #[test]
    fn different_basenames_are_incomparable() {
        let a = ChangePosition::new("mysql-bin.000001", 0);
        let b = ChangePosition::new("other-bin.000001", 0);
        assert_eq!(a.partial_cmp(&b), None);
    }
}
