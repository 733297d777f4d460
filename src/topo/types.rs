//! Topology records as seen by the drain controller

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Identity of a tablet: its cell plus a numeric uid unique within the cell
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct TabletAlias {
    pub cell: String,
    pub uid: u32,
}

impl TabletAlias {
    pub fn new(cell: impl Into<String>, uid: u32) -> Self {
        Self {
            cell: cell.into(),
            uid,
        }
    }
}

impl fmt::Display for TabletAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:010}", self.cell, self.uid)
    }
}

impl FromStr for TabletAlias {
    type Err = Error;

    /// Parses `zone1-0000000100`; the cell itself may contain dashes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cell, uid) = s
            .rsplit_once('-')
            .ok_or_else(|| Error::TopologyError(format!("invalid tablet alias {:?}", s)))?;
        if cell.is_empty() {
            return Err(Error::TopologyError(format!(
                "invalid tablet alias {:?}: empty cell",
                s
            )));
        }
        let uid = uid
            .parse()
            .map_err(|e| Error::TopologyError(format!("invalid tablet alias {:?}: {}", s, e)))?;
        Ok(Self::new(cell, uid))
    }
}

/// Role of a tablet in its shard
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TabletType {
    Unknown,
    Primary,
    Replica,
    Rdonly,
    Spare,
    Experimental,
    Backup,
    Restore,
    Drained,
}

impl TabletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TabletType::Unknown => "UNKNOWN",
            TabletType::Primary => "PRIMARY",
            TabletType::Replica => "REPLICA",
            TabletType::Rdonly => "RDONLY",
            TabletType::Spare => "SPARE",
            TabletType::Experimental => "EXPERIMENTAL",
            TabletType::Backup => "BACKUP",
            TabletType::Restore => "RESTORE",
            TabletType::Drained => "DRAINED",
        }
    }

    /// Numeric value used by the topology protobuf enum
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => TabletType::Primary,
            2 => TabletType::Replica,
            3 => TabletType::Rdonly,
            4 => TabletType::Spare,
            5 => TabletType::Experimental,
            6 => TabletType::Backup,
            7 => TabletType::Restore,
            8 => TabletType::Drained,
            _ => TabletType::Unknown,
        }
    }
}

impl fmt::Display for TabletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TabletType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UNKNOWN" => Ok(TabletType::Unknown),
            "PRIMARY" | "MASTER" => Ok(TabletType::Primary),
            "REPLICA" => Ok(TabletType::Replica),
            "RDONLY" | "BATCH" => Ok(TabletType::Rdonly),
            "SPARE" => Ok(TabletType::Spare),
            "EXPERIMENTAL" => Ok(TabletType::Experimental),
            "BACKUP" => Ok(TabletType::Backup),
            "RESTORE" => Ok(TabletType::Restore),
            "DRAINED" => Ok(TabletType::Drained),
            other => Err(Error::TopologyError(format!(
                "unknown tablet type {:?}",
                other
            ))),
        }
    }
}

/// A tablet record read from the topology store
#[derive(Clone, Debug, PartialEq)]
pub struct Tablet {
    pub alias: TabletAlias,
    pub tablet_type: TabletType,
    pub keyspace: String,
    pub shard: String,
    pub hostname: String,
}

impl Tablet {
    pub fn alias_string(&self) -> String {
        self.alias.to_string()
    }
}

/// A shard record read from the topology store
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShardRecord {
    pub keyspace: String,
    pub name: String,
    pub primary_alias: Option<TabletAlias>,
}

impl ShardRecord {
    pub fn has_primary(&self) -> bool {
        self.primary_alias.is_some()
    }
}
