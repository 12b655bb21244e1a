use crate::error::ParseNameError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Placeholder shown for absent target, options and comment columns
pub const NO_VALUE: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub const ALL: [Family; 2] = [Family::V4, Family::V6];

    /// Stable identifier used in node keys ("ipv4" / "ipv6")
    pub fn key(&self) -> &'static str {
        match self {
            Family::V4 => "ipv4",
            Family::V6 => "ipv6",
        }
    }

    /// Name of the userspace tool that dumps this family
    pub fn tool(&self) -> &'static str {
        match self {
            Family::V4 => "iptables",
            Family::V6 => "ip6tables",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::V4 => write!(f, "IPv4"),
            Family::V6 => write!(f, "IPv6"),
        }
    }
}

impl FromStr for Family {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v4" | "ipv4" | "4" => Ok(Family::V4),
            "v6" | "ipv6" | "6" => Ok(Family::V6),
            _ => Err(ParseNameError::Family(s.to_string())),
        }
    }
}

/// The four iptables tables, declared in display priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableName {
    Filter,
    Nat,
    Mangle,
    Raw,
}

impl TableName {
    pub const ALL: [TableName; 4] = [
        TableName::Filter,
        TableName::Nat,
        TableName::Mangle,
        TableName::Raw,
    ];

    /// Argument passed to `-t`
    pub fn as_arg(&self) -> &'static str {
        match self {
            TableName::Filter => "filter",
            TableName::Nat => "nat",
            TableName::Mangle => "mangle",
            TableName::Raw => "raw",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TableName::Filter => "Filter",
            TableName::Nat => "NAT",
            TableName::Mangle => "Mangle",
            TableName::Raw => "Raw",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for TableName {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TableName::ALL
            .into_iter()
            .find(|t| t.as_arg().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseNameError::Table(s.to_string()))
    }
}

/// Composite identity of one dump: ordered by family, then table priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableKey {
    pub family: Family,
    pub table: TableName,
}

impl TableKey {
    pub fn new(family: Family, table: TableName) -> Self {
        Self { family, table }
    }

    /// Every (family, table) pair for the given families and tables
    pub fn all(families: &[Family], tables: &[TableName]) -> Vec<TableKey> {
        families
            .iter()
            .flat_map(|family| tables.iter().map(|table| TableKey::new(*family, *table)))
            .collect()
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.family.key(), self.table.as_arg())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChainKind {
    /// Built-in chain with a default policy and its own counters
    Policy {
        policy: String,
        packets: u64,
        bytes: u64,
    },
    /// User-defined chain, only reachable through jumps
    Referenced { references: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub name: String,
    #[serde(flatten)]
    pub kind: ChainKind,
    pub rules: Vec<Rule>,
}

impl Chain {
    pub fn policy(name: impl Into<String>, policy: impl Into<String>, packets: u64, bytes: u64) -> Self {
        Self {
            name: name.into(),
            kind: ChainKind::Policy {
                policy: policy.into(),
                packets,
                bytes,
            },
            rules: vec![],
        }
    }

    pub fn referenced(name: impl Into<String>, references: u64) -> Self {
        Self {
            name: name.into(),
            kind: ChainKind::Referenced { references },
            rules: vec![],
        }
    }

    pub fn is_policy(&self) -> bool {
        matches!(self.kind, ChainKind::Policy { .. })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub index: u32,
    pub packets: u64,
    pub bytes: u64,
    pub target: String,
    pub protocol: String,
    pub in_interface: String,
    pub out_interface: String,
    pub source: String,
    pub destination: String,
    pub options: String,
    pub comment: String,
}

/// All chains parsed from one (family, table) dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub key: TableKey,
    pub chains: Vec<Chain>,
}

impl TableSnapshot {
    pub fn new(key: TableKey) -> Self {
        Self {
            key,
            chains: vec![],
        }
    }

    pub fn chain(&self, name: &str) -> Option<&Chain> {
        self.chains.iter().find(|c| c.name == name)
    }

    pub fn rule_count(&self) -> usize {
        self.chains.iter().map(|c| c.rules.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_keys_order_by_family_then_priority() {
        let mut keys = vec![
            TableKey::new(Family::V6, TableName::Filter),
            TableKey::new(Family::V4, TableName::Raw),
            TableKey::new(Family::V4, TableName::Filter),
            TableKey::new(Family::V4, TableName::Nat),
        ];
        keys.sort();

        assert_eq!(keys[0], TableKey::new(Family::V4, TableName::Filter));
        assert_eq!(keys[1], TableKey::new(Family::V4, TableName::Nat));
        assert_eq!(keys[2], TableKey::new(Family::V4, TableName::Raw));
        assert_eq!(keys[3], TableKey::new(Family::V6, TableName::Filter));
    }

    #[test]
    fn table_names_parse_case_insensitively() {
        assert_eq!("NAT".parse::<TableName>().unwrap(), TableName::Nat);
        assert_eq!("mangle".parse::<TableName>().unwrap(), TableName::Mangle);
        assert!("security".parse::<TableName>().is_err());
        assert_eq!("ipv6".parse::<Family>().unwrap(), Family::V6);
    }

    #[test]
    fn key_display_matches_node_identifiers() {
        let key = TableKey::new(Family::V6, TableName::Mangle);
        assert_eq!(key.to_string(), "ipv6-mangle");
        assert_eq!(TableName::Nat.to_string(), "NAT");
    }

    #[test]
    fn all_keys_cover_every_pair() {
        let keys = TableKey::all(&Family::ALL, &TableName::ALL);
        assert_eq!(keys.len(), 8);
        assert_eq!(keys[4], TableKey::new(Family::V6, TableName::Filter));
    }
}
