use crate::model::TableSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One rule that jumps into a chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JumpRef {
    pub chain: String,
    pub rule: u32,
}

/// Reverse jump map for one snapshot: target chain -> rules jumping to it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JumpEdges {
    edges: HashMap<String, Vec<JumpRef>>,
}

impl JumpEdges {
    /// Collect every rule whose target names another chain of the same snapshot.
    /// Edges keep rule-parse order.
    pub fn resolve(snapshot: &TableSnapshot) -> Self {
        let known: HashSet<&str> = snapshot.chains.iter().map(|c| c.name.as_str()).collect();
        let mut edges: HashMap<String, Vec<JumpRef>> = HashMap::new();

        for chain in &snapshot.chains {
            for rule in &chain.rules {
                if rule.target == chain.name || !known.contains(rule.target.as_str()) {
                    continue;
                }

                edges.entry(rule.target.clone()).or_default().push(JumpRef {
                    chain: chain.name.clone(),
                    rule: rule.index,
                });
            }
        }

        Self { edges }
    }

    pub fn references_to(&self, chain: &str) -> &[JumpRef] {
        self.edges.get(chain).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Chain, Family, Rule, TableKey, TableName};

    fn rule(index: u32, target: &str) -> Rule {
        Rule {
            index,
            packets: 0,
            bytes: 0,
            target: target.to_string(),
            protocol: "all".to_string(),
            in_interface: "*".to_string(),
            out_interface: "*".to_string(),
            source: "0.0.0.0/0".to_string(),
            destination: "0.0.0.0/0".to_string(),
            options: "-".to_string(),
            comment: "-".to_string(),
        }
    }

    fn snapshot(chains: Vec<Chain>) -> TableSnapshot {
        TableSnapshot {
            key: TableKey::new(Family::V4, TableName::Filter),
            chains,
        }
    }

    #[test]
    fn rule_jumping_to_known_chain_creates_edge() {
        let a = Chain::referenced("A", 1);
        let mut b = Chain::policy("B", "ACCEPT", 0, 0);
        b.rules = vec![rule(1, "ACCEPT"), rule(2, "A")];

        let edges = JumpEdges::resolve(&snapshot(vec![a, b]));

        assert_eq!(
            edges.references_to("A"),
            &[JumpRef {
                chain: "B".into(),
                rule: 2
            }]
        );
        assert!(edges.references_to("ACCEPT").is_empty());
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn edges_keep_parse_order_across_chains() {
        let mut input = Chain::policy("INPUT", "DROP", 0, 0);
        input.rules = vec![rule(1, "zone_wan"), rule(2, "zone_lan"), rule(3, "zone_wan")];
        let mut forward = Chain::policy("FORWARD", "DROP", 0, 0);
        forward.rules = vec![rule(1, "zone_wan")];
        let wan = Chain::referenced("zone_wan", 3);
        let lan = Chain::referenced("zone_lan", 1);

        let edges = JumpEdges::resolve(&snapshot(vec![input, forward, wan, lan]));
        let refs: Vec<(&str, u32)> = edges
            .references_to("zone_wan")
            .iter()
            .map(|r| (r.chain.as_str(), r.rule))
            .collect();

        assert_eq!(refs, vec![("INPUT", 1), ("INPUT", 3), ("FORWARD", 1)]);
        assert_eq!(edges.references_to("zone_lan").len(), 1);
    }

    #[test]
    fn unknown_and_self_targets_are_ignored() {
        let mut a = Chain::referenced("A", 0);
        a.rules = vec![rule(1, "A"), rule(2, "missing"), rule(3, "-")];

        let edges = JumpEdges::resolve(&snapshot(vec![a]));
        assert!(edges.is_empty());
    }
}
