use crate::diff::{ListOp, apply_ops, reconcile_keys};
use cv_core::format::human_bytes;
use cv_core::{ChainKind, Family, JumpEdges, JumpRef, Rule, TableKey, TableSnapshot};
use std::collections::HashSet;
use std::fmt;

/// Identity of a view node; stable for as long as the node survives reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

fn alloc(next_id: &mut u64) -> NodeId {
    *next_id += 1;
    NodeId(*next_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowNode {
    pub id: NodeId,
    pub rule: Rule,
    /// Target names a chain of the same table
    pub jump: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainNode {
    pub id: NodeId,
    pub name: String,
    pub header: ChainKind,
    pub rows: Vec<RowNode>,
    /// Rules elsewhere in the table that jump here
    pub references: Vec<JumpRef>,
}

impl ChainNode {
    fn new(id: NodeId, name: &str, header: ChainKind) -> Self {
        Self {
            id,
            name: name.to_string(),
            header,
            rows: vec![],
            references: vec![],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: u32) -> Option<&RowNode> {
        self.rows.iter().find(|r| r.rule.index == index)
    }

    pub fn title(&self) -> String {
        match &self.header {
            ChainKind::Policy {
                policy,
                packets,
                bytes,
            } => format!(
                "Chain {} (Policy: {}, {} Packets, {} Traffic)",
                self.name,
                policy,
                packets,
                human_bytes(*bytes)
            ),
            ChainKind::Referenced { references } => {
                format!("Chain {} ({} References)", self.name, references)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNode {
    pub id: NodeId,
    pub key: TableKey,
    pub chains: Vec<ChainNode>,
}

impl TableNode {
    pub fn chain(&self, name: &str) -> Option<&ChainNode> {
        self.chains.iter().find(|c| c.name == name)
    }

    pub fn visible_chains(&self, hide_empty: bool) -> impl Iterator<Item = &ChainNode> {
        self.chains
            .iter()
            .filter(move |c| !(hide_empty && c.is_empty()))
    }

    pub fn title(&self) -> String {
        format!("Table: {}", self.key.table)
    }
}

/// What one `apply` call changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub key: TableKey,
    pub table_created: bool,
    pub chains_inserted: usize,
    pub chains_removed: usize,
    pub chains_kept: usize,
    pub headers_changed: usize,
    pub rows_added: usize,
    pub rows_changed: usize,
    pub rows_removed: usize,
}

impl ReconcileReport {
    fn new(key: TableKey) -> Self {
        Self {
            key,
            table_created: false,
            chains_inserted: 0,
            chains_removed: 0,
            chains_kept: 0,
            headers_changed: 0,
            rows_added: 0,
            rows_changed: 0,
            rows_removed: 0,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        !self.table_created
            && self.chains_inserted == 0
            && self.chains_removed == 0
            && self.headers_changed == 0
            && self.rows_added == 0
            && self.rows_changed == 0
            && self.rows_removed == 0
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: chains +{} -{} ={} (headers ~{}), rows +{} -{} ~{}",
            self.key,
            self.chains_inserted,
            self.chains_removed,
            self.chains_kept,
            self.headers_changed,
            self.rows_added,
            self.rows_removed,
            self.rows_changed
        )
    }
}

/// The live view: tables in (family, priority) order, each holding chain nodes
#[derive(Debug, Default)]
pub struct ViewTree {
    tables: Vec<TableNode>,
    hide_empty: bool,
    next_id: u64,
}

impl ViewTree {
    pub fn new(hide_empty: bool) -> Self {
        Self {
            hide_empty,
            ..Self::default()
        }
    }

    pub fn tables(&self) -> &[TableNode] {
        &self.tables
    }

    pub fn tables_for(&self, family: Family) -> impl Iterator<Item = &TableNode> {
        self.tables.iter().filter(move |t| t.key.family == family)
    }

    pub fn table(&self, key: TableKey) -> Option<&TableNode> {
        self.tables.iter().find(|t| t.key == key)
    }

    pub fn chain(&self, key: TableKey, name: &str) -> Option<&ChainNode> {
        self.table(key).and_then(|t| t.chain(name))
    }

    pub fn has_family(&self, family: Family) -> bool {
        self.tables_for(family).next().is_some()
    }

    pub fn hide_empty(&self) -> bool {
        self.hide_empty
    }

    pub fn set_hide_empty(&mut self, hide: bool) {
        self.hide_empty = hide;
    }

    /// Flip the global empty-chain toggle and return the new state
    pub fn toggle_hide_empty(&mut self) -> bool {
        self.hide_empty = !self.hide_empty;
        self.hide_empty
    }

    /// Bring one table in line with a fresh snapshot, preserving surviving node ids
    pub fn apply(&mut self, snapshot: &TableSnapshot, edges: &JumpEdges) -> ReconcileReport {
        let mut report = ReconcileReport::new(snapshot.key);
        let ViewTree {
            tables, next_id, ..
        } = self;

        let slot = match tables.binary_search_by(|t| t.key.cmp(&snapshot.key)) {
            Ok(slot) => slot,
            Err(slot) => {
                tables.insert(
                    slot,
                    TableNode {
                        id: alloc(next_id),
                        key: snapshot.key,
                        chains: vec![],
                    },
                );
                report.table_created = true;
                slot
            }
        };
        let table = &mut tables[slot];

        let previous: Vec<String> = table.chains.iter().map(|c| c.name.clone()).collect();
        let next: Vec<String> = snapshot.chains.iter().map(|c| c.name.clone()).collect();
        let ops = reconcile_keys(&previous, &next);

        for op in &ops {
            match op {
                ListOp::Delete { .. } => report.chains_removed += 1,
                ListOp::Update { .. } => report.chains_kept += 1,
                ListOp::Insert { .. } => report.chains_inserted += 1,
            }
        }

        apply_ops(
            &mut table.chains,
            &ops,
            |node| &node.name,
            |name| {
                let header = snapshot
                    .chain(name)
                    .map(|c| c.kind.clone())
                    .unwrap_or(ChainKind::Referenced { references: 0 });
                ChainNode::new(alloc(next_id), name, header)
            },
            |_| {},
        );

        let chain_names: HashSet<&str> = snapshot.chains.iter().map(|c| c.name.as_str()).collect();

        for node in table.chains.iter_mut() {
            let Some(chain) = snapshot.chain(&node.name) else {
                continue;
            };

            if node.header != chain.kind {
                node.header = chain.kind.clone();
                report.headers_changed += 1;
            }
            node.references = edges.references_to(&node.name).to_vec();

            sync_rows(&mut node.rows, &chain.rules, &chain_names, next_id, &mut report);
        }

        report
    }
}

/// Reuse rows index by index, trim the tail, append for growth
fn sync_rows(
    rows: &mut Vec<RowNode>,
    rules: &[Rule],
    chain_names: &HashSet<&str>,
    next_id: &mut u64,
    report: &mut ReconcileReport,
) {
    for (row, rule) in rows.iter_mut().zip(rules) {
        let jump = chain_names.contains(rule.target.as_str());
        if row.rule != *rule || row.jump != jump {
            row.rule = rule.clone();
            row.jump = jump;
            report.rows_changed += 1;
        }
    }

    if rows.len() > rules.len() {
        report.rows_removed += rows.len() - rules.len();
        rows.truncate(rules.len());
    }

    for rule in &rules[rows.len()..] {
        rows.push(RowNode {
            id: alloc(next_id),
            rule: rule.clone(),
            jump: chain_names.contains(rule.target.as_str()),
        });
        report.rows_added += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_core::{TableName, TableSnapshot};
    use cv_ipt::parse_dump;

    const CYCLE_ONE: &str = "\
Chain INPUT (policy ACCEPT 10 packets, 500 bytes)
num   pkts bytes target prot opt in out source    destination
1        2   100 ACCEPT tcp  --  *  *  0.0.0.0/0 0.0.0.0/0 /* !fw3: allow-ssh */
2        0     0 foo    all  --  *  *  0.0.0.0/0 0.0.0.0/0
Chain OUTPUT (policy ACCEPT 0 packets, 0 bytes)
num   pkts bytes target prot opt in out source    destination
Chain foo (1 references)
num   pkts bytes target prot opt in out source    destination
1        0     0 DROP   all  --  *  *  0.0.0.0/0 0.0.0.0/0
";

    const CYCLE_TWO: &str = "\
Chain INPUT (policy ACCEPT 12 packets, 620 bytes)
num   pkts bytes target prot opt in out source    destination
1        4   220 ACCEPT tcp  --  *  *  0.0.0.0/0 0.0.0.0/0 /* !fw3: allow-ssh */
Chain OUTPUT (policy ACCEPT 0 packets, 0 bytes)
num   pkts bytes target prot opt in out source    destination
Chain bar (0 references)
num   pkts bytes target prot opt in out source    destination
1        0     0 RETURN all  --  *  *  0.0.0.0/0 0.0.0.0/0
2        0     0 RETURN all  --  *  *  0.0.0.0/0 0.0.0.0/0
";

    fn key(family: Family, table: TableName) -> TableKey {
        TableKey::new(family, table)
    }

    fn apply_text(tree: &mut ViewTree, key: TableKey, text: &str) -> ReconcileReport {
        let snapshot = parse_dump(key, text);
        let edges = JumpEdges::resolve(&snapshot);
        tree.apply(&snapshot, &edges)
    }

    #[test]
    fn first_apply_builds_table_and_chains() {
        let mut tree = ViewTree::default();
        let filter = key(Family::V4, TableName::Filter);
        let report = apply_text(&mut tree, filter, CYCLE_ONE);

        assert!(report.table_created);
        assert_eq!(report.chains_inserted, 3);
        assert_eq!(report.rows_added, 3);

        let table = tree.table(filter).unwrap();
        let names: Vec<&str> = table.chains.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["INPUT", "OUTPUT", "foo"]);

        let input = table.chain("INPUT").unwrap();
        assert!(!input.rows[0].jump);
        assert!(input.rows[1].jump);
        assert_eq!(table.chain("foo").unwrap().references.len(), 1);
    }

    #[test]
    fn reapplying_same_snapshot_is_idempotent() {
        let mut tree = ViewTree::default();
        let filter = key(Family::V4, TableName::Filter);
        apply_text(&mut tree, filter, CYCLE_ONE);
        let before = tree.table(filter).unwrap().clone();

        let report = apply_text(&mut tree, filter, CYCLE_ONE);

        assert!(report.is_unchanged());
        assert_eq!(report.chains_kept, 3);
        assert_eq!(tree.tables().len(), 1);
        assert_eq!(tree.table(filter).unwrap(), &before);
    }

    #[test]
    fn stale_chain_is_removed_with_its_references() {
        let mut tree = ViewTree::default();
        let filter = key(Family::V4, TableName::Filter);
        apply_text(&mut tree, filter, CYCLE_ONE);
        let input_id = tree.chain(filter, "INPUT").unwrap().id;
        let ssh_row_id = tree.chain(filter, "INPUT").unwrap().rows[0].id;

        let report = apply_text(&mut tree, filter, CYCLE_TWO);

        assert_eq!(report.chains_removed, 1);
        assert_eq!(report.chains_inserted, 1);
        assert_eq!(report.headers_changed, 1);
        assert_eq!(report.rows_removed, 1);
        assert!(tree.chain(filter, "foo").is_none());

        let input = tree.chain(filter, "INPUT").unwrap();
        assert_eq!(input.id, input_id);
        assert_eq!(input.rows.len(), 1);
        assert_eq!(input.rows[0].id, ssh_row_id);
        assert_eq!(input.rows[0].rule.packets, 4);
        assert!(input.references.is_empty());

        let names: Vec<&str> = tree
            .table(filter)
            .unwrap()
            .chains
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["INPUT", "OUTPUT", "bar"]);
    }

    #[test]
    fn tables_are_inserted_in_priority_order() {
        let mut tree = ViewTree::default();
        let empty = "Chain PREROUTING (policy ACCEPT 0 packets, 0 bytes)\n";

        for (family, table) in [
            (Family::V6, TableName::Filter),
            (Family::V4, TableName::Raw),
            (Family::V4, TableName::Filter),
            (Family::V4, TableName::Nat),
        ] {
            apply_text(&mut tree, key(family, table), empty);
        }

        let order: Vec<TableKey> = tree.tables().iter().map(|t| t.key).collect();
        assert_eq!(
            order,
            vec![
                key(Family::V4, TableName::Filter),
                key(Family::V4, TableName::Nat),
                key(Family::V4, TableName::Raw),
                key(Family::V6, TableName::Filter),
            ]
        );
        assert_eq!(tree.tables_for(Family::V4).count(), 3);
    }

    #[test]
    fn empty_chains_hide_with_global_toggle() {
        let mut tree = ViewTree::default();
        let filter = key(Family::V4, TableName::Filter);
        apply_text(&mut tree, filter, CYCLE_ONE);

        let table = tree.table(filter).unwrap();
        assert_eq!(table.visible_chains(tree.hide_empty()).count(), 3);

        assert!(tree.toggle_hide_empty());
        let table = tree.table(filter).unwrap();
        let visible: Vec<&str> = table
            .visible_chains(tree.hide_empty())
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(visible, vec!["INPUT", "foo"]);
    }

    #[test]
    fn empty_snapshot_clears_table_but_keeps_it() {
        let mut tree = ViewTree::default();
        let filter = key(Family::V4, TableName::Filter);
        apply_text(&mut tree, filter, CYCLE_ONE);

        let report = tree.apply(&TableSnapshot::new(filter), &JumpEdges::default());

        assert_eq!(report.chains_removed, 3);
        assert!(tree.table(filter).unwrap().chains.is_empty());
    }

    #[test]
    fn policy_title_keeps_packet_count_unscaled() {
        let mut tree = ViewTree::default();
        let filter = key(Family::V4, TableName::Filter);
        apply_text(
            &mut tree,
            filter,
            "Chain FORWARD (policy DROP 123456 packets, 2500000 bytes)\n",
        );

        assert_eq!(
            tree.chain(filter, "FORWARD").unwrap().title(),
            "Chain FORWARD (Policy: DROP, 123456 Packets, 2.50 MB Traffic)"
        );
    }

    #[test]
    fn chain_titles_carry_counters() {
        let mut tree = ViewTree::default();
        let filter = key(Family::V4, TableName::Filter);
        apply_text(&mut tree, filter, CYCLE_ONE);

        assert_eq!(
            tree.chain(filter, "INPUT").unwrap().title(),
            "Chain INPUT (Policy: ACCEPT, 10 Packets, 500 B Traffic)"
        );
        assert_eq!(
            tree.chain(filter, "foo").unwrap().title(),
            "Chain foo (1 References)"
        );
    }
}
