//! Flattens the view tree of one family into screen lines.

use cv_core::format::{human_bytes, human_count};
use cv_core::{Family, Rule, TableKey};
use cv_view::{LiveView, NodeId};

pub const COLLECTING: &str = "Collecting data...";
pub const NO_RULES: &str = "No rules in this chain.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineTarget {
    Table(TableKey),
    Chain {
        key: TableKey,
        chain: String,
        /// Chain has incoming jumps to list
        referenced: bool,
    },
    Columns,
    Rule {
        key: TableKey,
        chain: String,
        index: u32,
        /// Set when the rule target is a chain of the same table
        jump: Option<String>,
    },
    Placeholder,
    Blank,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayLine {
    pub node: Option<NodeId>,
    pub target: LineTarget,
    pub text: String,
}

impl DisplayLine {
    fn plain(target: LineTarget, text: impl Into<String>) -> Self {
        Self {
            node: None,
            target,
            text: text.into(),
        }
    }

    pub fn is_selectable(&self) -> bool {
        !matches!(self.target, LineTarget::Blank | LineTarget::Columns)
    }
}

pub fn column_header() -> String {
    format!(
        "{:>4} {:>9} {:>10}  {:<14} {:<6} {:<8} {:<8} {:<20} {:<20} {:<24} {}",
        "#", "Pkts.", "Traffic", "Target", "Prot.", "In", "Out", "Source", "Destination",
        "Options", "Comment"
    )
}

pub fn rule_line(rule: &Rule) -> String {
    format!(
        "{:>4} {:>9} {:>10}  {:<14} {:<6} {:<8} {:<8} {:<20} {:<20} {:<24} {}",
        rule.index,
        human_count(rule.packets),
        human_bytes(rule.bytes),
        rule.target,
        rule.protocol,
        rule.in_interface,
        rule.out_interface,
        rule.source,
        rule.destination,
        rule.options,
        rule.comment
    )
}

/// Screen lines for every table of `family`, honouring the hide-empty toggle
pub fn flatten(live: &LiveView, family: Family) -> Vec<DisplayLine> {
    let tree = live.tree();
    if !tree.has_family(family) {
        return vec![DisplayLine::plain(LineTarget::Placeholder, COLLECTING)];
    }

    let mut lines = vec![];

    for table in tree.tables_for(family) {
        let mut title = table.title();
        if let Some(error) = live.failure(table.key) {
            title.push_str(&format!("  [stale: {}]", error));
        }
        lines.push(DisplayLine {
            node: Some(table.id),
            target: LineTarget::Table(table.key),
            text: title,
        });

        for chain in table.visible_chains(tree.hide_empty()) {
            lines.push(DisplayLine {
                node: Some(chain.id),
                target: LineTarget::Chain {
                    key: table.key,
                    chain: chain.name.clone(),
                    referenced: !chain.references.is_empty(),
                },
                text: chain.title(),
            });

            if chain.is_empty() {
                lines.push(DisplayLine::plain(LineTarget::Placeholder, NO_RULES));
            } else {
                lines.push(DisplayLine::plain(LineTarget::Columns, column_header()));
                for row in &chain.rows {
                    lines.push(DisplayLine {
                        node: Some(row.id),
                        target: LineTarget::Rule {
                            key: table.key,
                            chain: chain.name.clone(),
                            index: row.rule.index,
                            jump: row.jump.then(|| row.rule.target.clone()),
                        },
                        text: rule_line(&row.rule),
                    });
                }
            }
        }

        lines.push(DisplayLine::plain(LineTarget::Blank, ""));
    }

    lines
}
