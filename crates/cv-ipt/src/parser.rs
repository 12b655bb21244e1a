//! Line-oriented parser for `iptables --line-numbers -nvxL` output.
//!
//! The dump is a sequence of chain headers, each followed by a column header
//! and zero or more numbered rule rows:
//!
//! ```text
//! Chain INPUT (policy ACCEPT 10 packets, 500 bytes)
//! num   pkts bytes target prot opt in out source    destination
//! 1        2   100 ACCEPT tcp  --  *  *  0.0.0.0/0 0.0.0.0/0 /* !fw3: allow-ssh */
//! Chain foo (1 references)
//! ```
//!
//! Lines that match none of the known shapes are skipped without error.

use cv_core::{Chain, NO_VALUE, Rule, TableKey, TableSnapshot};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static POLICY_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Chain (.+) \(policy (\w+) (\d+) packets, (\d+) bytes\)$")
        .expect("policy header pattern is valid")
});

static REFERENCE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Chain (.+) \((\d+) references\)$").expect("reference header pattern is valid")
});

static RULE_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        // prot never starts with '-' and opt is blank or a flag pair ("--", "-f", "!f"),
        // so an absent target cannot swallow the protocol column
        r"^(\d+) +(\d+) +(\d+) +(\S*) +([^\s-]\S*) +((?:[!-][-f])?) +(\S+) +(\S+)",
        r" +(!?[a-f0-9:.]+(?:/[a-f0-9:.]+)?) +(!?[a-f0-9:.]+(?:/[a-f0-9:.]+)?)",
        r"(?: +(.*))?$",
    ))
    .expect("rule row pattern is valid")
});

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^| )/\* (.+) \*/").expect("comment pattern is valid"));

static COMMENT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^![\w-]+(?::\s*|$)").expect("comment tag pattern is valid"));

/// Classification of a single dump line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpLine {
    ChainHeader(Chain),
    ColumnHeader,
    Rule(Rule),
    Unrecognized,
}

pub fn classify(line: &str) -> DumpLine {
    if let Some(caps) = POLICY_HEADER.captures(line) {
        return match (caps[3].parse(), caps[4].parse()) {
            (Ok(packets), Ok(bytes)) => {
                DumpLine::ChainHeader(Chain::policy(&caps[1], &caps[2], packets, bytes))
            }
            _ => DumpLine::Unrecognized,
        };
    }

    if let Some(caps) = REFERENCE_HEADER.captures(line) {
        return match caps[2].parse() {
            Ok(references) => DumpLine::ChainHeader(Chain::referenced(&caps[1], references)),
            Err(_) => DumpLine::Unrecognized,
        };
    }

    if line.starts_with("num ") {
        return DumpLine::ColumnHeader;
    }

    match RULE_ROW.captures(line).and_then(|caps| rule_from_captures(&caps)) {
        Some(rule) => DumpLine::Rule(rule),
        None => DumpLine::Unrecognized,
    }
}

fn rule_from_captures(caps: &Captures<'_>) -> Option<Rule> {
    let index = caps[1].parse().ok()?;
    let packets = caps[2].parse().ok()?;
    let bytes = caps[3].parse().ok()?;
    let extra = caps.get(11).map(|m| m.as_str()).unwrap_or("");
    let (options, comment) = split_comment(extra);

    Some(Rule {
        index,
        packets,
        bytes,
        target: or_placeholder(caps[4].trim()),
        protocol: caps[5].to_string(),
        in_interface: caps[7].to_string(),
        out_interface: caps[8].to_string(),
        source: caps[9].to_string(),
        destination: caps[10].to_string(),
        options,
        comment,
    })
}

/// Pull a `/* ... */` marker out of the options column.
/// Returns `(options, comment)`, each defaulting to the placeholder.
pub fn split_comment(extra: &str) -> (String, String) {
    let extra = extra.trim();

    let Some(caps) = COMMENT.captures(extra) else {
        return (or_placeholder(extra), NO_VALUE.to_string());
    };

    let comment = COMMENT_TAG.replace(&caps[1], "");
    let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
    let options = format!("{}{}", &extra[..whole.start], &extra[whole.end..]);

    (or_placeholder(options.trim()), or_placeholder(comment.trim()))
}

fn or_placeholder(value: &str) -> String {
    if value.is_empty() {
        NO_VALUE.to_string()
    } else {
        value.to_string()
    }
}

/// Incremental parser state for one (family, table) dump
pub struct DumpParser {
    key: TableKey,
    chains: Vec<Chain>,
    seen: HashMap<String, usize>,
    current: Option<Chain>,
    skipped: usize,
}

impl DumpParser {
    pub fn new(key: TableKey) -> Self {
        Self {
            key,
            chains: vec![],
            seen: HashMap::new(),
            current: None,
            skipped: 0,
        }
    }

    pub fn feed_line(&mut self, line: &str) {
        match classify(line) {
            DumpLine::ChainHeader(chain) => {
                self.flush();
                self.current = Some(chain);
            }
            DumpLine::ColumnHeader => {}
            DumpLine::Rule(rule) => match self.current.as_mut() {
                Some(chain) => chain.rules.push(rule),
                None => self.skipped += 1,
            },
            DumpLine::Unrecognized => {
                if !line.trim().is_empty() {
                    self.skipped += 1;
                }
            }
        }
    }

    /// Non-blank lines that matched no known shape
    pub fn skipped_lines(&self) -> usize {
        self.skipped
    }

    pub fn finish(mut self) -> TableSnapshot {
        self.flush();
        TableSnapshot {
            key: self.key,
            chains: self.chains,
        }
    }

    fn flush(&mut self) {
        let Some(chain) = self.current.take() else {
            return;
        };

        // A repeated header replaces the earlier record in place
        match self.seen.get(&chain.name) {
            Some(&position) => self.chains[position] = chain,
            None => {
                self.seen.insert(chain.name.clone(), self.chains.len());
                self.chains.push(chain);
            }
        }
    }
}

pub fn parse_dump(key: TableKey, text: &str) -> TableSnapshot {
    let mut parser = DumpParser::new(key);
    for line in text.lines() {
        parser.feed_line(line);
    }
    parser.finish()
}
