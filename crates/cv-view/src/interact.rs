use crate::tree::{NodeId, ViewTree};
use cv_core::{CommandError, Family, JumpRef, TableKey};
use std::time::{Duration, Instant};

const NOTICE_TTL: Duration = Duration::from_secs(6);

/// Everything the user can ask of the view, as plain values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCommand {
    /// Follow a rule target to the chain it names
    JumpToChain { key: TableKey, chain: String },
    /// List the rules that jump into a chain
    ShowReferences { key: TableKey, chain: String },
    /// Go to one originating rule from a reference list
    JumpToRule {
        key: TableKey,
        chain: String,
        rule: u32,
    },
    ToggleHideEmpty,
    ResetCounters,
    RestartFirewall,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Focus {
    pub key: TableKey,
    pub chain: String,
    pub rule: Option<u32>,
    pub node: NodeId,
}

/// What the caller has to do after a dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Nothing,
    Focus(Focus),
    References {
        key: TableKey,
        chain: String,
        refs: Vec<JumpRef>,
    },
    HideEmpty(bool),
    ResetCounters,
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NoticeLevel,
    pub message: String,
    pub expires: Instant,
}

/// Result of one of the external mutating actions
#[derive(Debug)]
pub enum ActionOutcome {
    CountersReset(Vec<(Family, Result<(), CommandError>)>),
    Restarted(Result<(), CommandError>),
}

/// Navigation state plus transient highlight and notifications
#[derive(Debug)]
pub struct Interaction {
    highlight: Option<(NodeId, Instant)>,
    notifications: Vec<Notification>,
    flash: Duration,
}

impl Interaction {
    pub fn new(flash: Duration) -> Self {
        Self {
            highlight: None,
            notifications: vec![],
            flash,
        }
    }

    pub fn dispatch(&mut self, tree: &mut ViewTree, command: ViewCommand) -> Effect {
        self.dispatch_at(tree, command, Instant::now())
    }

    pub fn dispatch_at(&mut self, tree: &mut ViewTree, command: ViewCommand, now: Instant) -> Effect {
        match command {
            ViewCommand::JumpToChain { key, chain } => match tree.chain(key, &chain) {
                Some(node) => {
                    let node = node.id;
                    self.flash_node(node, now);
                    Effect::Focus(Focus {
                        key,
                        chain,
                        rule: None,
                        node,
                    })
                }
                None => Effect::Nothing,
            },
            ViewCommand::ShowReferences { key, chain } => match tree.chain(key, &chain) {
                Some(node) if !node.references.is_empty() => Effect::References {
                    refs: node.references.clone(),
                    key,
                    chain,
                },
                _ => Effect::Nothing,
            },
            ViewCommand::JumpToRule { key, chain, rule } => {
                let Some(node) = tree.chain(key, &chain) else {
                    return Effect::Nothing;
                };
                // Chain still there but the rule moved away: land on the header
                let (target, rule) = match node.row(rule) {
                    Some(row) => (row.id, Some(rule)),
                    None => (node.id, None),
                };
                self.flash_node(target, now);
                Effect::Focus(Focus {
                    key,
                    chain,
                    rule,
                    node: target,
                })
            }
            ViewCommand::ToggleHideEmpty => Effect::HideEmpty(tree.toggle_hide_empty()),
            ViewCommand::ResetCounters => Effect::ResetCounters,
            ViewCommand::RestartFirewall => Effect::Restart,
        }
    }

    pub fn record_action(&mut self, outcome: ActionOutcome) {
        self.record_action_at(outcome, Instant::now());
    }

    /// Turn failed actions into transient error notices
    pub fn record_action_at(&mut self, outcome: ActionOutcome, now: Instant) {
        match outcome {
            ActionOutcome::CountersReset(results) => {
                for (family, result) in results {
                    if let Err(e) = result {
                        self.notify_at(
                            NoticeLevel::Error,
                            format!("Unable to reset {} counters: {}", family.tool(), e),
                            now,
                        );
                    }
                }
            }
            ActionOutcome::Restarted(Err(e)) => {
                self.notify_at(
                    NoticeLevel::Error,
                    format!("Unable to restart firewall: {}", e),
                    now,
                );
            }
            ActionOutcome::Restarted(Ok(())) => {}
        }
    }

    pub fn notify_at(&mut self, level: NoticeLevel, message: impl Into<String>, now: Instant) {
        self.notifications.push(Notification {
            level,
            message: message.into(),
            expires: now + NOTICE_TTL,
        });
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn is_highlighted(&self, node: NodeId, now: Instant) -> bool {
        matches!(self.highlight, Some((id, until)) if id == node && now < until)
    }

    /// Drop expired highlight and notices
    pub fn expire(&mut self, now: Instant) {
        if matches!(self.highlight, Some((_, until)) if now >= until) {
            self.highlight = None;
        }
        self.notifications.retain(|n| now < n.expires);
    }

    fn flash_node(&mut self, node: NodeId, now: Instant) {
        self.highlight = Some((node, now + self.flash));
    }
}
