use crate::scheduler::PollEvent;
use crate::tree::{ReconcileReport, ViewTree};
use cv_core::TableKey;
use std::collections::HashMap;
use tracing::debug;

/// Tracks the newest generation applied per table
#[derive(Debug, Default)]
pub struct GenerationGate {
    applied: HashMap<TableKey, u64>,
}

impl GenerationGate {
    /// True if `generation` is newer than anything applied for `key`; records it
    pub fn admit(&mut self, key: TableKey, generation: u64) -> bool {
        let last = self.applied.entry(key).or_insert(0);
        if generation > *last {
            *last = generation;
            true
        } else {
            false
        }
    }

    pub fn applied(&self, key: TableKey) -> Option<u64> {
        self.applied.get(&key).copied()
    }
}

/// Single owner and writer of the view tree
#[derive(Debug, Default)]
pub struct LiveView {
    tree: ViewTree,
    gate: GenerationGate,
    failures: HashMap<TableKey, String>,
    finished: u64,
}

impl LiveView {
    pub fn new(tree: ViewTree) -> Self {
        Self {
            tree,
            ..Self::default()
        }
    }

    pub fn tree(&self) -> &ViewTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut ViewTree {
        &mut self.tree
    }

    /// Apply one poll event; returns the reconcile report when the tree changed hands
    pub fn handle(&mut self, event: PollEvent) -> Option<ReconcileReport> {
        match event {
            PollEvent::Table(update) => {
                let key = update.snapshot.key;
                if !self.gate.admit(key, update.generation) {
                    debug!(
                        "discarding generation {} for {} (applied {:?})",
                        update.generation,
                        key,
                        self.gate.applied(key)
                    );
                    return None;
                }

                self.failures.remove(&key);
                Some(self.tree.apply(&update.snapshot, &update.edges))
            }
            PollEvent::FetchFailed {
                generation,
                key,
                error,
            } => {
                debug!("generation {}: {} left stale: {}", generation, key, error);
                if self.gate.applied(key).is_none_or(|applied| generation > applied) {
                    self.failures.insert(key, error.to_string());
                }
                None
            }
            PollEvent::CycleFinished { generation } => {
                self.finished = self.finished.max(generation);
                None
            }
        }
    }

    /// Last fetch error for a table that has not recovered since
    pub fn failure(&self, key: TableKey) -> Option<&str> {
        self.failures.get(&key).map(String::as_str)
    }

    /// Highest generation whose cycle has completed
    pub fn finished_generation(&self) -> u64 {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::tests::filter_only_source;
    use crate::scheduler::{CycleUpdate, collect};
    use cv_core::{CommandError, Family, JumpEdges, TableName};
    use cv_ipt::parse_dump;

    fn filter() -> TableKey {
        TableKey::new(Family::V4, TableName::Filter)
    }

    fn update(generation: u64, text: &str) -> PollEvent {
        let snapshot = parse_dump(filter(), text);
        let edges = JumpEdges::resolve(&snapshot);
        PollEvent::Table(CycleUpdate {
            generation,
            snapshot,
            edges,
        })
    }

    #[test]
    fn gate_rejects_old_and_repeated_generations() {
        let mut gate = GenerationGate::default();
        assert!(gate.admit(filter(), 2));
        assert!(!gate.admit(filter(), 1));
        assert!(!gate.admit(filter(), 2));
        assert!(gate.admit(filter(), 3));
        assert!(gate.admit(TableKey::new(Family::V6, TableName::Filter), 1));
    }

    #[test]
    fn late_result_from_overlapping_cycle_is_discarded() {
        let mut live = LiveView::default();

        let newer = "Chain INPUT (policy DROP 0 packets, 0 bytes)\nChain zone_lan (0 references)\n";
        let older = "Chain INPUT (policy ACCEPT 0 packets, 0 bytes)\nChain zone_wan (0 references)\n";

        assert!(live.handle(update(5, newer)).is_some());
        assert!(live.handle(update(4, older)).is_none());

        let tree = live.tree();
        assert!(tree.chain(filter(), "zone_lan").is_some());
        assert!(tree.chain(filter(), "zone_wan").is_none());
    }

    #[test]
    fn fetch_failure_leaves_table_stale() {
        let mut live = LiveView::default();
        live.handle(update(1, "Chain INPUT (policy ACCEPT 0 packets, 0 bytes)\n"));

        live.handle(PollEvent::FetchFailed {
            generation: 2,
            key: filter(),
            error: CommandError::NotFound {
                program: "iptables".into(),
            },
        });

        assert!(live.tree().chain(filter(), "INPUT").is_some());
        assert_eq!(live.failure(filter()), Some("iptables not found"));

        live.handle(update(3, "Chain INPUT (policy ACCEPT 0 packets, 0 bytes)\n"));
        assert!(live.failure(filter()).is_none());
    }

    #[tokio::test]
    async fn collected_cycle_feeds_the_view() {
        let source = filter_only_source();
        let keys = TableKey::all(&[Family::V4], &[TableName::Filter, TableName::Raw]);
        let mut live = LiveView::default();

        for event in collect(&source, &keys, 1).await {
            live.handle(event);
        }
        live.handle(PollEvent::CycleFinished { generation: 1 });

        assert_eq!(live.tree().tables().len(), 1);
        assert!(live.failure(TableKey::new(Family::V4, TableName::Raw)).is_some());
        assert_eq!(live.finished_generation(), 1);
        assert_eq!(
            live.tree()
                .chain(filter(), "zone_wan")
                .map(|c| c.references.len()),
            Some(1)
        );
    }
}
