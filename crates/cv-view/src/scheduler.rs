use cv_core::{CommandError, JumpEdges, TableKey, TableName, TableSnapshot};
use cv_ipt::{DumpSource, fetch_all, parse_dump};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Parsed and resolved result for one table in one cycle
#[derive(Debug, Clone)]
pub struct CycleUpdate {
    pub generation: u64,
    pub snapshot: TableSnapshot,
    pub edges: JumpEdges,
}

#[derive(Debug)]
pub enum PollEvent {
    Table(CycleUpdate),
    FetchFailed {
        generation: u64,
        key: TableKey,
        error: CommandError,
    },
    CycleFinished {
        generation: u64,
    },
}

/// Drives fetch -> parse -> resolve for every enabled table at a fixed interval
pub struct Poller<S> {
    source: Arc<S>,
    keys: Vec<TableKey>,
    interval: Duration,
}

impl<S: DumpSource> Poller<S> {
    pub fn new(source: Arc<S>, tables: &[TableName], interval: Duration) -> Self {
        let keys = TableKey::all(&source.families(), tables);
        Self {
            source,
            keys,
            interval,
        }
    }

    pub fn keys(&self) -> &[TableKey] {
        &self.keys
    }

    /// Start ticking. Each tick opens a new generation and spawns its cycle
    /// without waiting for the previous one, so slow cycles may overlap; the
    /// receiving side discards out-of-order results by generation.
    pub fn spawn(self, tx: mpsc::Sender<PollEvent>) -> PollerHandle {
        let generation = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&generation);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    debug!("poll receiver closed, stopping poller");
                    break;
                }

                let generation = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let source = Arc::clone(&self.source);
                let keys = self.keys.clone();
                let tx = tx.clone();

                tokio::spawn(async move {
                    run_cycle(source.as_ref(), &keys, generation, &tx).await;
                });
            }
        });

        PollerHandle { task, generation }
    }
}

/// Aborts the ticker when dropped
pub struct PollerHandle {
    task: JoinHandle<()>,
    generation: Arc<AtomicU64>,
}

impl PollerHandle {
    /// Most recently started generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One cycle: fetch everything concurrently, join, then parse and emit per table
pub async fn run_cycle<S: DumpSource>(
    source: &S,
    keys: &[TableKey],
    generation: u64,
    tx: &mpsc::Sender<PollEvent>,
) {
    for event in collect(source, keys, generation).await {
        if tx.send(event).await.is_err() {
            return;
        }
    }

    let _ = tx.send(PollEvent::CycleFinished { generation }).await;
}

/// Fetch, parse and resolve every key once, without a channel
pub async fn collect<S: DumpSource>(source: &S, keys: &[TableKey], generation: u64) -> Vec<PollEvent> {
    fetch_all(source, keys)
        .await
        .into_iter()
        .map(|(key, result)| match result {
            Ok(text) => {
                let snapshot = parse_dump(key, &text);
                let edges = JumpEdges::resolve(&snapshot);
                PollEvent::Table(CycleUpdate {
                    generation,
                    snapshot,
                    edges,
                })
            }
            Err(error) => PollEvent::FetchFailed {
                generation,
                key,
                error,
            },
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use cv_core::Family;
    use std::collections::HashMap;
    use std::future::Future;

    /// Serves canned dumps; keys without a fixture fail like a missing binary
    pub(crate) struct FixtureSource {
        pub dumps: HashMap<TableKey, String>,
        pub families: Vec<Family>,
    }

    impl DumpSource for FixtureSource {
        fn fetch(&self, key: TableKey) -> impl Future<Output = Result<String, CommandError>> + Send {
            let result = self
                .dumps
                .get(&key)
                .cloned()
                .ok_or_else(|| CommandError::Exit {
                    program: key.family.tool().to_string(),
                    code: Some(3),
                    stderr: format!("can't initialize {} table", key.table.as_arg()),
                });
            async move { result }
        }

        fn families(&self) -> Vec<Family> {
            self.families.clone()
        }
    }

    pub(crate) fn filter_only_source() -> FixtureSource {
        let mut dumps = HashMap::new();
        dumps.insert(
            TableKey::new(Family::V4, TableName::Filter),
            "Chain INPUT (policy ACCEPT 0 packets, 0 bytes)\n\
             num pkts bytes target prot opt in out source destination\n\
             1 0 0 zone_wan all -- * * 0.0.0.0/0 0.0.0.0/0\n\
             Chain zone_wan (1 references)\n"
                .to_string(),
        );
        FixtureSource {
            dumps,
            families: vec![Family::V4],
        }
    }

    #[tokio::test]
    async fn failures_do_not_block_sibling_tables() {
        let source = filter_only_source();
        let keys = TableKey::all(&[Family::V4], &[TableName::Filter, TableName::Nat]);

        let events = collect(&source, &keys, 7).await;

        assert_eq!(events.len(), 2);
        match &events[0] {
            PollEvent::Table(update) => {
                assert_eq!(update.generation, 7);
                assert_eq!(update.snapshot.chains.len(), 2);
                assert_eq!(update.edges.references_to("zone_wan").len(), 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            &events[1],
            PollEvent::FetchFailed { key, .. } if key.table == TableName::Nat
        ));
    }

    #[tokio::test]
    async fn cycle_ends_with_finished_marker() {
        let source = filter_only_source();
        let keys = vec![TableKey::new(Family::V4, TableName::Filter)];
        let (tx, mut rx) = mpsc::channel(8);

        run_cycle(&source, &keys, 1, &tx).await;
        drop(tx);

        assert!(matches!(rx.recv().await, Some(PollEvent::Table(_))));
        assert!(matches!(
            rx.recv().await,
            Some(PollEvent::CycleFinished { generation: 1 })
        ));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn poller_ticks_with_increasing_generations() {
        let source = Arc::new(filter_only_source());
        let poller = Poller::new(source, &TableName::ALL, Duration::from_secs(5));
        assert_eq!(poller.keys().len(), 4);

        let (tx, mut rx) = mpsc::channel(64);
        let handle = poller.spawn(tx);

        let mut finished = vec![];
        while finished.len() < 2 {
            match rx.recv().await {
                Some(PollEvent::CycleFinished { generation }) => finished.push(generation),
                Some(_) => {}
                None => break,
            }
        }

        assert_eq!(finished, vec![1, 2]);
        assert!(handle.generation() >= 2);
    }
}
