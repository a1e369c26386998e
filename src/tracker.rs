//! Chain tracker: head discovery, streaming reconciliation, and fan-out to
//! block consumers.
//!
//! Built around a streaming+reconcile design rather than a poll-only loop: a
//! single long-lived task discovers
//! the head once, then consumes `monitor_block_header()` and reconciles every
//! notification against the retained canonical chain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::health::HealthState;
use crate::metrics::RECONCILE_OUTCOME_COUNTER;
use crate::retrier::{self, RetryPolicy};
use crate::rpc::types::{BlockSelector, MinimalBlock};
use crate::rpc::TezosRpc;

/// Event delivered to a registered block consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHashEvent {
    pub gap_potential: bool,
    pub block_hashes: Vec<String>,
}

struct Consumer {
    sender: mpsc::Sender<BlockHashEvent>,
    cancellation: CancellationToken,
}

struct TrackerState {
    highest_block: i64,
    canonical_chain: Vec<MinimalBlock>,
    consumers: HashMap<Uuid, Consumer>,
    pending_gap: bool,
    initialized: bool,
    reconnect_failures: u32,
}

pub struct ChainTracker<R: TezosRpc> {
    rpc: Arc<R>,
    retry_policy: RetryPolicy,
    unstable_head_length: usize,
    state: Mutex<TrackerState>,
    initialized_notify: Notify,
    health: HealthState,
    cancellation: CancellationToken,
}

enum ReconcileOutcome {
    Duplicate,
    Replace(Vec<MinimalBlock>),
    Append(Vec<MinimalBlock>),
    NeedsRebuild,
}

fn trim_front(chain: &mut Vec<MinimalBlock>, max_len: usize) {
    while chain.len() > max_len {
        chain.remove(0);
    }
}

fn reconcile_sync(chain: &mut Vec<MinimalBlock>, new_block: &MinimalBlock) -> ReconcileOutcome {
    match chain.last().cloned() {
        None => {
            chain.push(new_block.clone());
            ReconcileOutcome::Append(vec![new_block.clone()])
        },
        Some(tail) if new_block.height > tail.height => {
            if tail.hash == new_block.parent {
                chain.push(new_block.clone());
                ReconcileOutcome::Append(vec![new_block.clone()])
            } else {
                ReconcileOutcome::NeedsRebuild
            }
        },
        Some(_) => match chain.iter().rposition(|b| b.height == new_block.height) {
            Some(idx) if chain[idx].hash == new_block.hash => ReconcileOutcome::Duplicate,
            Some(idx) => {
                let parent_ok = idx == 0 || chain[idx - 1].hash == new_block.parent;
                if parent_ok {
                    chain.truncate(idx);
                    chain.push(new_block.clone());
                    ReconcileOutcome::Replace(vec![new_block.clone()])
                } else {
                    ReconcileOutcome::NeedsRebuild
                }
            },
            None => ReconcileOutcome::NeedsRebuild,
        },
    }
}

impl<R: TezosRpc + 'static> ChainTracker<R> {
    pub fn new(
        rpc: Arc<R>,
        retry_policy: RetryPolicy,
        unstable_head_length: usize,
        health: HealthState,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            rpc,
            retry_policy,
            unstable_head_length,
            state: Mutex::new(TrackerState {
                highest_block: 0,
                canonical_chain: Vec::new(),
                consumers: HashMap::new(),
                pending_gap: false,
                initialized: false,
                reconnect_failures: 0,
            }),
            initialized_notify: Notify::new(),
            health,
            cancellation,
        }
    }

    pub fn highest_block(&self) -> i64 {
        self.state.lock().unwrap().highest_block
    }

    pub async fn wait_until_initialized(&self) {
        loop {
            let notified = self.initialized_notify.notified();
            if self.state.lock().unwrap().initialized {
                return;
            }
            notified.await;
        }
    }

    pub fn add_consumer(&self, id: Uuid, sender: mpsc::Sender<BlockHashEvent>, cancellation: CancellationToken) {
        self.state.lock().unwrap().consumers.insert(id, Consumer { sender, cancellation });
    }

    /// Runs the tracker's lifecycle to completion: initial height discovery,
    /// then the steady-state reconcile loop. Intended to be spawned as exactly
    /// one long-lived task.
    pub async fn run(self: Arc<Self>) {
        self.discover_initial_height().await;
        self.steady_state_loop().await;
    }

    async fn discover_initial_height(&self) {
        let result = retrier::retry(&self.retry_policy, &self.cancellation, "get_head_block", |_attempt| {
            let rpc = self.rpc.clone();
            async move { rpc.get_head_block().await }
        })
        .await;

        let Ok(head) = result else {
            // Only returns Err on cancellation - nothing more to do.
            return;
        };

        let mut state = self.state.lock().unwrap();
        state.highest_block = head.height;
        state.canonical_chain =
            vec![MinimalBlock { height: head.height, hash: head.hash, parent: head.parent }];
        state.initialized = true;
        drop(state);
        self.initialized_notify.notify_waiters();
        self.health.set_ready(true);
    }

    async fn steady_state_loop(self: Arc<Self>) {
        let mut stream: Option<BoxStream<'static, anyhow::Result<MinimalBlock>>> = None;

        loop {
            if self.cancellation.is_cancelled() {
                return;
            }

            if stream.is_none() {
                match self.rpc.monitor_block_header().await {
                    Ok(s) => {
                        stream = Some(s);
                        self.state.lock().unwrap().reconnect_failures = 0;
                    },
                    Err(e) => {
                        let message = e.to_string();
                        if message.contains("status 404") {
                            tracing::warn!("event mode unsupported by node, header monitor disabled");
                            self.cancellation.cancelled().await;
                            return;
                        }
                        let attempt = {
                            let mut state = self.state.lock().unwrap();
                            state.pending_gap = true;
                            state.reconnect_failures = state.reconnect_failures.saturating_add(1);
                            state.reconnect_failures
                        };
                        let delay = self.retry_policy.failure_delay(attempt);
                        tracing::error!(
                            "monitor_block_header failed (attempt {attempt}): {e}, retrying in {}ms",
                            delay.as_millis()
                        );
                        tokio::select! {
                            biased;
                            _ = self.cancellation.cancelled() => return,
                            _ = tokio::time::sleep(delay) => {},
                        }
                        continue;
                    },
                }
            }

            let next = {
                let s = stream.as_mut().unwrap();
                tokio::select! {
                    biased;
                    _ = self.cancellation.cancelled() => return,
                    next = s.next() => next,
                }
            };

            match next {
                Some(Ok(header)) => {
                    if let Some(event) = self.reconcile(header).await {
                        self.fan_out(event).await;
                    }
                },
                Some(Err(e)) => {
                    tracing::error!("header monitor stream error: {e}");
                    self.state.lock().unwrap().pending_gap = true;
                    stream = None;
                },
                None => {
                    tracing::warn!("header monitor stream ended");
                    self.state.lock().unwrap().pending_gap = true;
                    stream = None;
                },
            }
        }
    }

    async fn reconcile(&self, new_block: MinimalBlock) -> Option<BlockHashEvent> {
        let outcome = {
            let mut state = self.state.lock().unwrap();
            let outcome = reconcile_sync(&mut state.canonical_chain, &new_block);
            if matches!(outcome, ReconcileOutcome::Append(_) | ReconcileOutcome::Replace(_)) {
                trim_front(&mut state.canonical_chain, self.unstable_head_length);
                state.highest_block =
                    state.canonical_chain.last().map(|b| b.height).unwrap_or(state.highest_block);
            }
            outcome
        };

        let added = match outcome {
            ReconcileOutcome::Duplicate => {
                RECONCILE_OUTCOME_COUNTER.with_label_values(&["duplicate"]).inc();
                return None;
            },
            ReconcileOutcome::Replace(added) => {
                RECONCILE_OUTCOME_COUNTER.with_label_values(&["replace"]).inc();
                added
            },
            ReconcileOutcome::Append(added) => {
                RECONCILE_OUTCOME_COUNTER.with_label_values(&["append"]).inc();
                added
            },
            ReconcileOutcome::NeedsRebuild => {
                RECONCILE_OUTCOME_COUNTER.with_label_values(&["rebuild"]).inc();
                return self.rebuild().await;
            },
        };

        Some(self.make_event(added))
    }

    /// Finds the newest retained element that still matches the node's view,
    /// then fetches forward by height until the predecessor chain diverges
    /// (stop and wait for the next notification) or the node reports
    /// `NotFound` (the head has been reached).
    async fn rebuild(&self) -> Option<BlockHashEvent> {
        let chain = self.state.lock().unwrap().canonical_chain.clone();

        let mut valid_upto = None;
        for idx in (0..chain.len()).rev() {
            match self.rpc.get_block(BlockSelector::Height(chain[idx].height)).await {
                Ok(block) if block.hash == chain[idx].hash => {
                    valid_upto = Some(idx);
                    break;
                },
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!(
                        "rebuild: failed to confirm block at height {}: {e}",
                        chain[idx].height
                    );
                    return None;
                },
            }
        }

        let mut new_chain: Vec<MinimalBlock> = match valid_upto {
            Some(idx) => chain[..=idx].to_vec(),
            None => Vec::new(),
        };

        let mut fetch_height = new_chain.last().map(|b| b.height + 1).unwrap_or(chain.first()?.height);
        let mut added = Vec::new();
        loop {
            match self.rpc.get_block(BlockSelector::Height(fetch_height)).await {
                Ok(block) => {
                    if let Some(last) = new_chain.last() {
                        if last.hash != block.parent {
                            break;
                        }
                    }
                    let minimal =
                        MinimalBlock { height: block.height, hash: block.hash, parent: block.parent };
                    new_chain.push(minimal.clone());
                    added.push(minimal);
                    fetch_height += 1;
                },
                Err(e) => {
                    if !e.to_string().contains("status 404") {
                        tracing::error!("rebuild: failed fetching block at height {fetch_height}: {e}");
                    }
                    break;
                },
            }
        }

        if added.is_empty() {
            return None;
        }

        let mut state = self.state.lock().unwrap();
        state.canonical_chain = new_chain;
        trim_front(&mut state.canonical_chain, self.unstable_head_length);
        state.highest_block = state.canonical_chain.last().map(|b| b.height).unwrap_or(state.highest_block);
        drop(state);

        Some(self.make_event(added))
    }

    fn make_event(&self, added: Vec<MinimalBlock>) -> BlockHashEvent {
        let gap_potential = {
            let mut state = self.state.lock().unwrap();
            std::mem::replace(&mut state.pending_gap, false)
        };
        BlockHashEvent { gap_potential, block_hashes: added.into_iter().map(|b| b.hash).collect() }
    }

    async fn fan_out(&self, event: BlockHashEvent) {
        let snapshot: Vec<(Uuid, mpsc::Sender<BlockHashEvent>, CancellationToken)> = {
            let state = self.state.lock().unwrap();
            state.consumers.iter().map(|(id, c)| (*id, c.sender.clone(), c.cancellation.clone())).collect()
        };

        let mut dead = Vec::new();
        for (id, sender, cancellation) in snapshot {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => dead.push(id),
                result = sender.send(event.clone()) => {
                    if result.is_err() {
                        dead.push(id);
                    }
                },
            }
        }

        if !dead.is_empty() {
            let mut state = self.state.lock().unwrap();
            for id in dead {
                state.consumers.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mocks::MockTezosRpc;
    use crate::rpc::types::BlockInfo;
    use std::time::Duration;

    fn block_info(height: i64, hash: &str, parent: &str) -> BlockInfo {
        BlockInfo {
            height,
            hash: hash.to_string(),
            parent: parent.to_string(),
            timestamp: None,
            transaction_hashes: vec![],
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            factor: 2.0,
        }
    }

    #[test]
    fn duplicate_notification_produces_no_event() {
        let mut chain = vec![MinimalBlock { height: 12345, hash: "H1".into(), parent: "P1".into() }];
        let outcome =
            reconcile_sync(&mut chain, &MinimalBlock { height: 12345, hash: "H1".into(), parent: "P1".into() });
        assert!(matches!(outcome, ReconcileOutcome::Duplicate));
    }

    #[test]
    fn reorg_at_head_replaces_tail() {
        let mut chain = vec![
            MinimalBlock { height: 12344, hash: "H_a".into(), parent: "P_a".into() },
            MinimalBlock { height: 12345, hash: "H_b".into(), parent: "H_a".into() },
        ];
        let outcome =
            reconcile_sync(&mut chain, &MinimalBlock { height: 12345, hash: "H_c".into(), parent: "H_a".into() });
        match outcome {
            ReconcileOutcome::Replace(added) => assert_eq!(added[0].hash, "H_c"),
            _ => panic!("expected replace"),
        }
        assert_eq!(chain.last().unwrap().hash, "H_c");
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn deep_reorg_requires_rebuild() {
        let mut chain = vec![
            MinimalBlock { height: 100, hash: "A".into(), parent: "A0".into() },
            MinimalBlock { height: 101, hash: "B".into(), parent: "A".into() },
            MinimalBlock { height: 102, hash: "C".into(), parent: "B".into() },
        ];
        let outcome =
            reconcile_sync(&mut chain, &MinimalBlock { height: 102, hash: "C2".into(), parent: "X".into() });
        assert!(matches!(outcome, ReconcileOutcome::NeedsRebuild));
    }

    #[tokio::test]
    async fn rebuild_emits_every_newly_added_block_from_change_point() {
        let mut rpc = MockTezosRpc::new();
        rpc.expect_get_block()
            .withf(|s| matches!(s, BlockSelector::Height(102)))
            .returning(|_| Ok(block_info(102, "C2", "B2")));
        rpc.expect_get_block()
            .withf(|s| matches!(s, BlockSelector::Height(101)))
            .returning(|_| Ok(block_info(101, "B2", "A")));
        rpc.expect_get_block()
            .withf(|s| matches!(s, BlockSelector::Height(100)))
            .returning(|_| Ok(block_info(100, "A", "A0")));
        rpc.expect_get_block()
            .withf(|s| matches!(s, BlockSelector::Height(103)))
            .returning(|_| Err(anyhow::anyhow!("rpc error: status 404 not found")));

        let tracker = ChainTracker::new(
            Arc::new(rpc),
            policy(),
            50,
            HealthState::new(),
            CancellationToken::new(),
        );
        {
            let mut state = tracker.state.lock().unwrap();
            state.canonical_chain = vec![
                MinimalBlock { height: 100, hash: "A".into(), parent: "A0".into() },
                MinimalBlock { height: 101, hash: "B".into(), parent: "A".into() },
                MinimalBlock { height: 102, hash: "C".into(), parent: "B".into() },
            ];
        }

        let event = tracker.rebuild().await.unwrap();
        assert_eq!(event.block_hashes, vec!["B2".to_string(), "C2".to_string()]);
    }

    #[tokio::test]
    async fn steady_state_loop_backs_off_with_growing_delay_across_reconnect_failures() {
        use mockall::Sequence;
        use std::sync::atomic::{AtomicU32, Ordering};

        let call_count = Arc::new(AtomicU32::new(0));
        let mut rpc = MockTezosRpc::new();
        let mut seq = Sequence::new();

        let c1 = call_count.clone();
        rpc.expect_monitor_block_header().times(1).in_sequence(&mut seq).returning(move || {
            c1.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("rpc error: status 500 internal error"))
        });

        let c2 = call_count.clone();
        rpc.expect_monitor_block_header().times(1).in_sequence(&mut seq).returning(move || {
            c2.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("rpc error: status 500 internal error"))
        });

        let c3 = call_count.clone();
        rpc.expect_monitor_block_header().returning(move || {
            c3.fetch_add(1, Ordering::SeqCst);
            Ok(futures::stream::pending::<anyhow::Result<MinimalBlock>>().boxed())
        });

        // initial_delay=20ms, factor=8.0: the first failure backs off 20ms, the
        // second 160ms. A hardcoded attempt=1 backoff would retry at a constant
        // 20ms instead, reaching the third (successful) attempt well before
        // 80ms elapses.
        let policy =
            RetryPolicy { initial_delay: Duration::from_millis(20), max_delay: Duration::from_secs(5), factor: 8.0 };
        let tracker = Arc::new(ChainTracker::new(
            Arc::new(rpc),
            policy,
            50,
            HealthState::new(),
            CancellationToken::new(),
        ));

        let handle = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.steady_state_loop().await }
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(call_count.load(Ordering::SeqCst), 2);

        tracker.cancellation.cancel();
        let _ = handle.await;
    }
}
