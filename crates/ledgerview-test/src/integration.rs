//! End-to-end scenarios
//!
//! Drives a real engine (driver task, feed pump, fetcher) against `MockLog`:
//! - Seeding and live delivery
//! - Optimistic submissions and their reconciliation
//! - Capacity eviction
//! - Reconnect gap-fill
//! - Stalled sync and host retry
//! - Convergence under hostile provider behaviour

use std::time::Duration;

use ledgerview_runtime::EngineHandle;
use ledgerview_state::ViewSnapshot;

/// Upper bound on virtual time a scenario may wait for a condition
pub const SCENARIO_TIMEOUT: Duration = Duration::from_secs(120);

/// Wait until a published snapshot satisfies `check`
pub async fn wait_for<F>(handle: &EngineHandle, check: F) -> Option<ViewSnapshot>
where
    F: Fn(&ViewSnapshot) -> bool,
{
    let mut changes = handle.changes();
    let waiting = async {
        loop {
            {
                let snapshot = changes.borrow_and_update();
                if check(&*snapshot) {
                    return Some(snapshot.clone());
                }
            }
            if changes.changed().await.is_err() {
                return None;
            }
        }
    };
    tokio::time::timeout(SCENARIO_TIMEOUT, waiting)
        .await
        .ok()
        .flatten()
}

/// Display order as labels: positions for confirmed entries, `o<seq>` for
/// speculative ones
pub fn labels(snapshot: &ViewSnapshot) -> Vec<String> {
    snapshot
        .entries()
        .iter()
        .map(|e| match (e.position(), e.origin()) {
            (Some(position), _) => position.to_string(),
            (None, Some(origin)) => format!("o{}", origin.seq),
            (None, None) => "?".to_string(),
        })
        .collect()
}

/// Confirmed positions form an unbroken descending run
pub fn is_contiguous(snapshot: &ViewSnapshot) -> bool {
    let positions: Vec<u64> = snapshot
        .entries()
        .iter()
        .filter_map(|e| e.position())
        .map(|p| p.value())
        .collect();
    positions.windows(2).all(|w| w[0] == w[1] + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use ledgerview_core::{AuthorId, EntryId, LedgerError, LogPosition, RejectReason};
    use ledgerview_live::SyncStatus;
    use ledgerview_runtime::{start, ChangeSubscription, EngineConfig, EngineNotice};
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::{ChaosConfig, MockLog, SubmitMode};

    fn launch(log: &Arc<MockLog>, config: EngineConfig) -> EngineHandle {
        start(config, Arc::clone(log)).unwrap()
    }

    async fn live_with(handle: &EngineHandle, len: usize) -> ViewSnapshot {
        wait_for(handle, |s| s.status == SyncStatus::Live && s.len() == len)
            .await
            .expect("engine seeded")
    }

    /// Every snapshot the engine publishes, in order
    fn record_snapshots(handle: &EngineHandle) -> (Arc<Mutex<Vec<ViewSnapshot>>>, ChangeSubscription) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        let subscription = handle.on_change(move |notice| {
            if let EngineNotice::Updated(snapshot) = notice {
                sink.lock().push(snapshot.clone());
            }
        });
        (frames, subscription)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_then_live() {
        let log = Arc::new(MockLog::with_history(&["0xa", "0xa", "0xa"]));
        let handle = launch(&log, EngineConfig::default());
        live_with(&handle, 3).await;

        log.append("0xa", "msg 4");
        let snapshot = wait_for(&handle, |s| s.len() == 4).await.unwrap();
        assert_eq!(labels(&snapshot), vec!["4", "3", "2", "1"]);
        handle.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimistic_submit_reconciles() {
        let log = Arc::new(MockLog::with_history(&["0xa"; 4]));
        let handle = launch(&log, EngineConfig::default());
        live_with(&handle, 4).await;
        let (frames, _subscription) = record_snapshots(&handle);

        let pending = handle.submit("0xA", "hi").await.unwrap();
        assert_eq!(labels(&handle.snapshot()), vec!["o1", "4", "3", "2", "1"]);

        assert_eq!(pending.confirmed().await, Ok(EntryId::new("e5")));
        let snapshot = wait_for(&handle, |s| s.pending == 0 && s.len() == 5)
            .await
            .unwrap();
        assert_eq!(labels(&snapshot), vec!["5", "4", "3", "2", "1"]);
        assert_eq!(handle.aggregate(&AuthorId::new("0xa")).unwrap().count, 5);

        // Never both the speculative and the confirmed copy at once
        for frame in frames.lock().iter() {
            let copies = frame.entries().iter().filter(|e| e.payload() == "hi").count();
            assert!(copies <= 1, "duplicate flash in {:?}", labels(frame));
        }
        handle.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_eviction_keeps_counts() {
        let log = Arc::new(MockLog::with_history(&["0xb", "0xc", "0xa"]));
        let handle = launch(&log, EngineConfig::default().with_capacity(3));
        live_with(&handle, 3).await;

        log.append("0xa", "msg 4");
        log.append("0xa", "msg 5");
        let snapshot = wait_for(&handle, |s| s.cursor == Some(LogPosition::new(5)))
            .await
            .unwrap();

        assert_eq!(labels(&snapshot), vec!["5", "4", "3"]);
        assert_eq!(snapshot.aggregate(&AuthorId::new("0xb")).unwrap().count, 1);
        assert_eq!(snapshot.aggregate(&AuthorId::new("0xc")).unwrap().count, 1);
        assert_eq!(snapshot.aggregate(&AuthorId::new("0xa")).unwrap().count, 3);
        handle.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gap_filled_before_release() {
        let log = Arc::new(MockLog::with_history(&["0xa"; 5]));
        let handle = launch(&log, EngineConfig::default());
        live_with(&handle, 5).await;
        let (frames, _subscription) = record_snapshots(&handle);

        log.drop_feeds();
        wait_for(&handle, |s| s.status == SyncStatus::Disconnected)
            .await
            .unwrap();
        log.append_unannounced("0xa", "msg 6");
        log.append_unannounced("0xa", "msg 7");

        while log.feed_count() == 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        log.append("0xa", "msg 8");

        let snapshot = wait_for(&handle, |s| s.status == SyncStatus::Live && s.len() == 8)
            .await
            .unwrap();
        assert_eq!(
            labels(&snapshot),
            vec!["8", "7", "6", "5", "4", "3", "2", "1"]
        );
        assert!(frames.lock().iter().all(is_contiguous));
        handle.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_rejection_surfaces() {
        let log = Arc::new(MockLog::with_history(&["0xa"]));
        log.set_submit_mode(SubmitMode::Reject("insufficient funds".into()));
        let handle = launch(&log, EngineConfig::default());
        live_with(&handle, 1).await;

        let faults = Arc::new(Mutex::new(Vec::new()));
        let sink = faults.clone();
        let _subscription = handle.on_change(move |notice| {
            if let EngineNotice::Fault(err) = notice {
                sink.lock().push(err.clone());
            }
        });

        let pending = handle.submit("0xa", "gm").await.unwrap();
        let origin = pending.origin().clone();
        let err = pending.confirmed().await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::SubmissionRejected {
                origin,
                reason: RejectReason::Provider("insufficient funds".into()),
            }
        );

        let snapshot = wait_for(&handle, |s| s.pending == 0).await.unwrap();
        assert_eq!(labels(&snapshot), vec!["1"]);
        assert_eq!(faults.lock().as_slice(), &[err]);
        handle.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_sync_resumes_on_retry() {
        let log = Arc::new(MockLog::new(
            ChaosConfig {
                fetch_failure_rate: 1.0,
                ..ChaosConfig::reliable()
            },
            1,
        ));
        for i in 1..=3 {
            log.append_unannounced("0xa", format!("msg {i}"));
        }
        let config = EngineConfig::default().with_fetch_retry(2, Duration::from_millis(10));
        let handle = launch(&log, config);

        wait_for(&handle, |s| s.status == SyncStatus::Stalled)
            .await
            .unwrap();
        assert!(handle.snapshot().is_empty());

        log.set_chaos(ChaosConfig::reliable());
        handle.retry_sync().await.unwrap();
        let snapshot = live_with(&handle, 3).await;
        assert_eq!(labels(&snapshot), vec!["3", "2", "1"]);
        handle.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_under_hostile_provider() {
        const FOREIGN: [&str; 3] = ["0xa", "0xb", "0xc"];
        let log = Arc::new(MockLog::new(ChaosConfig::hostile(), 2024));
        let mut rng = StdRng::seed_from_u64(7);
        for i in 0..20 {
            log.append_unannounced(FOREIGN[rng.gen_range(0..FOREIGN.len())], format!("seed {i}"));
        }

        let config = EngineConfig::default()
            .with_capacity(1000)
            .with_fetch_retry(3, Duration::from_millis(50));
        let handle = launch(&log, config);

        let mut submissions = Vec::new();
        for round in 0..150 {
            log.append(FOREIGN[rng.gen_range(0..FOREIGN.len())], format!("round {round}"));
            if round % 10 == 0 {
                submissions.push(handle.submit("0xme", format!("mine {round}")).await.unwrap());
            }
            if handle.status() == SyncStatus::Stalled {
                handle.retry_sync().await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        log.set_chaos(ChaosConfig::reliable());
        log.append("0xa", "final");

        let mut converged = None;
        for _ in 0..2000 {
            let snapshot = handle.snapshot();
            let head = log.head_position();
            if snapshot.status == SyncStatus::Live && snapshot.cursor == head && snapshot.pending == 0 {
                converged = Some(snapshot);
                break;
            }
            if snapshot.status == SyncStatus::Stalled {
                handle.retry_sync().await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let snapshot = converged.expect("engine converged");

        // Every confirmed position exactly once, no speculative leftovers
        let expected: Vec<String> = (1..=log.len()).rev().map(|p| p.to_string()).collect();
        assert_eq!(labels(&snapshot), expected);
        assert!(log.chaos_stats().total() > 0);

        let mut in_log: HashMap<AuthorId, u64> = HashMap::new();
        for entry in log.entries() {
            *in_log.entry(entry.author).or_default() += 1;
        }
        for author in FOREIGN {
            let author = AuthorId::new(author);
            let count = snapshot.aggregate(&author).map_or(0, |r| r.count);
            assert_eq!(count, in_log.get(&author).copied().unwrap_or(0), "{author}");
        }

        let logged: Vec<EntryId> = log.entries().into_iter().map(|e| e.entry_id).collect();
        for pending in submissions {
            let outcome = tokio::time::timeout(SCENARIO_TIMEOUT, pending.confirmed())
                .await
                .expect("submission resolved");
            match outcome {
                Ok(entry_id) => assert!(logged.contains(&entry_id)),
                Err(LedgerError::SubmissionRejected { .. }) => {}
                Err(other) => panic!("unexpected outcome {other}"),
            }
        }
        handle.teardown().await;
    }
}
