//! Property tests for pool state, queue fairness and job conservation.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;

use bench_dispatch::dispatch::{Coordinator, LogResultSink, Transport};
use bench_dispatch::protocol::{JobResult, WorkerJob};
use bench_dispatch::scheduler::JobQueue;
use bench_dispatch::worker::{SystemEnvironment, WorkerPool, WorkerState};

const WORKERS: u8 = 4;

fn address(i: u8) -> String {
    format!("w{}", i % WORKERS)
}

#[derive(Debug, Clone)]
enum PoolOp {
    Register(u8),
    Unregister(u8),
    Occupy(u8),
    Free(u8),
    GetFree,
}

fn arb_pool_op() -> impl Strategy<Value = PoolOp> {
    prop_oneof![
        any::<u8>().prop_map(PoolOp::Register),
        any::<u8>().prop_map(PoolOp::Unregister),
        any::<u8>().prop_map(PoolOp::Occupy),
        any::<u8>().prop_map(PoolOp::Free),
        Just(PoolOp::GetFree),
    ]
}

#[derive(Debug, Clone)]
enum CoordOp {
    Register(u8),
    Unregister(u8),
    AddJob(u8, u8),
    Dispatch,
    Result(u8, bool),
    Lost(u8),
    Prioritize(u8, u8),
}

fn arb_coord_op() -> impl Strategy<Value = CoordOp> {
    prop_oneof![
        any::<u8>().prop_map(CoordOp::Register),
        any::<u8>().prop_map(CoordOp::Unregister),
        (0u8..3, 0u8..4).prop_map(|(g, j)| CoordOp::AddJob(g, j)),
        Just(CoordOp::Dispatch),
        Just(CoordOp::Dispatch),
        (any::<u8>(), any::<bool>()).prop_map(|(w, ok)| CoordOp::Result(w, ok)),
        any::<u8>().prop_map(CoordOp::Lost),
        (0u8..3, 0u8..4).prop_map(|(g, j)| CoordOp::Prioritize(g, j)),
    ]
}

/// Refuses every job sent to an address in `refusing`.
struct FlakyTransport {
    refusing: HashSet<String>,
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn send(&self, job: &WorkerJob) -> bool {
        !self.refusing.contains(job.address())
    }
}

fn check_pool(pool: &WorkerPool) -> Result<(), TestCaseError> {
    let free: Vec<&str> = pool
        .workers()
        .filter(|w| w.state == WorkerState::Free)
        .map(|w| w.address.as_str())
        .collect();
    prop_assert_eq!(pool.free_count(), free.len());
    prop_assert_eq!(pool.has_free(), !free.is_empty());
    Ok(())
}

proptest! {
    /// Free and occupied never overlap and `get_free` only hands out free workers.
    #[test]
    fn pool_states_stay_exclusive(ops in prop::collection::vec(arb_pool_op(), 1..60)) {
        let mut pool = WorkerPool::new();
        for op in ops {
            match op {
                PoolOp::Register(i) => { pool.register(&address(i), SystemEnvironment::default()); }
                PoolOp::Unregister(i) => { pool.unregister(&address(i)).unwrap(); }
                PoolOp::Occupy(i) => pool.occupy(&address(i)).unwrap(),
                PoolOp::Free(i) => pool.free(&address(i)).unwrap(),
                PoolOp::GetFree => {
                    if let Some(addr) = pool.get_free() {
                        prop_assert_eq!(pool.state(&addr), Some(WorkerState::Free));
                    } else {
                        prop_assert!(!pool.has_free());
                    }
                }
            }
            check_pool(&pool)?;
        }
    }

    /// N non-empty groups yield one job from each group in N pops.
    #[test]
    fn pop_job_visits_every_group_once(
        sizes in prop::collection::vec(1usize..5, 1..8),
        served_first in 0usize..8,
    ) {
        let mut queue = JobQueue::new();
        for (g, size) in sizes.iter().enumerate() {
            let ids: Vec<String> = (0..*size).map(|j| format!("c{}", j)).collect();
            queue.add_jobs(&format!("g{}", g), ids).unwrap();
        }
        // Start the rotation somewhere other than the first group.
        for _ in 0..(served_first % sizes.len()) {
            let job = queue.pop_job().unwrap();
            queue.return_job(job);
        }

        let n = sizes.len();
        let groups: HashSet<String> = (0..n)
            .map(|_| queue.pop_job().unwrap().group_title)
            .collect();
        prop_assert_eq!(groups.len(), n);
    }

    /// Every job is queued, in flight or completed, never two at once and
    /// never none.
    #[test]
    fn jobs_are_never_lost_or_duplicated(
        refusing in prop::collection::hash_set(0u8..WORKERS, 0..3),
        ops in prop::collection::vec(arb_coord_op(), 1..80),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let transport = FlakyTransport {
            refusing: refusing.iter().map(|i| address(*i)).collect(),
        };
        let mut coord = Coordinator::new(Arc::new(transport), Arc::new(LogResultSink), 5);
        let mut known: HashSet<(String, String)> = HashSet::new();
        let mut completed: HashSet<(String, String)> = HashSet::new();

        for op in ops {
            match op {
                CoordOp::Register(i) => { coord.register_worker(&address(i), SystemEnvironment::default()); }
                CoordOp::Unregister(i) => { coord.unregister_worker(&address(i)).unwrap(); }
                CoordOp::AddJob(g, j) => {
                    let key = (format!("g{}", g), format!("c{}", j));
                    if coord.add_jobs(&key.0, [key.1.as_str()]).unwrap() == 1 {
                        completed.remove(&key);
                    }
                    known.insert(key);
                }
                CoordOp::Dispatch => { runtime.block_on(coord.attempt_dispatch()); }
                CoordOp::Result(i, present) => {
                    let addr = address(i);
                    let running = coord.current_job(&addr).cloned();
                    let result = present.then(JobResult::default);
                    match running {
                        Some(job) => {
                            runtime.block_on(coord.on_result_received(&addr, result)).unwrap();
                            if present {
                                completed.insert((job.group_title, job.job_id));
                            }
                        }
                        None => {
                            prop_assert!(runtime.block_on(coord.on_result_received(&addr, result)).is_err());
                        }
                    }
                }
                CoordOp::Lost(i) => { coord.on_connection_lost(&address(i)); }
                CoordOp::Prioritize(g, j) => {
                    coord.prioritize(&format!("g{}", g), &format!("c{}", j)).unwrap();
                }
            }

            let in_flight: Vec<(String, String)> = coord
                .in_flight()
                .map(|(_, j)| (j.group_title.clone(), j.job_id.clone()))
                .collect();
            for (addr, _) in coord.in_flight() {
                prop_assert!(coord.pool().is_occupied(addr));
            }
            for (group, id) in &known {
                let places = usize::from(coord.queue().contains(group, id))
                    + in_flight.iter().filter(|(g, j)| g == group && j == id).count()
                    + usize::from(completed.contains(&(group.clone(), id.clone())));
                prop_assert_eq!(places, 1, "job {} | {} is in {} places", group, id, places);
            }
            prop_assert_eq!(
                coord.queue().len() + in_flight.len() + completed.len(),
                known.len()
            );
            check_pool(coord.pool())?;
        }
    }
}
