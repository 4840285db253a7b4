//! OrderingBarrier 单元测试

use crate::runtime::barrier::{BarrierPhase, Interceptor, OrderingBarrier};
use crate::runtime::pool::{PoolConfig, WorkerPool};
use crate::runtime::task::{DispatchStatus, DispatcherTag, Priority, TaskUnit};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn pool() -> Arc<WorkerPool> {
    let config = PoolConfig {
        high_workers: 1,
        default_workers: 4,
        low_workers: 1,
        max_threads: 6,
        lane_capacity: 0,
        thread_name_prefix: "barrier-test".to_string(),
    };
    Arc::new(WorkerPool::with_config(config).unwrap())
}

fn unit<F>(f: F) -> Arc<TaskUnit>
where
    F: FnOnce() + Send + 'static,
{
    TaskUnit::new(Box::new(f), Priority::Default, DispatcherTag::detached())
}

/// Submit through the interceptor the way a concurrent dispatcher does.
fn submit(
    barrier: &Arc<OrderingBarrier>,
    pool: &WorkerPool,
    unit: Arc<TaskUnit>,
) -> DispatchStatus {
    let status = barrier.intercept(&unit);
    if status == DispatchStatus::Executed {
        pool.execute(unit).unwrap();
    }
    status
}

fn wait_for_idle(barrier: &OrderingBarrier) {
    let start = Instant::now();
    while (barrier.phase() != BarrierPhase::Idle || barrier.in_flight() > 0)
        && start.elapsed() < Duration::from_secs(2)
    {
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_idle_barrier_admits_units() {
    let pool = pool();
    let barrier = OrderingBarrier::new(Arc::from("idle"), pool.clone());
    let (tx, rx) = mpsc::channel();
    for i in 0..3 {
        let tx = tx.clone();
        let status = submit(&barrier, &pool, unit(move || tx.send(i).unwrap()));
        assert_eq!(status, DispatchStatus::Executed);
    }
    for _ in 0..3 {
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }
    wait_for_idle(&barrier);
    assert_eq!(barrier.in_flight(), 0);
    pool.terminate(false);
}

#[test]
fn test_barrier_without_prior_work_runs_immediately() {
    let pool = pool();
    let barrier = OrderingBarrier::new(Arc::from("empty"), pool.clone());
    let (tx, rx) = mpsc::channel();
    let status = barrier
        .add_barrier(unit(move || tx.send(()).unwrap()))
        .unwrap();
    assert_eq!(status, DispatchStatus::Executed);
    rx.recv_timeout(Duration::from_secs(2)).unwrap();
    wait_for_idle(&barrier);
    assert_eq!(barrier.phase(), BarrierPhase::Idle);
    pool.terminate(false);
}

#[test]
fn test_barrier_isolates_before_and_after() {
    let pool = pool();
    let barrier = OrderingBarrier::new(Arc::from("isolate"), pool.clone());
    let log = Arc::new(Mutex::new(Vec::new()));

    for name in ["a", "b"] {
        let log = log.clone();
        submit(
            &barrier,
            &pool,
            unit(move || {
                thread::sleep(Duration::from_millis(30));
                log.lock().unwrap().push(format!("{}-end", name));
            }),
        );
    }

    let l = log.clone();
    let status = barrier
        .add_barrier(unit(move || {
            l.lock().unwrap().push("x-start".to_string());
            thread::sleep(Duration::from_millis(20));
            l.lock().unwrap().push("x-end".to_string());
        }))
        .unwrap();
    assert_eq!(status, DispatchStatus::Intercepted);
    assert_eq!(barrier.phase(), BarrierPhase::Draining);

    let l = log.clone();
    let status = submit(
        &barrier,
        &pool,
        unit(move || l.lock().unwrap().push("c-start".to_string())),
    );
    assert_eq!(status, DispatchStatus::Intercepted);
    assert_eq!(barrier.queued_after(), 1);

    wait_for_idle(&barrier);
    pool.terminate(false);

    let log = log.lock().unwrap();
    let pos = |s: &str| log.iter().position(|e| e == s).unwrap();
    assert!(pos("a-end") < pos("x-start"));
    assert!(pos("b-end") < pos("x-start"));
    assert!(pos("x-end") < pos("c-start"));
}

#[test]
fn test_consecutive_barriers_run_in_order() {
    let pool = pool();
    let barrier = OrderingBarrier::new(Arc::from("chain"), pool.clone());
    let log = Arc::new(Mutex::new(Vec::new()));

    let l = log.clone();
    submit(
        &barrier,
        &pool,
        unit(move || {
            thread::sleep(Duration::from_millis(20));
            l.lock().unwrap().push(0);
        }),
    );
    for i in 1..=3 {
        let l = log.clone();
        barrier
            .add_barrier(unit(move || l.lock().unwrap().push(i)))
            .unwrap();
        let l = log.clone();
        submit(&barrier, &pool, unit(move || l.lock().unwrap().push(i * 10)));
    }

    wait_for_idle(&barrier);
    pool.terminate(false);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 7);
    let pos = |v: i32| log.iter().position(|e| *e == v).unwrap();
    assert!(pos(0) < pos(1));
    assert!(pos(1) < pos(10));
    assert!(pos(10) < pos(2));
    assert!(pos(2) < pos(20));
    assert!(pos(20) < pos(3));
    assert!(pos(3) < pos(30));
}

#[test]
fn test_revoked_prior_unit_still_releases_barrier() {
    let pool = pool();
    let barrier = OrderingBarrier::new(Arc::from("revoke"), pool.clone());

    // Keep every DEFAULT worker busy so the next unit stays queued.
    let (block_tx, block_rx) = mpsc::channel::<()>();
    let block_rx = Arc::new(Mutex::new(block_rx));
    let (started_tx, started_rx) = mpsc::channel();
    for _ in 0..4 {
        let block_rx = block_rx.clone();
        let started_tx = started_tx.clone();
        pool.execute(unit(move || {
            started_tx.send(()).unwrap();
            let _ = block_rx.lock().unwrap().recv();
        }))
        .unwrap();
    }
    for _ in 0..4 {
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }

    let victim = unit(|| panic!("revoked unit must not run"));
    submit(&barrier, &pool, victim.clone());
    assert!(victim.revoke());

    let (tx, rx) = mpsc::channel();
    barrier.add_barrier(unit(move || tx.send(()).unwrap())).unwrap();
    for _ in 0..4 {
        block_tx.send(()).unwrap();
    }
    rx.recv_timeout(Duration::from_secs(2)).unwrap();
    wait_for_idle(&barrier);
    pool.terminate(false);
}

#[test]
fn test_rejected_barrier_reopens_gate() {
    let pool = pool();
    let barrier = OrderingBarrier::new(Arc::from("rejected"), pool.clone());
    pool.terminate(false);
    assert!(barrier.add_barrier(unit(|| {})).is_err());
    assert_eq!(barrier.phase(), BarrierPhase::Idle);
}
