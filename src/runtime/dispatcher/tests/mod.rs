//! Dispatcher 单元测试
//!
//! 覆盖串行、并发、全局与绑定线程四种调度器的公共能力

use crate::runtime::dispatcher::{
    ConcurrentDispatcher, DispatchContext, DispatchTracer, Dispatcher, GlobalDispatcher,
    PinnedDispatcher, SerialDispatcher, TracePoint,
};
use crate::runtime::error::{DispatchError, ErrorKind};
use crate::runtime::pool::{PoolConfig, WorkerPool};
use crate::runtime::task::{DispatchStatus, Priority, TaskState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn context() -> DispatchContext {
    let config = PoolConfig {
        high_workers: 2,
        default_workers: 4,
        low_workers: 2,
        max_threads: 8,
        lane_capacity: 0,
        thread_name_prefix: "dispatcher-test".to_string(),
    };
    DispatchContext::new(Arc::new(WorkerPool::with_config(config).unwrap()))
}

fn wait_until(cond: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while !cond() {
        if start.elapsed() > Duration::from_secs(2) {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
    true
}

#[cfg(test)]
mod serial_tests {
    use super::*;

    #[test]
    fn test_async_dispatch_runs_in_submission_order() {
        let ctx = context();
        let serial = SerialDispatcher::new("serial", Priority::Default, ctx.clone());
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let order = order.clone();
            serial
                .async_dispatch(Box::new(move || {
                    if i % 7 == 0 {
                        thread::sleep(Duration::from_millis(1));
                    }
                    order.lock().unwrap().push(i);
                }))
                .unwrap();
        }
        serial.sync_dispatch(Box::new(|| {})).unwrap();
        assert_eq!(*order.lock().unwrap(), (0..50).collect::<Vec<_>>());
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_at_most_one_unit_running() {
        let ctx = context();
        let serial = SerialDispatcher::new("single-flight", Priority::High, ctx.clone());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let active = active.clone();
            let peak = peak.clone();
            serial
                .async_dispatch(Box::new(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(1));
                    active.fetch_sub(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        serial.sync_dispatch(Box::new(|| {})).unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_sync_dispatch_blocks_until_done() {
        let ctx = context();
        let serial = SerialDispatcher::new("sync", Priority::Default, ctx.clone());
        let done = Arc::new(AtomicUsize::new(0));
        let d = done.clone();
        serial
            .sync_dispatch(Box::new(move || {
                thread::sleep(Duration::from_millis(20));
                d.store(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 1);
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_recursive_sync_dispatch_is_refused() {
        let ctx = context();
        let serial = SerialDispatcher::new("recursive", Priority::Default, ctx.clone());
        let inner = serial.clone();
        let (tx, rx) = mpsc::channel();
        serial
            .sync_dispatch(Box::new(move || {
                tx.send(inner.sync_dispatch(Box::new(|| {}))).unwrap();
            }))
            .unwrap();
        let nested = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(nested, Err(DispatchError::RecursiveSync(_))));
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_barrier_degrades_to_plain_dispatch() {
        let ctx = context();
        let serial = SerialDispatcher::new("barrier", Priority::Default, ctx.clone());
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = order.clone();
        serial
            .async_dispatch(Box::new(move || o.lock().unwrap().push("a")))
            .unwrap();
        let o = order.clone();
        serial
            .async_dispatch_barrier(Box::new(move || o.lock().unwrap().push("x")))
            .unwrap();
        let o = order.clone();
        serial
            .sync_dispatch_barrier(Box::new(move || o.lock().unwrap().push("y")))
            .unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["a", "x", "y"]);
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_submit_after_terminate_fails_without_running() {
        let ctx = context();
        let serial = SerialDispatcher::new("stopped", Priority::Low, ctx.clone());
        ctx.pool.terminate(false);
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let err = serial
            .async_dispatch(Box::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EnqueueFailure);
        assert!(serial.sync_dispatch(Box::new(|| {})).is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(serial.waiting_count(), 0);
    }

    #[test]
    fn test_panicking_group_notification_keeps_queue_moving() {
        let ctx = context();
        let serial = SerialDispatcher::new("notify-panic", Priority::Default, ctx.clone());
        let group = serial.create_group();
        serial
            .async_group_dispatch(
                &group,
                Box::new(|| thread::sleep(Duration::from_millis(50))),
            )
            .unwrap();
        group
            .add_notification(Box::new(|| panic!("notification failed")))
            .unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        serial
            .async_dispatch(Box::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert!(wait_until(|| ran.load(Ordering::SeqCst) == 1));
        assert!(wait_until(|| ctx.pool.worker_stats().iter().all(|w| !w.busy)));

        let pool = ctx.pool.clone();
        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            pool.terminate(false);
            let _ = done_tx.send(());
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_discard_waiting_releases_sync_submitters() {
        let ctx = context();
        let serial = SerialDispatcher::new("discard", Priority::Default, ctx.clone());
        let (block_tx, block_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel();
        serial
            .async_dispatch(Box::new(move || {
                started_tx.send(()).unwrap();
                let _ = block_rx.recv();
            }))
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let blocked = serial.clone();
        let waiter = thread::spawn(move || blocked.sync_dispatch(Box::new(|| {})));
        assert!(wait_until(|| serial.waiting_count() == 1));
        assert_eq!(serial.discard_waiting(), 1);
        assert!(waiter.join().unwrap().is_err());
        block_tx.send(()).unwrap();
        ctx.pool.terminate(false);
    }
}

#[cfg(test)]
mod concurrent_tests {
    use super::*;

    #[test]
    fn test_units_run_in_parallel() {
        let ctx = context();
        let concurrent = ConcurrentDispatcher::new("parallel", Priority::Default, ctx.clone());
        let group = concurrent.create_group();
        let start = Instant::now();
        for _ in 0..4 {
            concurrent
                .async_group_dispatch(
                    &group,
                    Box::new(|| thread::sleep(Duration::from_millis(50))),
                )
                .unwrap();
        }
        assert!(concurrent.group_wait(&group, 1000));
        assert!(start.elapsed() < Duration::from_millis(180));
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_barrier_runs_after_prior_units() {
        let ctx = context();
        let concurrent = ConcurrentDispatcher::new("barrier", Priority::Default, ctx.clone());
        let finished = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let f = finished.clone();
            concurrent
                .async_dispatch(Box::new(move || {
                    thread::sleep(Duration::from_millis(20));
                    f.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        let f = finished.clone();
        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let s = seen.clone();
        concurrent
            .sync_dispatch_barrier(Box::new(move || {
                s.store(f.load(Ordering::SeqCst), Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_units_after_barrier_are_intercepted() {
        let ctx = context();
        let concurrent = ConcurrentDispatcher::new("intercept", Priority::Default, ctx.clone());
        let (block_tx, block_rx) = mpsc::channel::<()>();
        concurrent
            .async_dispatch(Box::new(move || {
                let _ = block_rx.recv();
            }))
            .unwrap();
        concurrent.async_dispatch_barrier(Box::new(|| {})).unwrap();

        let (tx, rx) = mpsc::channel();
        let handle = concurrent
            .async_dispatch(Box::new(move || tx.send(()).unwrap()))
            .unwrap();
        assert_eq!(handle.status(), DispatchStatus::Intercepted);
        assert!(rx.recv_timeout(Duration::from_millis(30)).is_err());

        block_tx.send(()).unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_nested_sync_dispatch_behind_pending_barrier_is_refused() {
        let ctx = context();
        let concurrent = ConcurrentDispatcher::new("nested", Priority::Default, ctx.clone());
        let inner = concurrent.clone();
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let (tx, rx) = mpsc::channel();
        concurrent
            .async_dispatch(Box::new(move || {
                let _ = go_rx.recv();
                let _ = tx.send(inner.sync_dispatch(Box::new(|| {})));
            }))
            .unwrap();

        let barrier_ran = Arc::new(AtomicUsize::new(0));
        let b = barrier_ran.clone();
        concurrent
            .async_dispatch_barrier(Box::new(move || {
                b.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        go_tx.send(()).unwrap();

        let nested = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(nested, Err(DispatchError::RecursiveSync(_))));
        assert!(wait_until(|| barrier_ran.load(Ordering::SeqCst) == 1));
        assert!(wait_until(|| concurrent.barrier().in_flight() == 0));
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_nested_sync_dispatch_runs_while_idle() {
        let ctx = context();
        let concurrent = ConcurrentDispatcher::new("nested-idle", Priority::Default, ctx.clone());
        let inner = concurrent.clone();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let (tx, rx) = mpsc::channel();
        concurrent
            .async_dispatch(Box::new(move || {
                let result = inner.sync_dispatch(Box::new(move || {
                    r.fetch_add(1, Ordering::SeqCst);
                }));
                let _ = tx.send(result);
            }))
            .unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap().is_ok());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(wait_until(|| concurrent.barrier().in_flight() == 0));
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_sync_barrier_from_own_unit_is_refused() {
        let ctx = context();
        let concurrent = ConcurrentDispatcher::new("self-barrier", Priority::Default, ctx.clone());
        let inner = concurrent.clone();
        let (tx, rx) = mpsc::channel();
        concurrent
            .async_dispatch(Box::new(move || {
                tx.send(inner.sync_dispatch_barrier(Box::new(|| {}))).unwrap();
            }))
            .unwrap();
        let nested = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(nested, Err(DispatchError::RecursiveSync(_))));
        ctx.pool.terminate(false);
    }
}

#[cfg(test)]
mod global_tests {
    use super::*;

    #[test]
    fn test_global_dispatcher_name() {
        let global = GlobalDispatcher::new(Priority::High, context());
        assert_eq!(global.name(), "GlobalDispatcher-high");
        assert_eq!(global.priority(), Priority::High);
    }

    #[test]
    fn test_barrier_is_unsupported() {
        let ctx = context();
        let global = GlobalDispatcher::new(Priority::Default, ctx.clone());
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let err = global
            .async_dispatch_barrier(Box::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap_err();
        assert!(matches!(err, DispatchError::BarrierUnsupported(_)));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(matches!(
            global.sync_dispatch_barrier(Box::new(|| {})),
            Err(DispatchError::BarrierUnsupported(_))
        ));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_sync_dispatch_runs_on_pool() {
        let ctx = context();
        let global = GlobalDispatcher::new(Priority::Low, ctx.clone());
        let (tx, rx) = mpsc::channel();
        global
            .sync_dispatch(Box::new(move || {
                tx.send(thread::current().name().unwrap_or_default().to_string())
                    .unwrap();
            }))
            .unwrap();
        assert!(rx.recv().unwrap().starts_with("dispatcher-test-low-"));
        ctx.pool.terminate(false);
    }
}

#[cfg(test)]
mod pinned_tests {
    use super::*;

    #[test]
    fn test_all_units_run_on_one_thread_in_order() {
        let ctx = context();
        let pinned = PinnedDispatcher::new("ui", Priority::High, ctx.clone()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let seen = seen.clone();
            pinned
                .async_dispatch(Box::new(move || {
                    seen.lock().unwrap().push((i, thread::current().id()));
                }))
                .unwrap();
        }
        pinned.sync_dispatch(Box::new(|| {})).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
        assert!(seen.iter().all(|(_, id)| *id == seen[0].1));
        pinned.shutdown(false);
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_thread_name_carries_dispatcher_name() {
        let ctx = context();
        let pinned = PinnedDispatcher::new("main", Priority::Default, ctx.clone()).unwrap();
        let (tx, rx) = mpsc::channel();
        pinned
            .sync_dispatch(Box::new(move || {
                tx.send(thread::current().name().unwrap_or_default().to_string())
                    .unwrap();
            }))
            .unwrap();
        assert_eq!(rx.recv().unwrap(), "dispatcher-test-pinned-main");
        pinned.shutdown(false);
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_recursive_sync_dispatch_is_refused() {
        let ctx = context();
        let pinned = PinnedDispatcher::new("nested", Priority::Default, ctx.clone()).unwrap();
        let inner = pinned.clone();
        let (tx, rx) = mpsc::channel();
        pinned
            .sync_dispatch(Box::new(move || {
                tx.send(inner.sync_dispatch(Box::new(|| {}))).unwrap();
            }))
            .unwrap();
        assert!(matches!(
            rx.recv().unwrap(),
            Err(DispatchError::RecursiveSync(_))
        ));
        pinned.shutdown(false);
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_delay_dispatch_lands_on_pinned_thread() {
        let ctx = context();
        let pinned = PinnedDispatcher::new("delayed", Priority::Default, ctx.clone()).unwrap();
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        pinned
            .delay_dispatch(
                Box::new(move || {
                    tx.send(thread::current().name().unwrap_or_default().to_string())
                        .unwrap();
                }),
                30,
            )
            .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(name, "dispatcher-test-pinned-delayed");
        pinned.shutdown(false);
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let ctx = context();
        let pinned = PinnedDispatcher::new("closed", Priority::Low, ctx.clone()).unwrap();
        pinned.shutdown(false);
        assert!(!pinned.is_running());
        assert!(pinned.async_dispatch(Box::new(|| {})).is_err());
        assert!(pinned.sync_dispatch(Box::new(|| {})).is_err());
        ctx.pool.terminate(false);
    }
}

#[cfg(test)]
mod common_tests {
    use super::*;

    struct Recorder(Mutex<Vec<(String, TracePoint)>>);

    impl DispatchTracer for Recorder {
        fn before_post(
            &self,
            point: &TracePoint,
        ) {
            self.0.lock().unwrap().push(("before".to_string(), point.clone()));
        }

        fn after_post(
            &self,
            point: &TracePoint,
        ) {
            self.0.lock().unwrap().push(("after".to_string(), point.clone()));
        }
    }

    #[test]
    fn test_empty_name_is_generated() {
        let ctx = context();
        let a = SerialDispatcher::new("", Priority::Default, ctx.clone());
        let b = ConcurrentDispatcher::new("", Priority::Default, ctx.clone());
        assert!(a.name().starts_with("Dispatcher-"));
        assert!(b.name().starts_with("Dispatcher-"));
        assert_ne!(a.name(), b.name());
        assert_ne!(a.core().tag().id, b.core().tag().id);
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_apply_dispatch_runs_every_index() {
        let ctx = context();
        let concurrent = ConcurrentDispatcher::new("apply", Priority::Default, ctx.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        concurrent
            .apply_dispatch(Arc::new(move |i: usize| s.lock().unwrap().push(i)), 10)
            .unwrap();
        assert!(wait_until(|| seen.lock().unwrap().len() == 10));
        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_apply_dispatch_rejects_non_positive_iterations() {
        let ctx = context();
        let serial = SerialDispatcher::new("apply-invalid", Priority::Default, ctx.clone());
        let ran = Arc::new(AtomicUsize::new(0));
        for iterations in [0, -3] {
            let r = ran.clone();
            let err = serial
                .apply_dispatch(
                    Arc::new(move |_: usize| {
                        r.fetch_add(1, Ordering::SeqCst);
                    }),
                    iterations,
                )
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_apply_dispatch_reports_partial_failure() {
        let ctx = context();
        let global = GlobalDispatcher::new(Priority::Default, ctx.clone());
        ctx.pool.terminate(false);
        assert_eq!(
            global.apply_dispatch(Arc::new(|_: usize| {}), 3),
            Err(DispatchError::PartialApply {
                failed: 3,
                total: 3
            })
        );
    }

    #[test]
    fn test_revoke_skips_pending_unit_and_releases_group() {
        let ctx = context();
        let serial = SerialDispatcher::new("revoke", Priority::Default, ctx.clone());
        let (block_tx, block_rx) = mpsc::channel::<()>();
        serial
            .async_dispatch(Box::new(move || {
                let _ = block_rx.recv();
            }))
            .unwrap();

        let group = serial.create_group();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let handle = serial
            .async_group_dispatch(
                &group,
                Box::new(move || {
                    r.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert!(handle.revoke());
        assert!(!handle.revoke());
        assert_eq!(handle.state(), Some(TaskState::Revoked));

        block_tx.send(()).unwrap();
        assert!(serial.group_wait(&group, 1000));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_revoke_after_completion_is_noop() {
        let ctx = context();
        let global = GlobalDispatcher::new(Priority::Default, ctx.clone());
        let (tx, rx) = mpsc::channel();
        let handle = global
            .async_dispatch(Box::new(move || tx.send(()).unwrap()))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(wait_until(|| handle.state() != Some(TaskState::Running)));
        assert!(!handle.revoke());
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_group_notify_dispatches_after_drain() {
        let ctx = context();
        let serial = SerialDispatcher::new("notify", Priority::Default, ctx.clone());
        let group = serial.create_group();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            serial
                .async_group_dispatch(
                    &group,
                    Box::new(move || {
                        thread::sleep(Duration::from_millis(5));
                        log.lock().unwrap().push(i);
                    }),
                )
                .unwrap();
        }
        let (tx, rx) = mpsc::channel();
        let l = log.clone();
        serial
            .group_notify(
                &group,
                Box::new(move || {
                    l.lock().unwrap().push(99);
                    tx.send(thread::current().name().unwrap_or_default().to_string())
                        .unwrap();
                }),
            )
            .unwrap();
        let ran_on = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(ran_on.starts_with("dispatcher-test-default-"));
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 99]);
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_group_dispatch_on_pinned_dispatcher() {
        let ctx = context();
        let pinned = PinnedDispatcher::new("group", Priority::Default, ctx.clone()).unwrap();
        let group = pinned.create_group();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let c = count.clone();
            pinned
                .async_group_dispatch(
                    &group,
                    Box::new(move || {
                        c.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .unwrap();
        }
        assert!(pinned.group_wait(&group, 1000));
        assert_eq!(count.load(Ordering::SeqCst), 5);
        pinned.shutdown(false);
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_rejected_group_dispatch_leaves_group_empty() {
        let ctx = context();
        let global = GlobalDispatcher::new(Priority::Default, ctx.clone());
        let group = global.create_group();
        ctx.pool.terminate(false);
        assert!(global.async_group_dispatch(&group, Box::new(|| {})).is_err());
        assert_eq!(group.outstanding(), 0);
        assert!(global.group_wait(&group, 0));
    }

    #[test]
    fn test_tracer_sees_every_submission() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let ctx = context().with_tracer(recorder.clone());
        let serial = SerialDispatcher::new("traced", Priority::Default, ctx.clone());
        let handle = serial.async_dispatch(Box::new(|| {})).unwrap();
        serial.sync_dispatch(Box::new(|| {})).unwrap();

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].0, "before");
        assert_eq!(events[1].0, "after");
        assert_eq!(events[0].1.sequence, handle.sequence());
        assert!(events[0].1.is_async);
        assert!(!events[2].1.is_async);
        assert_eq!(&*events[2].1.dispatcher, "traced");
        assert_eq!(events[2].1.tag, "sync_dispatch");
        drop(events);
        ctx.pool.terminate(false);
    }

    #[test]
    fn test_delay_dispatch_can_be_revoked() {
        let ctx = context();
        let concurrent = ConcurrentDispatcher::new("delay-revoke", Priority::Default, ctx.clone());
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let handle = concurrent
            .delay_dispatch(
                Box::new(move || {
                    r.fetch_add(1, Ordering::SeqCst);
                }),
                50,
            )
            .unwrap();
        assert!(handle.revoke());
        thread::sleep(Duration::from_millis(120));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        ctx.pool.terminate(false);
    }
}
