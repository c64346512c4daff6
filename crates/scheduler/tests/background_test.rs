//! Integration tests for background tasks and their continuations.
//!
//! The test thread plays the host loop: it ticks the scheduler while worker
//! threads run background actions and post continuations back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use lull_scheduler::{
    BackgroundOptions, FullPolicy, Scheduler, SchedulerConfig, SchedulerError, TaskFailure, TaskState,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn scheduler(config: SchedulerConfig) -> Scheduler {
    init_tracing();
    Scheduler::new(config).unwrap()
}

#[test]
fn continuation_sees_value_on_ticking_thread() {
    let s = scheduler(SchedulerConfig::default());
    assert!(s.bind_idle_thread());
    let ticking_thread = thread::current().id();

    let observed = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&observed);
    let observer = s.clone();
    let handle = s
        .background(
            || {
                thread::sleep(Duration::from_millis(50));
                Ok(42)
            },
            move |result: Result<i32, TaskFailure>| {
                *slot.lock().unwrap() = Some((result, thread::current().id(), observer.is_idle_thread()));
                Ok(())
            },
        )
        .unwrap();

    let started = Instant::now();
    assert!(s.run_until(TIMEOUT, || observed.lock().unwrap().is_some()));
    assert!(started.elapsed() >= Duration::from_millis(50));

    let (result, ran_on, was_idle_thread) = observed.lock().unwrap().take().unwrap();
    assert_eq!(result, Ok(42));
    assert_eq!(ran_on, ticking_thread);
    assert!(was_idle_thread);
    assert_eq!(handle.state(), TaskState::Completed);
}

#[test]
fn many_producers_each_task_runs_exactly_once() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 25;
    const TOTAL: usize = PRODUCERS * PER_PRODUCER;

    let s = scheduler(SchedulerConfig {
        worker_threads: 3,
        ..Default::default()
    });
    let executions = Arc::new(Mutex::new(HashMap::<usize, usize>::new()));
    let continuations = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(PRODUCERS));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let s = s.clone();
            let executions = Arc::clone(&executions);
            let continuations = Arc::clone(&continuations);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..PER_PRODUCER {
                    let key = p * PER_PRODUCER + i;
                    let executions = Arc::clone(&executions);
                    let continuations = Arc::clone(&continuations);
                    s.background(
                        move || {
                            *executions.lock().unwrap().entry(key).or_default() += 1;
                            Ok(key)
                        },
                        move |result: Result<usize, TaskFailure>| {
                            assert_eq!(result?, key);
                            continuations.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        },
                    )
                    .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert!(s.run_until(TIMEOUT, || continuations.load(Ordering::SeqCst) == TOTAL));
    s.shutdown();

    let executions = executions.lock().unwrap();
    assert_eq!(executions.len(), TOTAL);
    assert!(executions.values().all(|&n| n == 1));
    let metrics = s.metrics();
    assert_eq!(metrics.background_submitted, TOTAL as u64);
    assert_eq!(metrics.background_completed, TOTAL as u64);
}

#[test]
fn failing_background_task_still_runs_continuation() {
    let s = scheduler(SchedulerConfig {
        worker_threads: 1,
        ..Default::default()
    });
    let results = Arc::new(Mutex::new(Vec::new()));

    for fail in [true, false] {
        let results = Arc::clone(&results);
        s.background(
            move || {
                if fail {
                    anyhow::bail!("disk unplugged");
                }
                Ok("done")
            },
            move |result: Result<&'static str, TaskFailure>| {
                results.lock().unwrap().push(result);
                Ok(())
            },
        )
        .unwrap();
    }
    let crashing = s
        .enqueue_background(|| -> anyhow::Result<()> { panic!("worker bug") }, BackgroundOptions::new())
        .unwrap();

    assert!(s.run_until(TIMEOUT, || results.lock().unwrap().len() == 2 && crashing.is_finished()));
    let results = results.lock().unwrap();
    assert_eq!(results[0], Err(TaskFailure::Error("disk unplugged".into())));
    assert_eq!(results[1], Ok("done"));
    assert_eq!(crashing.state(), TaskState::Failed);

    // The single worker survived the panic.
    let after = s.enqueue_background(|| Ok(()), BackgroundOptions::new()).unwrap();
    assert!(s.run_until(TIMEOUT, || after.is_finished()));
    assert_eq!(after.state(), TaskState::Completed);
}

#[test]
fn bounded_queue_rejects_when_full() {
    let s = scheduler(SchedulerConfig {
        worker_threads: 1,
        queue_capacity: Some(2),
        full_policy: FullPolicy::Reject,
        ..Default::default()
    });
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    s.enqueue_background(
        move || {
            started_tx.send(())?;
            gate_rx.recv()?;
            Ok(())
        },
        BackgroundOptions::new(),
    )
    .unwrap();
    started_rx.recv().unwrap();

    for _ in 0..2 {
        s.enqueue_background(|| Ok(()), BackgroundOptions::new()).unwrap();
    }
    let err = s.enqueue_background(|| Ok(()), BackgroundOptions::new()).unwrap_err();
    assert!(matches!(err, SchedulerError::QueueFull { capacity: 2 }));
    assert_eq!(s.pending_background(), 2);

    gate_tx.send(()).unwrap();
    s.shutdown();
    let metrics = s.metrics();
    assert_eq!(metrics.background_completed, 3);
    assert_eq!(metrics.background_rejected, 1);
}

#[test]
fn submitting_from_async_context_does_not_block() {
    let s = scheduler(SchedulerConfig {
        worker_threads: 1,
        queue_capacity: Some(4),
        full_policy: FullPolicy::Block,
        ..Default::default()
    });
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let handle = rt
        .block_on(async { s.enqueue_background(|| Ok(7), BackgroundOptions::new().name("from-async")) })
        .unwrap();

    assert!(s.run_until(TIMEOUT, || handle.is_finished()));
    assert_eq!(handle.state(), TaskState::Completed);
}

#[test]
fn shutdown_drains_accepted_jobs_then_rejects() {
    let s = scheduler(SchedulerConfig {
        worker_threads: 2,
        ..Default::default()
    });
    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..8 {
        let done = Arc::clone(&done);
        s.background(
            move || {
                thread::sleep(Duration::from_millis(5));
                Ok(())
            },
            move |_: Result<(), TaskFailure>| {
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap();
    }

    s.shutdown();
    assert_eq!(s.metrics().background_completed, 8);
    assert!(matches!(
        s.enqueue_background(|| Ok(()), BackgroundOptions::new()),
        Err(SchedulerError::ShuttingDown)
    ));

    // Continuations of drained jobs are still delivered by the idle thread.
    s.tick(Duration::from_secs(1));
    assert_eq!(done.load(Ordering::SeqCst), 8);
}

#[test]
fn dropping_the_last_clone_joins_workers() {
    let s = scheduler(SchedulerConfig {
        worker_threads: 2,
        ..Default::default()
    });
    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..4 {
        let done = Arc::clone(&done);
        s.enqueue_background(
            move || {
                thread::sleep(Duration::from_millis(10));
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            BackgroundOptions::new(),
        )
        .unwrap();
    }
    drop(s);
    assert_eq!(done.load(Ordering::SeqCst), 4);
}
