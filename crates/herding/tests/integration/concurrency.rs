use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use futures::future::join_all;
use herding::Work;

use crate::{Invocations, ProducerError, setup_herd};

/// Misses racing each other from different threads must collapse into one producer call.
#[test]
fn test_single_invocation_across_threads() {
    let herd = setup_herd(|_| {});
    let invocations = Invocations::new();
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let herd = herd.clone();
            let invocations = invocations.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                herd.obtain("key".to_owned(), move || {
                    invocations.record();
                    // widen the window in which the other threads arrive
                    thread::sleep(Duration::from_millis(10));
                    Work::ready(42)
                })
            })
        })
        .collect();

    let computations: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(invocations.count(), 1);
    for result in futures::executor::block_on(join_all(computations)) {
        assert_eq!(result, Ok(42));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_invocation_per_key_across_tasks() {
    let herd = setup_herd(|_| {});
    let invocations = Invocations::new();

    let tasks: Vec<_> = (0..200u64)
        .map(|i| {
            let herd = herd.clone();
            let invocations = invocations.clone();
            tokio::spawn(async move {
                let key = i % 8;
                herd.obtain(format!("key-{key}"), move || {
                    invocations.record();
                    Work::pending(async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(key)
                    })
                })
                .await
                .map(|value| (key, value))
            })
        })
        .collect();

    for task in join_all(tasks).await {
        let (key, value) = task.unwrap().unwrap();
        assert_eq!(key, value);
    }

    assert_eq!(invocations.count(), 8);
    assert_eq!(herd.count(), 8);
}

/// A rejection nobody waits for still evicts its entry, and the next call is a fresh miss.
#[tokio::test]
async fn test_abandoned_rejection_is_evicted() {
    let herd = setup_herd(|config| {
        config.max_age = Some(Duration::from_millis(1));
        config.evict_on_reject = true;
    });
    let invocations = Invocations::new();

    drop(herd.obtain("key".to_owned(), || {
        Work::pending(async { Err(ProducerError::failed("ERROR")) })
    }));

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!herd.has(&"key".to_owned()));
    assert_eq!(herd.count(), 0);

    let value = herd
        .obtain("key".to_owned(), {
            let invocations = invocations.clone();
            move || {
                invocations.record();
                Work::ready(7)
            }
        })
        .await;
    assert_eq!(value, Ok(7));
    assert_eq!(invocations.count(), 1);
}

/// Outside of a runtime, an abandoned computation stays pending until the next caller awaits it.
#[test]
fn test_abandoned_computation_without_runtime_is_resumed() {
    let herd = setup_herd(|_| {});
    let invocations = Invocations::new();

    {
        let invocations = invocations.clone();
        drop(herd.obtain("key".to_owned(), move || {
            invocations.record();
            Work::pending(async { Ok(1) })
        }));
    }

    let computation = herd.obtain("key".to_owned(), || Work::ready(2));
    assert!(!computation.is_settled());
    assert_eq!(futures::executor::block_on(computation), Ok(1));
    assert_eq!(invocations.count(), 1);
}
