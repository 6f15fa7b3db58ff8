use std::sync::Arc;
use std::time::Instant;

use rhi_core::backend::headless::{FenceMode, HeadlessQueue};
use rhi_core::command::{CommandListSet, CommandQueue};
use rhi_core::config::QueueConfig;
use rhi_core::query::{QueryKind, QueryState};
use rhi_core::Error;

fn config() -> QueueConfig {
    QueueConfig {
        completion_wait_interval_ms: 1,
        calibration_interval_ms: 1,
        timestamp_queries: 2,
    }
}

#[test]
fn measure_gpu_time() {
    let native = Arc::new(HeadlessQueue::new(FenceMode::Manual));
    let queue = CommandQueue::new("graphics", native.clone(), &config()).unwrap();
    let pool = queue.timestamp_query_pool().unwrap().clone();

    let mut start = pool.create_timestamp_query().unwrap();
    let mut end = pool.create_timestamp_query().unwrap();
    assert_eq!(
        pool.create_timestamp_query().err(),
        Some(Error::QueryPoolExhausted {
            kind: QueryKind::Timestamp,
            max_queries: 2,
        })
    );

    let list = queue.create_command_list("timed").unwrap();
    start.insert_timestamp(&list).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2));
    end.insert_timestamp(&list).unwrap();
    start.resolve_timestamp(&list).unwrap();
    end.resolve_timestamp(&list).unwrap();
    list.commit().unwrap();

    let set = CommandListSet::new(vec![list], Some(0)).unwrap();
    queue.execute(&set, None).unwrap();
    native.signal_all();
    queue.complete_execution(Some(0)).unwrap();

    assert_eq!(start.query().state(), QueryState::Resolved);
    let elapsed = end.gpu_timestamp().unwrap() - start.gpu_timestamp().unwrap();
    assert!(elapsed >= 2_000_000);

    let start_nanos = start.cpu_nanoseconds().unwrap();
    let end_nanos = end.cpu_nanoseconds().unwrap();
    assert!(end_nanos > start_nanos);
    assert!(end_nanos - start_nanos >= 2_000_000);

    drop(start);
    assert_eq!(pool.pool().available(), 1);
}

#[test]
fn calibration_keeps_timestamps_monotonic() {
    let native = Arc::new(HeadlessQueue::new(FenceMode::Auto));
    let queue = CommandQueue::new("graphics", native, &config()).unwrap();
    let pool = queue.timestamp_query_pool().unwrap().clone();

    let before = pool.calibration();
    let deadline = Instant::now() + std::time::Duration::from_secs(5);
    while pool.calibration() == before && Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    let after = pool.calibration();
    assert!(after.gpu_ticks > before.gpu_ticks);
    assert!(after.cpu_nanos > before.cpu_nanos);
    assert_eq!(
        pool.to_cpu_nanoseconds(after.gpu_ticks),
        after.cpu_nanos
    );
}
