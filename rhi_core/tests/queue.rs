use std::sync::{Arc, Barrier};
use std::time::Duration;

use parking_lot::Mutex;
use rhi_core::backend::headless::{FenceMode, HeadlessQueue, RecordedCommand};
use rhi_core::backend::RootParameterValue;
use rhi_core::command::{CommandListSet, CommandQueue, ExecutionState};
use rhi_core::config::QueueConfig;
use rhi_core::program::NativeBindingType;
use rhi_core::Error;

const THREADS: u64 = 4;
const SETS_PER_THREAD: u64 = 16;

fn config() -> QueueConfig {
    QueueConfig {
        completion_wait_interval_ms: 1,
        calibration_interval_ms: 10,
        timestamp_queries: 0,
    }
}

/// Creates a set with a single command list tagged with `id`.
fn tagged_set(queue: &CommandQueue, id: u64) -> Arc<CommandListSet> {
    let list = queue.create_command_list("tagged").unwrap();
    list.set_root_parameter(
        0,
        &RootParameterValue::View {
            binding_type: NativeBindingType::ConstantBufferView,
            gpu_address: id,
        },
    )
    .unwrap();
    list.commit().unwrap();
    CommandListSet::new(vec![list], None).unwrap()
}

fn submitted_ids(native: &HeadlessQueue) -> Vec<u64> {
    native
        .submissions()
        .iter()
        .flat_map(|commands| commands.iter())
        .filter_map(|command| match command {
            RecordedCommand::SetRootParameter {
                value: RootParameterValue::View { gpu_address, .. },
                ..
            } => Some(*gpu_address),
            _ => None,
        })
        .collect()
}

#[test]
fn completion_order_matches_submission_order() {
    let native = Arc::new(HeadlessQueue::new(FenceMode::Auto));
    let queue = Arc::new(CommandQueue::new("graphics", native.clone(), &config()).unwrap());

    let completed = Arc::new(Mutex::new(Vec::new()));
    let barrier = Arc::new(Barrier::new(THREADS as usize));

    let threads: Vec<_> = (0..THREADS)
        .map(|thread| {
            let queue = queue.clone();
            let completed = completed.clone();
            let barrier = barrier.clone();

            std::thread::spawn(move || {
                barrier.wait();

                for index in 0..SETS_PER_THREAD {
                    let id = thread * SETS_PER_THREAD + index;
                    let completed = completed.clone();
                    queue
                        .execute(
                            &tagged_set(&queue, id),
                            Some(Box::new(move |_: &CommandListSet| completed.lock().push(id))),
                        )
                        .unwrap();
                }
            })
        })
        .collect();

    for thread in threads {
        thread.join().unwrap();
    }

    queue.complete_execution(None).unwrap();
    assert_eq!(queue.executing_len(), 0);

    let submitted = submitted_ids(&native);
    assert_eq!(submitted.len() as u64, THREADS * SETS_PER_THREAD);
    assert_eq!(*completed.lock(), submitted);
}

#[test]
fn callback_may_execute_more_work() {
    let native = Arc::new(HeadlessQueue::new(FenceMode::Auto));
    let queue = Arc::new(CommandQueue::new("graphics", native.clone(), &config()).unwrap());

    let follow_up = tagged_set(&queue, 1);
    queue
        .execute(
            &tagged_set(&queue, 0),
            Some(Box::new({
                let queue = queue.clone();
                let follow_up = follow_up.clone();
                move |_: &CommandListSet| {
                    queue.execute(&follow_up, None).unwrap();
                }
            })),
        )
        .unwrap();

    for _ in 0..1000 {
        if follow_up.is_completed() {
            break;
        }

        std::thread::sleep(Duration::from_millis(1));
    }

    queue.complete_execution(None).unwrap();
    assert!(follow_up.is_completed());
    assert_eq!(submitted_ids(&native), [0, 1]);

    queue.shutdown().unwrap();
}

#[test]
fn tracking_fault_is_returned_once() {
    let native = Arc::new(HeadlessQueue::new(FenceMode::Manual));
    let queue = CommandQueue::new("graphics", native.clone(), &config()).unwrap();

    let first = tagged_set(&queue, 0);
    queue.execute(&first, None).unwrap();

    let fault = Error::Backend("device lost".to_owned());
    native.fail_next_wait(fault.clone());

    // The tracking thread observes the fault asynchronously. Sets executed before that are
    // still tracked normally.
    let mut probes = Vec::new();
    let mut res = Ok(());
    for id in 1..1000 {
        let probe = tagged_set(&queue, id);
        res = queue.execute(&probe, None);
        if res.is_err() {
            assert_eq!(probe.state(), ExecutionState::Pending);
            break;
        }

        probes.push(probe);
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(res, Err(fault));

    // The restarted thread keeps tracking the queue.
    let last = tagged_set(&queue, 1000);
    queue.execute(&last, None).unwrap();

    native.signal_all();
    queue.complete_execution(None).unwrap();

    assert!(first.is_completed());
    assert!(probes.iter().all(|probe| probe.is_completed()));
    assert!(last.is_completed());
    assert_eq!(queue.executing_len(), 0);

    queue.shutdown().unwrap();
}
