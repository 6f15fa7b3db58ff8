use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rhi_tracing::trace_span;

use crate::backend::{NativeQueue, QueueFamily};
use crate::config::QueueConfig;
use crate::query::TimestampQueryPool;
use crate::{Error, Result};

use super::{CommandList, CommandListSet, CompletedCallback};

/// A command queue tracking the execution of submitted [`CommandListSet`]s.
///
/// Every queue owns a thread that waits for submitted sets to complete on the GPU and
/// completes them strictly in submission order. A fault on that thread is returned by the next
/// call to [`execute`], after which the thread is restarted.
///
/// Completion callbacks are invoked on the tracking thread, or on the thread calling
/// [`complete_execution`]. They may call [`execute`], but must not call
/// [`complete_execution`] or [`shutdown`].
///
/// [`execute`]: Self::execute
/// [`complete_execution`]: Self::complete_execution
/// [`shutdown`]: Self::shutdown
#[derive(Debug)]
pub struct CommandQueue {
    name: String,
    native: Arc<dyn NativeQueue>,
    tracker: Arc<ExecutionTracker>,
    timestamps: Option<Arc<TimestampQueryPool>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    config: QueueConfig,
}

impl CommandQueue {
    pub fn new(name: &str, native: Arc<dyn NativeQueue>, config: &QueueConfig) -> Result<Self> {
        let timestamps = match native.timestamp_frequency() {
            Some(_) if config.timestamp_queries != 0 => Some(TimestampQueryPool::new(
                &*native,
                config.timestamp_queries,
            )?),
            _ => None,
        };

        let queue = Self {
            name: name.to_owned(),
            native,
            tracker: Arc::new(ExecutionTracker {
                executing: Mutex::new(VecDeque::new()),
                condvar: Condvar::new(),
                completing: Mutex::new(()),
                waiting: AtomicBool::new(true),
                fault: Mutex::new(None),
            }),
            timestamps,
            thread: Mutex::new(None),
            config: config.clone(),
        };

        *queue.thread.lock() = Some(queue.spawn_thread()?);
        Ok(queue)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn family(&self) -> QueueFamily {
        self.native.family()
    }

    #[inline]
    pub fn native(&self) -> &Arc<dyn NativeQueue> {
        &self.native
    }

    /// Returns the timestamp query pool of the queue, `None` if timestamps are disabled or not
    /// supported.
    #[inline]
    pub fn timestamp_query_pool(&self) -> Option<&Arc<TimestampQueryPool>> {
        self.timestamps.as_ref()
    }

    /// Returns the number of sets that are executing and not yet completed.
    pub fn executing_len(&self) -> usize {
        self.tracker.executing.lock().len()
    }

    pub fn create_command_list(&self, name: &str) -> Result<Arc<CommandList>> {
        let native = self.native.create_command_list()?;
        Ok(CommandList::new(name, self.family(), native))
    }

    /// Submits `set` for execution.
    ///
    /// `callback` is invoked once the GPU has completed the set. If the tracking thread failed
    /// since the last call its error is returned and `set` is not submitted.
    pub fn execute(
        &self,
        set: &Arc<CommandListSet>,
        callback: Option<CompletedCallback>,
    ) -> Result<()> {
        let _span = trace_span!("CommandQueue::execute").entered();

        if !self.tracker.waiting.load(Ordering::Acquire) {
            return Err(Error::QueueShutdown);
        }

        self.ensure_thread()?;

        {
            let mut executing = self.tracker.executing.lock();
            set.submit(&*self.native, callback)?;
            executing.push_back(set.clone());
        }

        self.tracker.condvar.notify_one();
        Ok(())
    }

    /// Blocks until all sets at the front of the queue that belong to `frame_index` have
    /// completed. If `frame_index` is `None` all executing sets are completed.
    pub fn complete_execution(&self, frame_index: Option<u32>) -> Result<()> {
        let _span = trace_span!("CommandQueue::complete_execution").entered();

        self.tracker.complete(frame_index)
    }

    /// Completes all executing sets and stops the tracking thread.
    ///
    /// Calling `shutdown` more than once has no effect.
    ///
    /// When called from a completion callback, for example by dropping the last handle to the
    /// queue, the tracking thread is only told to stop. Sets that are still executing at that
    /// point are not completed.
    pub fn shutdown(&self) -> Result<()> {
        if !self.tracker.waiting.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        if self.is_tracking_thread() {
            // The tracking thread holds the completion guard and can not join itself.
            self.thread.lock().take();
            tracing::debug!(
                "shut down command queue '{}' from its tracking thread with {} sets executing",
                self.name,
                self.executing_len()
            );
            return Ok(());
        }

        let res = self.tracker.complete(None);

        {
            let _executing = self.tracker.executing.lock();
            self.tracker.condvar.notify_all();
        }

        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("execution tracking thread of queue '{}' panicked", self.name);
            }
        }

        let fault = self.tracker.fault.lock().take();

        tracing::debug!("shut down command queue '{}'", self.name);

        res?;
        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn is_tracking_thread(&self) -> bool {
        let current = std::thread::current().id();
        self.thread
            .lock()
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == current)
    }

    /// Restarts the tracking thread if it has stopped, returning the fault that stopped it.
    fn ensure_thread(&self) -> Result<()> {
        let mut thread = self.thread.lock();
        if thread.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let mut fault = self.tracker.fault.lock().take();
        if let Some(handle) = thread.take() {
            if handle.join().is_err() && fault.is_none() {
                fault = Some(Error::Backend(
                    "execution tracking thread panicked".to_owned(),
                ));
            }
        }

        *thread = Some(self.spawn_thread()?);

        match fault {
            Some(err) => {
                tracing::warn!(
                    "restarted execution tracking thread of queue '{}' after: {}",
                    self.name,
                    err
                );
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn spawn_thread(&self) -> Result<JoinHandle<()>> {
        let worker = Worker {
            tracker: self.tracker.clone(),
            native: self.native.clone(),
            timestamps: self.timestamps.clone(),
            wait_interval: self.config.completion_wait_interval(),
            calibration_interval: self.config.calibration_interval(),
        };

        std::thread::Builder::new()
            .name(format!("rhi-queue-{}", self.name))
            .spawn(move || worker.run())
            .map_err(|err| Error::Backend(format!("failed to spawn queue thread: {}", err)))
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::error!("failed to shut down command queue '{}': {}", self.name, err);
        }
    }
}

#[derive(Debug)]
struct ExecutionTracker {
    executing: Mutex<VecDeque<Arc<CommandListSet>>>,
    condvar: Condvar,
    /// Held while a set is completed so that sets complete in order.
    completing: Mutex<()>,
    waiting: AtomicBool,
    fault: Mutex<Option<Error>>,
}

impl ExecutionTracker {
    /// Waits up to `interval` for work and completes all sets at the front of the queue that
    /// finish within `interval` each.
    fn wait_for_completions(&self, interval: Duration) -> Result<()> {
        {
            let mut executing = self.executing.lock();
            if executing.is_empty() && self.waiting.load(Ordering::Acquire) {
                self.condvar.wait_for(&mut executing, interval);
            }
        }

        loop {
            let _completing = self.completing.lock();

            let Some(set) = self.front() else {
                return Ok(());
            };

            if !set.wait(Some(interval))? {
                return Ok(());
            }

            self.pop_front(&set);
            set.complete();
        }
    }

    fn complete(&self, frame_index: Option<u32>) -> Result<()> {
        let _completing = self.completing.lock();

        loop {
            let Some(set) = self.front() else {
                return Ok(());
            };

            if frame_index.is_some() && set.frame_index() != frame_index {
                return Ok(());
            }

            set.wait(None)?;
            self.pop_front(&set);
            set.complete();
        }
    }

    fn front(&self) -> Option<Arc<CommandListSet>> {
        self.executing.lock().front().cloned()
    }

    fn pop_front(&self, set: &Arc<CommandListSet>) {
        let mut executing = self.executing.lock();
        if executing.front().is_some_and(|front| Arc::ptr_eq(front, set)) {
            executing.pop_front();
        }
    }
}

struct Worker {
    tracker: Arc<ExecutionTracker>,
    native: Arc<dyn NativeQueue>,
    timestamps: Option<Arc<TimestampQueryPool>>,
    wait_interval: Duration,
    calibration_interval: Duration,
}

impl Worker {
    fn run(self) {
        tracing::debug!("execution tracking thread started");

        let mut last_calibration = Instant::now();
        while self.tracker.waiting.load(Ordering::Acquire) {
            if let Err(err) = self.tracker.wait_for_completions(self.wait_interval) {
                self.fail(err);
                return;
            }

            let Some(timestamps) = &self.timestamps else {
                continue;
            };

            if last_calibration.elapsed() >= self.calibration_interval {
                let res = trace_span!("CommandQueue::calibrate")
                    .in_scope(|| timestamps.calibrate(&*self.native));
                if let Err(err) = res {
                    self.fail(err);
                    return;
                }

                last_calibration = Instant::now();
            }
        }

        tracing::debug!("execution tracking thread stopped");
    }

    fn fail(&self, err: Error) {
        tracing::error!("execution tracking failed: {}", err);
        *self.tracker.fault.lock() = Some(err);
    }
}
