//! A backend that executes nothing.
//!
//! Command lists only record the commands issued on them and queues complete their submissions
//! either immediately or when told to. Timestamps are taken from the monotonic CPU clock.

use std::any::Any;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::query::QueryKind;
use crate::resource::ResourceBarrier;
use crate::{Error, Result};

use super::{
    CalibratedTimestamps, NativeCommandList, NativeQueryHeap, NativeQueue, QueueCapabilities,
    QueueFamily, RootParameterValue, SubmissionFence,
};

/// Offset of the emulated GPU clock relative to the CPU clock.
pub const GPU_CLOCK_OFFSET: u64 = 1_000_000;

/// Size in bytes of a single resolved query result.
const RESULT_SIZE: usize = 8;

/// Ticks per second of the emulated GPU clock.
pub const TIMESTAMP_FREQUENCY: u64 = 1_000_000_000;

/// A command recorded by a [`HeadlessCommandList`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedCommand {
    Barrier(ResourceBarrier),
    SetRootParameter {
        index: u32,
        value: RootParameterValue,
    },
}

#[derive(Debug, Default)]
pub struct HeadlessCommandList {
    commands: Vec<RecordedCommand>,
    closed: bool,
}

impl HeadlessCommandList {
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl NativeCommandList for HeadlessCommandList {
    fn reset(&mut self) -> Result<()> {
        self.commands.clear();
        self.closed = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Backend("command list is already closed".to_owned()));
        }

        self.closed = true;
        Ok(())
    }

    fn resource_barriers(&mut self, barriers: &[ResourceBarrier]) {
        self.commands
            .extend(barriers.iter().cloned().map(RecordedCommand::Barrier));
    }

    fn set_root_parameter(&mut self, index: u32, value: &RootParameterValue) {
        self.commands.push(RecordedCommand::SetRootParameter {
            index,
            value: value.clone(),
        });
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// When submissions of a [`HeadlessQueue`] complete.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FenceMode {
    /// Every submission completes immediately.
    Auto,
    /// Submissions complete in order on [`HeadlessQueue::signal_next`] or
    /// [`HeadlessQueue::signal_all`].
    Manual,
}

#[derive(Debug)]
pub struct HeadlessQueue {
    family: QueueFamily,
    mode: FenceMode,
    timeline: Arc<Timeline>,
    clock: GpuClock,
    submissions: Mutex<Vec<Vec<RecordedCommand>>>,
}

impl HeadlessQueue {
    /// Creates a new graphics queue of family `0`.
    pub fn new(mode: FenceMode) -> Self {
        Self::with_family(
            QueueFamily {
                id: 0,
                capabilities: QueueCapabilities::GRAPHICS
                    | QueueCapabilities::COMPUTE
                    | QueueCapabilities::TRANSFER,
            },
            mode,
        )
    }

    pub fn with_family(family: QueueFamily, mode: FenceMode) -> Self {
        Self {
            family,
            mode,
            timeline: Arc::new(Timeline::default()),
            clock: GpuClock::new(),
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Returns the number of submissions that have not completed yet.
    pub fn pending(&self) -> u64 {
        let state = self.timeline.state.lock();
        state.submitted - state.completed
    }

    /// Completes the oldest pending submission. Returns `false` if no submission is pending.
    pub fn signal_next(&self) -> bool {
        let mut state = self.timeline.state.lock();
        if state.completed == state.submitted {
            return false;
        }

        state.completed += 1;
        self.timeline.condvar.notify_all();
        true
    }

    /// Completes all pending submissions.
    pub fn signal_all(&self) {
        let mut state = self.timeline.state.lock();
        state.completed = state.submitted;
        self.timeline.condvar.notify_all();
    }

    /// Makes the next fence wait on this queue fail with `error`.
    pub fn fail_next_wait(&self, error: Error) {
        let mut state = self.timeline.state.lock();
        state.fault = Some(error);
        self.timeline.condvar.notify_all();
    }

    /// Returns the commands of every submission in submission order.
    pub fn submissions(&self) -> Vec<Vec<RecordedCommand>> {
        self.submissions.lock().clone()
    }
}

impl NativeQueue for HeadlessQueue {
    fn family(&self) -> QueueFamily {
        self.family
    }

    fn create_command_list(&self) -> Result<Box<dyn NativeCommandList>> {
        Ok(Box::new(HeadlessCommandList::default()))
    }

    fn submit(&self, command_lists: &[&dyn NativeCommandList]) -> Result<Box<dyn SubmissionFence>> {
        let mut commands = Vec::new();
        for command_list in command_lists {
            let Some(command_list) = command_list.as_any().downcast_ref::<HeadlessCommandList>()
            else {
                return Err(Error::Backend(
                    "command list was not created by a headless queue".to_owned(),
                ));
            };

            if !command_list.is_closed() {
                return Err(Error::Backend(
                    "submitted command list is not closed".to_owned(),
                ));
            }

            commands.extend_from_slice(command_list.commands());
        }

        // Keep the recorded order equal to the timeline order.
        let mut submissions = self.submissions.lock();
        submissions.push(commands);

        let mut state = self.timeline.state.lock();
        state.submitted += 1;
        let value = state.submitted;
        if self.mode == FenceMode::Auto {
            state.completed = state.submitted;
            self.timeline.condvar.notify_all();
        }

        Ok(Box::new(HeadlessFence {
            timeline: self.timeline.clone(),
            value,
        }))
    }

    fn timestamp_frequency(&self) -> Option<u64> {
        Some(TIMESTAMP_FREQUENCY)
    }

    fn calibrated_timestamps(&self) -> Result<CalibratedTimestamps> {
        let cpu_nanos = self.clock.cpu_nanos();
        Ok(CalibratedTimestamps {
            gpu_ticks: cpu_nanos + GPU_CLOCK_OFFSET,
            cpu_nanos,
        })
    }

    fn create_query_heap(
        &self,
        kind: QueryKind,
        slots: u32,
        data_size: u64,
    ) -> Result<Arc<dyn NativeQueryHeap>> {
        Ok(Arc::new(HeadlessQueryHeap {
            kind,
            clock: self.clock,
            slots: Mutex::new(vec![0; slots as usize]),
            data: Mutex::new(vec![0; data_size as usize]),
        }))
    }
}

#[derive(Debug, Default)]
struct Timeline {
    state: Mutex<TimelineState>,
    condvar: Condvar,
}

#[derive(Debug, Default)]
struct TimelineState {
    submitted: u64,
    completed: u64,
    fault: Option<Error>,
}

#[derive(Debug)]
pub struct HeadlessFence {
    timeline: Arc<Timeline>,
    value: u64,
}

impl SubmissionFence for HeadlessFence {
    fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        let mut state = self.timeline.state.lock();
        loop {
            if let Some(err) = state.fault.take() {
                return Err(err);
            }

            if state.completed >= self.value {
                return Ok(true);
            }

            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Ok(false);
                    }

                    self.timeline.condvar.wait_until(&mut state, deadline);
                }
                None => self.timeline.condvar.wait(&mut state),
            }
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct GpuClock {
    epoch: Instant,
}

impl GpuClock {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    fn cpu_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn gpu_ticks(&self) -> u64 {
        self.cpu_nanos() + GPU_CLOCK_OFFSET
    }
}

/// Query heap that writes its results at the time the query commands are recorded.
#[derive(Debug)]
pub struct HeadlessQueryHeap {
    kind: QueryKind,
    clock: GpuClock,
    slots: Mutex<Vec<u64>>,
    data: Mutex<Vec<u8>>,
}

impl NativeQueryHeap for HeadlessQueryHeap {
    fn begin_query(&self, _command_list: &mut dyn NativeCommandList, slot: u32) {
        if let Some(value) = self.slots.lock().get_mut(slot as usize) {
            *value = 0;
        }
    }

    fn end_query(&self, _command_list: &mut dyn NativeCommandList, slot: u32) {
        let mut slots = self.slots.lock();
        let Some(value) = slots.get_mut(slot as usize) else {
            tracing::warn!("query slot {} is out of bounds", slot);
            return;
        };

        *value = match self.kind {
            QueryKind::Timestamp => self.clock.gpu_ticks(),
            QueryKind::Occlusion => 0,
        };
    }

    fn resolve(&self, _command_list: &mut dyn NativeCommandList, slots: Range<u32>, data: Range<u64>) {
        let values = self.slots.lock();
        let mut bytes = self.data.lock();

        for (index, slot) in slots.enumerate() {
            let offset = data.start as usize + index * RESULT_SIZE;
            let (Some(value), Some(dst)) = (
                values.get(slot as usize),
                bytes.get_mut(offset..offset + RESULT_SIZE),
            ) else {
                tracing::warn!("query resolve of slot {} is out of bounds", slot);
                continue;
            };

            dst.copy_from_slice(&value.to_le_bytes());
        }
    }

    fn read_results(&self, data: Range<u64>) -> Result<Vec<u8>> {
        self.data
            .lock()
            .get(data.start as usize..data.end as usize)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::Backend(format!("query data range {:?} is out of bounds", data)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::backend::NativeQueue;
    use crate::Error;

    use super::{FenceMode, HeadlessQueue};

    fn submit(queue: &HeadlessQueue) -> Box<dyn crate::backend::SubmissionFence> {
        let mut list = queue.create_command_list().unwrap();
        list.close().unwrap();
        queue.submit(&[&*list]).unwrap()
    }

    #[test]
    fn manual_fences_complete_in_order() {
        let queue = HeadlessQueue::new(FenceMode::Manual);
        let a = submit(&queue);
        let b = submit(&queue);
        assert_eq!(queue.pending(), 2);

        assert!(!a.wait(Some(Duration::from_millis(1))).unwrap());
        assert!(queue.signal_next());
        assert!(a.wait(Some(Duration::ZERO)).unwrap());
        assert!(!b.wait(Some(Duration::ZERO)).unwrap());

        queue.signal_all();
        assert!(b.wait(None).unwrap());
        assert!(!queue.signal_next());
    }

    #[test]
    fn auto_fences_complete_on_submit() {
        let queue = HeadlessQueue::new(FenceMode::Auto);
        let fence = submit(&queue);
        assert!(fence.wait(Some(Duration::ZERO)).unwrap());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn injected_fault_fails_once() {
        let queue = HeadlessQueue::new(FenceMode::Auto);
        let fence = submit(&queue);

        queue.fail_next_wait(Error::Backend("device lost".to_owned()));
        assert_eq!(
            fence.wait(None),
            Err(Error::Backend("device lost".to_owned()))
        );
        assert!(fence.wait(None).unwrap());
    }

    #[test]
    fn submit_open_command_list() {
        let queue = HeadlessQueue::new(FenceMode::Auto);
        let list = queue.create_command_list().unwrap();
        assert!(queue.submit(&[&*list]).is_err());
    }
}
