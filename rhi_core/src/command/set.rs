use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{NativeQueue, SubmissionFence};
use crate::{Error, Result};

use super::CommandList;

/// Callback invoked once the execution of a [`CommandListSet`] has completed.
pub type CompletedCallback = Box<dyn FnOnce(&CommandListSet) + Send + 'static>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExecutionState {
    Pending,
    Executing,
    Completed,
}

impl ExecutionState {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::Pending,
            1 => Self::Executing,
            _ => Self::Completed,
        }
    }
}

/// A batch of command lists submitted together as one unit of GPU work.
pub struct CommandListSet {
    command_lists: Vec<Arc<CommandList>>,
    frame_index: Option<u32>,
    state: AtomicU8,
    fence: Mutex<Option<Arc<dyn SubmissionFence>>>,
    callback: Mutex<Option<CompletedCallback>>,
}

impl CommandListSet {
    /// Creates a new set from `command_lists`.
    ///
    /// `frame_index` is the frame in flight the work belongs to, if any.
    pub fn new(command_lists: Vec<Arc<CommandList>>, frame_index: Option<u32>) -> Result<Arc<Self>> {
        if command_lists.is_empty() {
            return Err(Error::EmptyCommandListSet);
        }

        Ok(Arc::new(Self {
            command_lists,
            frame_index,
            state: AtomicU8::new(ExecutionState::Pending as u8),
            fence: Mutex::new(None),
            callback: Mutex::new(None),
        }))
    }

    #[inline]
    pub fn command_lists(&self) -> &[Arc<CommandList>] {
        &self.command_lists
    }

    #[inline]
    pub fn frame_index(&self) -> Option<u32> {
        self.frame_index
    }

    pub fn state(&self) -> ExecutionState {
        ExecutionState::from_bits(self.state.load(Ordering::Acquire))
    }

    pub fn is_completed(&self) -> bool {
        self.state() == ExecutionState::Completed
    }

    /// Submits all command lists to `queue` and moves the set into the executing state.
    ///
    /// A set can be executed again once its previous execution has completed.
    pub(crate) fn submit(
        &self,
        queue: &dyn NativeQueue,
        callback: Option<CompletedCallback>,
    ) -> Result<()> {
        let state = self.state();
        if state == ExecutionState::Executing {
            return Err(Error::CommandListSetExecuting);
        }

        for (index, command_list) in self.command_lists.iter().enumerate() {
            if let Err(err) = command_list.begin_execution() {
                for command_list in &self.command_lists[..index] {
                    command_list.abort_execution();
                }

                return Err(err);
            }
        }

        let fence = {
            let guards: Vec<_> = self
                .command_lists
                .iter()
                .map(|command_list| command_list.lock_native())
                .collect();
            let natives: Vec<_> = guards.iter().map(|guard| guard.native()).collect();
            queue.submit(&natives)
        };

        let fence = match fence {
            Ok(fence) => fence,
            Err(err) => {
                for command_list in &self.command_lists {
                    command_list.abort_execution();
                }

                return Err(err);
            }
        };

        *self.fence.lock() = Some(Arc::from(fence));
        *self.callback.lock() = callback;

        if self
            .state
            .compare_exchange(
                state as u8,
                ExecutionState::Executing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(Error::CommandListSetExecuting);
        }

        Ok(())
    }

    /// Blocks until the GPU has completed the set or the `timeout` has elapsed.
    ///
    /// Returns `true` if the set has completed.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        let fence = self.fence.lock().clone();
        match fence {
            Some(fence) => fence.wait(timeout),
            None => Ok(self.state() != ExecutionState::Executing),
        }
    }

    /// Marks the set as completed, completing all command lists and invoking the callback.
    ///
    /// Only the first call after a submission has any effect.
    pub(crate) fn complete(&self) {
        if self
            .state
            .compare_exchange(
                ExecutionState::Executing as u8,
                ExecutionState::Completed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        self.fence.lock().take();

        for command_list in &self.command_lists {
            command_list.complete_execution();
        }

        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            callback(self);
        }
    }
}

impl Debug for CommandListSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandListSet")
            .field("command_lists", &self.command_lists)
            .field("frame_index", &self.frame_index)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
