use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use parking_lot::Mutex;
use rhi_tracing::trace_span;

use crate::backend::{NativeCommandList, QueueFamily, RootParameterValue};
use crate::resource::{Resource, ResourceBarriers};
use crate::{Error, Result};

/// Callback invoked once the execution of a [`CommandList`] has completed.
pub type CommandListCallback = Box<dyn FnOnce(&CommandList) + Send + 'static>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CommandListState {
    /// The command list is recording commands.
    Pending,
    /// Recording is finished and the command list is ready for execution.
    Committed,
    /// The command list was submitted and is executing on the GPU.
    Executing,
}

/// A command list created by a [`CommandQueue`].
///
/// A command list goes through `Pending -> Committed -> Executing -> Pending`. Resources
/// retained while recording are kept alive until execution completes and are released exactly
/// once.
///
/// [`CommandQueue`]: super::CommandQueue
pub struct CommandList {
    name: String,
    queue_family: QueueFamily,
    inner: Mutex<Inner>,
}

struct Inner {
    native: Box<dyn NativeCommandList>,
    state: CommandListState,
    retained: Vec<Arc<Resource>>,
    callback: Option<CommandListCallback>,
}

impl CommandList {
    pub(crate) fn new(
        name: &str,
        queue_family: QueueFamily,
        native: Box<dyn NativeCommandList>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            queue_family,
            inner: Mutex::new(Inner {
                native,
                state: CommandListState::Pending,
                retained: Vec::new(),
                callback: None,
            }),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn queue_family(&self) -> QueueFamily {
        self.queue_family
    }

    pub fn state(&self) -> CommandListState {
        self.inner.lock().state
    }

    /// Sets the callback invoked once the next execution of this command list completes.
    pub fn set_completed_callback(&self, callback: CommandListCallback) {
        self.inner.lock().callback = Some(callback);
    }

    /// Records commands on the native command list.
    ///
    /// Returns an error if the command list is not recording.
    pub fn record<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn NativeCommandList) -> T,
    {
        let mut inner = self.inner.lock();
        inner.expect_state(CommandListState::Pending)?;
        Ok(f(&mut *inner.native))
    }

    /// Provides read access to the native command list.
    pub fn native<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&dyn NativeCommandList) -> T,
    {
        f(&*self.inner.lock().native)
    }

    /// Emits all `barriers` and applies their transitions to the tracked resources.
    pub fn set_resource_barriers(&self, barriers: &ResourceBarriers) -> Result<()> {
        let _span = trace_span!("CommandList::set_resource_barriers").entered();

        let mut inner = self.inner.lock();
        inner.expect_state(CommandListState::Pending)?;

        let set = barriers.lock();
        if set.is_empty() {
            return Ok(());
        }

        let barriers: Vec<_> = set.iter().cloned().collect();
        inner.native.resource_barriers(&barriers);
        set.apply_transitions();

        Ok(())
    }

    pub fn set_root_parameter(&self, index: u32, value: &RootParameterValue) -> Result<()> {
        self.record(|native| native.set_root_parameter(index, value))
    }

    /// Keeps `resource` alive until the execution of this command list has completed.
    pub fn retain_resource(&self, resource: Arc<Resource>) {
        self.inner.lock().retained.push(resource);
    }

    pub fn retain_resources<I>(&self, resources: I)
    where
        I: IntoIterator<Item = Arc<Resource>>,
    {
        self.inner.lock().retained.extend(resources);
    }

    /// Returns the number of resources currently retained by this command list.
    pub fn retained_len(&self) -> usize {
        self.inner.lock().retained.len()
    }

    /// Finishes recording of the command list.
    pub fn commit(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.expect_state(CommandListState::Pending)?;

        inner.native.close()?;
        inner.state = CommandListState::Committed;
        Ok(())
    }

    /// Discards all recorded commands and retained resources.
    ///
    /// Returns an error if the command list is executing.
    pub fn reset(&self) -> Result<()> {
        let retained = {
            let mut inner = self.inner.lock();
            if inner.state == CommandListState::Executing {
                return Err(Error::InvalidCommandListState {
                    expected: CommandListState::Pending,
                    actual: CommandListState::Executing,
                });
            }

            inner.native.reset()?;
            inner.state = CommandListState::Pending;
            std::mem::take(&mut inner.retained)
        };

        drop(retained);
        Ok(())
    }

    pub(crate) fn begin_execution(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.expect_state(CommandListState::Committed)?;
        inner.state = CommandListState::Executing;
        Ok(())
    }

    /// Reverts a [`begin_execution`] of a submission that failed.
    ///
    /// [`begin_execution`]: Self::begin_execution
    pub(crate) fn abort_execution(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CommandListState::Executing {
            inner.state = CommandListState::Committed;
        }
    }

    pub(crate) fn lock_native(&self) -> NativeGuard<'_> {
        NativeGuard {
            inner: self.inner.lock(),
        }
    }

    /// Marks the execution as completed, releasing retained resources and invoking the
    /// completion callback.
    ///
    /// Does nothing if the command list is not executing.
    pub(crate) fn complete_execution(&self) {
        let (retained, callback) = {
            let mut inner = self.inner.lock();
            if inner.state != CommandListState::Executing {
                return;
            }

            if let Err(err) = inner.native.reset() {
                tracing::error!(
                    "failed to reset command list '{}' after execution: {}",
                    self.name,
                    err
                );
            }

            inner.state = CommandListState::Pending;
            (std::mem::take(&mut inner.retained), inner.callback.take())
        };

        drop(retained);

        if let Some(callback) = callback {
            callback(self);
        }
    }
}

impl Debug for CommandList {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CommandList")
            .field("name", &self.name)
            .field("queue_family", &self.queue_family)
            .field("state", &inner.state)
            .field("retained", &inner.retained.len())
            .finish_non_exhaustive()
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state == CommandListState::Executing {
            tracing::warn!(
                "command list '{}' dropped while executing with {} retained resources",
                self.name,
                inner.retained.len()
            );
        }
    }
}

impl Inner {
    fn expect_state(&self, expected: CommandListState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidCommandListState {
                expected,
                actual: self.state,
            });
        }

        Ok(())
    }
}

/// Locked access to the native command list for submission.
pub(crate) struct NativeGuard<'a> {
    inner: parking_lot::MutexGuard<'a, Inner>,
}

impl NativeGuard<'_> {
    pub(crate) fn native(&self) -> &dyn NativeCommandList {
        &*self.inner.native
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use crate::backend::headless::{FenceMode, HeadlessCommandList, HeadlessQueue, RecordedCommand};
    use crate::backend::NativeQueue;
    use crate::resource::{Resource, ResourceBarriers, ResourceDescriptor, ResourceState};
    use crate::Error;

    use super::{CommandList, CommandListState};

    fn command_list() -> Arc<CommandList> {
        let queue = HeadlessQueue::new(FenceMode::Auto);
        CommandList::new(
            "test",
            queue.family(),
            queue.create_command_list().unwrap(),
        )
    }

    fn commands(list: &CommandList) -> Vec<RecordedCommand> {
        list.native(|native| {
            native
                .as_any()
                .downcast_ref::<HeadlessCommandList>()
                .unwrap()
                .commands()
                .to_vec()
        })
    }

    #[test]
    fn command_list_state_machine() {
        let list = command_list();
        assert_eq!(list.state(), CommandListState::Pending);

        assert_eq!(
            list.begin_execution(),
            Err(Error::InvalidCommandListState {
                expected: CommandListState::Committed,
                actual: CommandListState::Pending,
            })
        );

        list.commit().unwrap();
        assert!(list.commit().is_err());
        list.begin_execution().unwrap();
        assert_eq!(list.state(), CommandListState::Executing);
        assert!(list.reset().is_err());

        list.complete_execution();
        assert_eq!(list.state(), CommandListState::Pending);
    }

    #[test]
    fn command_list_releases_resources_once() {
        let list = command_list();
        let buffer = Resource::new(ResourceDescriptor::buffer("buffer", 16, 0));
        list.retain_resource(buffer.clone());
        assert_eq!(Arc::strong_count(&buffer), 2);

        let called = Arc::new(AtomicBool::new(false));
        list.set_completed_callback(Box::new({
            let called = called.clone();
            move |_: &CommandList| {
                assert!(!called.swap(true, Ordering::SeqCst));
            }
        }));

        list.commit().unwrap();
        list.begin_execution().unwrap();
        list.complete_execution();
        list.complete_execution();

        assert!(called.load(Ordering::SeqCst));
        assert_eq!(Arc::strong_count(&buffer), 1);
        assert_eq!(list.retained_len(), 0);
    }

    #[test]
    fn command_list_emits_and_applies_barriers() {
        let list = command_list();
        let buffer = Resource::new(ResourceDescriptor::buffer("buffer", 16, 0));
        buffer.set_state(ResourceState::CopyDest);

        let barriers = ResourceBarriers::create_transitions(
            &[buffer.clone()],
            Some(ResourceState::ShaderResource),
            None,
        );
        list.set_resource_barriers(&barriers).unwrap();

        assert_eq!(buffer.state(), ResourceState::ShaderResource);
        assert_eq!(
            commands(&list),
            barriers
                .barriers()
                .into_iter()
                .map(RecordedCommand::Barrier)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn command_list_record_after_commit() {
        let list = command_list();
        list.commit().unwrap();
        assert!(list.record(|_| ()).is_err());

        list.reset().unwrap();
        assert!(list.record(|_| ()).is_ok());
    }
}
