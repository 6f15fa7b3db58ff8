//! The seam between the core and a native graphics API.
//!
//! A backend adapter implements the traits in this module on top of DirectX, Vulkan or Metal.
//! [`headless`] provides a CPU emulation used by tests and tooling.

pub mod headless;

use std::any::Any;
use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::descriptor::DescriptorHeapType;
use crate::program::NativeBindingType;
use crate::query::QueryKind;
use crate::resource::ResourceBarrier;
use crate::Result;

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct QueueCapabilities: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueueFamily {
    pub id: u32,
    pub capabilities: QueueCapabilities,
}

/// A pair of timestamps sampled at the same point in time on the GPU and CPU.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CalibratedTimestamps {
    pub gpu_ticks: u64,
    pub cpu_nanos: u64,
}

/// The value bound to a single root parameter.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RootParameterValue {
    /// A descriptor table starting at `offset` in the shader-visible heap of `heap_type`.
    DescriptorTable {
        heap_type: DescriptorHeapType,
        offset: u32,
    },
    /// Data embedded directly in the command stream.
    Constants(SmallVec<[u8; 16]>),
    /// A resource view bound by its GPU address without a descriptor.
    View {
        binding_type: NativeBindingType,
        gpu_address: u64,
    },
}

pub trait NativeQueue: Debug + Send + Sync + 'static {
    fn family(&self) -> QueueFamily;

    fn create_command_list(&self) -> Result<Box<dyn NativeCommandList>>;

    /// Submits the closed `command_lists` for execution in the given order.
    ///
    /// The returned fence is signaled once all command lists have completed execution.
    fn submit(&self, command_lists: &[&dyn NativeCommandList]) -> Result<Box<dyn SubmissionFence>>;

    /// Returns the number of GPU timestamp ticks per second, `None` if the queue does not
    /// support timestamp queries.
    fn timestamp_frequency(&self) -> Option<u64>;

    fn calibrated_timestamps(&self) -> Result<CalibratedTimestamps>;

    fn create_query_heap(
        &self,
        kind: QueryKind,
        slots: u32,
        data_size: u64,
    ) -> Result<Arc<dyn NativeQueryHeap>>;
}

pub trait SubmissionFence: Debug + Send + Sync + 'static {
    /// Blocks until the submission has completed or the `timeout` has elapsed.
    ///
    /// Returns `true` if the submission has completed. A `timeout` of `None` waits forever.
    fn wait(&self, timeout: Option<Duration>) -> Result<bool>;
}

pub trait NativeCommandList: Debug + Send + 'static {
    /// Discards all recorded commands and reopens the command list for recording.
    fn reset(&mut self) -> Result<()>;

    /// Closes the command list. No commands can be recorded until it is [`reset`].
    ///
    /// [`reset`]: Self::reset
    fn close(&mut self) -> Result<()>;

    fn resource_barriers(&mut self, barriers: &[ResourceBarrier]);

    fn set_root_parameter(&mut self, index: u32, value: &RootParameterValue);

    fn as_any(&self) -> &dyn Any;
}

/// Native storage of query results.
pub trait NativeQueryHeap: Debug + Send + Sync + 'static {
    fn begin_query(&self, command_list: &mut dyn NativeCommandList, slot: u32);

    fn end_query(&self, command_list: &mut dyn NativeCommandList, slot: u32);

    /// Copies the results of `slots` into the result buffer at `data`.
    fn resolve(&self, command_list: &mut dyn NativeCommandList, slots: Range<u32>, data: Range<u64>);

    fn read_results(&self, data: Range<u64>) -> Result<Vec<u8>>;
}
