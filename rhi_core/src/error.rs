use std::ops::Range;

use thiserror::Error;

use crate::command::CommandListState;
use crate::descriptor::DescriptorHeapType;
use crate::program::ProgramArgument;
use crate::query::{QueryKind, QueryState};
use crate::subresource::{SubResourceCount, SubResourceIndex};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by the RHI core.
///
/// `Error` is `Clone` so that a fault captured on a queue worker thread can be stored and
/// returned to the next caller of [`CommandQueue::execute`].
///
/// [`CommandQueue::execute`]: crate::command::CommandQueue::execute
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("subresource index {index} is out of range of count {count}")]
    SubResourceOutOfRange {
        index: SubResourceIndex,
        count: SubResourceCount,
    },
    #[error("raw subresource index {raw} is out of range of count {count}")]
    RawSubResourceOutOfRange { raw: u32, count: SubResourceCount },

    #[error("descriptor heap {heap_type:?} has no free range of {requested} descriptors")]
    DescriptorHeapExhausted {
        heap_type: DescriptorHeapType,
        requested: u32,
    },
    #[error("descriptor range {range:?} is out of bounds of {heap_type:?} heap with {size} descriptors")]
    DescriptorRangeOutOfBounds {
        heap_type: DescriptorHeapType,
        range: Range<u32>,
        size: u32,
    },
    #[error("descriptor heap {0:?} is not shader visible")]
    HeapNotShaderVisible(DescriptorHeapType),

    #[error("{kind:?} query pool has no space available (maximum of {max_queries} queries reached)")]
    QueryPoolExhausted { kind: QueryKind, max_queries: u32 },
    #[error("{kind:?} query pool of {max_queries} queries exceeds the addressable query space")]
    QueryPoolTooLarge { kind: QueryKind, max_queries: u32 },
    #[error("query is in {actual:?} state, but {expected:?} state is required")]
    InvalidQueryState {
        expected: QueryState,
        actual: QueryState,
    },
    #[error("timestamp queries can not be begun, only ended")]
    TimestampQueryBegin,
    #[error("query range {0:?} is already released")]
    QueryRangeReleased(Range<u64>),

    #[error("command list is in {actual:?} state, but {expected:?} state is required")]
    InvalidCommandListState {
        expected: CommandListState,
        actual: CommandListState,
    },
    #[error("command list set is already executing")]
    CommandListSetExecuting,
    #[error("command list set is empty")]
    EmptyCommandListSet,

    #[error("program argument {0} is declared more than once")]
    DuplicateArgument(ProgramArgument),
    #[error("program argument {0} is not declared by the program")]
    UnknownArgument(ProgramArgument),
    #[error("no resource views are bound to program argument {0}")]
    MissingArgumentBinding(ProgramArgument),
    #[error("constant program argument {0} can not be modified")]
    ConstantArgumentModified(ProgramArgument),
    #[error("program argument {argument} expects {expected} resources, but {actual} were given")]
    ResourceCountMismatch {
        argument: ProgramArgument,
        expected: u32,
        actual: u32,
    },
    #[error("program argument {argument} expects {expected} bytes of root constants, but {actual} were given")]
    RootConstantSizeMismatch {
        argument: ProgramArgument,
        expected: u32,
        actual: u32,
    },
    #[error("unexpected native binding type {0}")]
    UnexpectedBindingType(u32),
    #[error("frame index {index} is out of range of {count} frames in flight")]
    FrameIndexOutOfRange { index: u32, count: u32 },

    #[error("backend error: {0}")]
    Backend(String),
    #[error("command queue is shut down")]
    QueueShutdown,
}
