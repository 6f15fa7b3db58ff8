//! GPU queries and their pools.

mod timestamp;

use std::fmt::{self, Debug, Formatter};
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use rhi_tracing::trace_span;

use crate::backend::{NativeQueryHeap, NativeQueue};
use crate::command::CommandList;
use crate::range_set::RangeSet;
use crate::{Error, Result};

pub use timestamp::{TimestampQuery, TimestampQueryPool};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Timestamp,
    Occlusion,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueryState {
    /// The query has no pending results. This is the initial state.
    Resolved,
    Begun,
    Ended,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryPoolDescriptor {
    pub kind: QueryKind,
    pub max_queries: u32,
    /// Number of native query slots used by a single query.
    pub slots_per_query: u32,
    /// Size in bytes of the resolved result of a single query.
    pub data_size_per_query: u64,
}

impl QueryPoolDescriptor {
    pub const fn timestamp(max_queries: u32) -> Self {
        Self {
            kind: QueryKind::Timestamp,
            max_queries,
            slots_per_query: 1,
            data_size_per_query: 8,
        }
    }

    pub const fn occlusion(max_queries: u32) -> Self {
        Self {
            kind: QueryKind::Occlusion,
            max_queries,
            slots_per_query: 1,
            data_size_per_query: 8,
        }
    }
}

/// A pool of queries of the same kind sharing a native query heap.
pub struct QueryPool {
    descriptor: QueryPoolDescriptor,
    heap: Arc<dyn NativeQueryHeap>,
    free: Mutex<FreeRanges>,
}

#[derive(Debug)]
struct FreeRanges {
    slots: RangeSet<u32>,
    data: RangeSet<u64>,
}

impl QueryPool {
    pub fn new(queue: &dyn NativeQueue, descriptor: QueryPoolDescriptor) -> Result<Arc<Self>> {
        let too_large = Error::QueryPoolTooLarge {
            kind: descriptor.kind,
            max_queries: descriptor.max_queries,
        };
        let slots = descriptor
            .max_queries
            .checked_mul(descriptor.slots_per_query)
            .ok_or_else(|| too_large.clone())?;
        let data_size = u64::from(descriptor.max_queries)
            .checked_mul(descriptor.data_size_per_query)
            .ok_or(too_large)?;
        let heap = queue.create_query_heap(descriptor.kind, slots, data_size)?;

        Ok(Arc::new(Self {
            descriptor,
            heap,
            free: Mutex::new(FreeRanges {
                slots: RangeSet::from_range(0..slots),
                data: RangeSet::from_range(0..data_size),
            }),
        }))
    }

    #[inline]
    pub fn kind(&self) -> QueryKind {
        self.descriptor.kind
    }

    #[inline]
    pub fn max_queries(&self) -> u32 {
        self.descriptor.max_queries
    }

    #[inline]
    pub fn descriptor(&self) -> QueryPoolDescriptor {
        self.descriptor
    }

    /// Returns the number of queries that can still be created.
    pub fn available(&self) -> u32 {
        let free = self.free.lock();
        let by_slots = free.slots.total_len() / self.descriptor.slots_per_query.max(1);
        let by_data = free.data.total_len() / self.descriptor.data_size_per_query.max(1);
        by_slots.min(by_data as u32)
    }

    /// Creates a new query in the [`Resolved`] state.
    ///
    /// Returns [`QueryPoolExhausted`] if the pool has no space for another query.
    ///
    /// [`Resolved`]: QueryState::Resolved
    /// [`QueryPoolExhausted`]: Error::QueryPoolExhausted
    pub fn create_query(self: &Arc<Self>) -> Result<Query> {
        let _span = trace_span!("QueryPool::create_query").entered();

        let (slots, data) = self.reserve()?;
        Ok(Query {
            pool: self.clone(),
            slots,
            data,
            state: QueryState::Resolved,
        })
    }

    fn reserve(&self) -> Result<(Range<u32>, Range<u64>)> {
        let exhausted = Error::QueryPoolExhausted {
            kind: self.descriptor.kind,
            max_queries: self.descriptor.max_queries,
        };

        let mut free = self.free.lock();
        let slots = free
            .slots
            .reserve(self.descriptor.slots_per_query)
            .ok_or_else(|| exhausted.clone())?;

        let Some(data) = free.data.reserve(self.descriptor.data_size_per_query) else {
            free.slots.release(slots);
            return Err(exhausted);
        };

        Ok((slots, data))
    }

    fn release(&self, slots: Range<u32>, data: Range<u64>) -> Result<()> {
        let mut free = self.free.lock();
        if !free.data.release(data.clone()) {
            return Err(Error::QueryRangeReleased(data));
        }

        if !free.slots.release(slots) {
            return Err(Error::QueryRangeReleased(data));
        }

        Ok(())
    }
}

impl Debug for QueryPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPool")
            .field("descriptor", &self.descriptor)
            .field("free", &*self.free.lock())
            .finish_non_exhaustive()
    }
}

/// A single query allocated from a [`QueryPool`].
///
/// The query space is returned to the pool when the query is dropped.
#[derive(Debug)]
pub struct Query {
    pool: Arc<QueryPool>,
    slots: Range<u32>,
    data: Range<u64>,
    state: QueryState,
}

impl Query {
    #[inline]
    pub fn pool(&self) -> &Arc<QueryPool> {
        &self.pool
    }

    #[inline]
    pub fn state(&self) -> QueryState {
        self.state
    }

    #[inline]
    pub fn slots(&self) -> Range<u32> {
        self.slots.clone()
    }

    #[inline]
    pub fn data_range(&self) -> Range<u64> {
        self.data.clone()
    }

    pub fn begin(&mut self, command_list: &CommandList) -> Result<()> {
        if self.pool.kind() == QueryKind::Timestamp {
            return Err(Error::TimestampQueryBegin);
        }

        self.expect_state(QueryState::Resolved)?;

        let heap = &self.pool.heap;
        let slot = self.slots.start;
        command_list.record(|native| heap.begin_query(native, slot))?;

        self.state = QueryState::Begun;
        Ok(())
    }

    /// Ends the query.
    ///
    /// Timestamp queries are ended without being begun.
    pub fn end(&mut self, command_list: &CommandList) -> Result<()> {
        if self.pool.kind() != QueryKind::Timestamp {
            self.expect_state(QueryState::Begun)?;
        }

        let heap = &self.pool.heap;
        let slot = self.slots.end - 1;
        command_list.record(|native| heap.end_query(native, slot))?;

        self.state = QueryState::Ended;
        Ok(())
    }

    /// Resolves the results of an ended query into the result buffer of the pool.
    pub fn resolve_data(&mut self, command_list: &CommandList) -> Result<()> {
        self.expect_state(QueryState::Ended)?;

        let heap = &self.pool.heap;
        let slots = self.slots.clone();
        let data = self.data.clone();
        command_list.record(|native| heap.resolve(native, slots, data))?;

        self.state = QueryState::Resolved;
        Ok(())
    }

    /// Reads the resolved result bytes of the query.
    ///
    /// The results are only valid once the command list resolving the query has completed.
    pub fn read_data(&self) -> Result<Vec<u8>> {
        self.expect_state(QueryState::Resolved)?;
        self.pool.heap.read_results(self.data.clone())
    }

    fn expect_state(&self, expected: QueryState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidQueryState {
                expected,
                actual: self.state,
            });
        }

        Ok(())
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        if let Err(err) = self.pool.release(self.slots.clone(), self.data.clone()) {
            tracing::error!("failed to release query: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::headless::{FenceMode, HeadlessQueue};
    use crate::backend::NativeQueue;
    use crate::command::CommandList;
    use crate::Error;

    use super::{QueryKind, QueryPool, QueryPoolDescriptor, QueryState};

    fn command_list(queue: &HeadlessQueue) -> std::sync::Arc<CommandList> {
        CommandList::new("queries", queue.family(), queue.create_command_list().unwrap())
    }

    #[test]
    fn query_pool_exhaustion() {
        let queue = HeadlessQueue::new(FenceMode::Auto);
        let pool = QueryPool::new(&queue, QueryPoolDescriptor::occlusion(4)).unwrap();

        let mut queries: Vec<_> = (0..4).map(|_| pool.create_query().unwrap()).collect();
        assert_eq!(pool.available(), 0);
        assert_eq!(
            pool.create_query().err(),
            Some(Error::QueryPoolExhausted {
                kind: QueryKind::Occlusion,
                max_queries: 4
            })
        );

        queries.pop();
        assert_eq!(pool.available(), 1);
        queries.push(pool.create_query().unwrap());
        assert!(pool.create_query().is_err());
    }

    #[test]
    fn query_pool_size_overflow() {
        let queue = HeadlessQueue::new(FenceMode::Auto);
        let res = QueryPool::new(
            &queue,
            QueryPoolDescriptor {
                kind: QueryKind::Occlusion,
                max_queries: u32::MAX,
                slots_per_query: 2,
                data_size_per_query: 8,
            },
        );

        assert_eq!(
            res.err(),
            Some(Error::QueryPoolTooLarge {
                kind: QueryKind::Occlusion,
                max_queries: u32::MAX
            })
        );
    }

    #[test]
    fn query_pool_slots_per_query() {
        let queue = HeadlessQueue::new(FenceMode::Auto);
        let pool = QueryPool::new(
            &queue,
            QueryPoolDescriptor {
                kind: QueryKind::Occlusion,
                max_queries: 2,
                slots_per_query: 2,
                data_size_per_query: 16,
            },
        )
        .unwrap();

        let a = pool.create_query().unwrap();
        let b = pool.create_query().unwrap();
        assert_eq!(a.slots(), 0..2);
        assert_eq!(b.slots(), 2..4);
        assert_eq!(a.data_range(), 0..16);
        assert_eq!(b.data_range(), 16..32);
    }

    #[test]
    fn query_state_machine() {
        let queue = HeadlessQueue::new(FenceMode::Auto);
        let list = command_list(&queue);
        let pool = QueryPool::new(&queue, QueryPoolDescriptor::occlusion(1)).unwrap();
        let mut query = pool.create_query().unwrap();

        assert_eq!(
            query.end(&list),
            Err(Error::InvalidQueryState {
                expected: QueryState::Begun,
                actual: QueryState::Resolved
            })
        );
        assert!(query.resolve_data(&list).is_err());

        query.begin(&list).unwrap();
        assert!(query.begin(&list).is_err());
        query.end(&list).unwrap();
        assert_eq!(query.state(), QueryState::Ended);
        query.resolve_data(&list).unwrap();
        assert_eq!(query.state(), QueryState::Resolved);
        assert_eq!(query.read_data().unwrap().len(), 8);
    }

    #[test]
    fn timestamp_query_can_not_begin() {
        let queue = HeadlessQueue::new(FenceMode::Auto);
        let list = command_list(&queue);
        let pool = QueryPool::new(&queue, QueryPoolDescriptor::timestamp(1)).unwrap();
        let mut query = pool.create_query().unwrap();

        assert_eq!(query.begin(&list), Err(Error::TimestampQueryBegin));
        query.end(&list).unwrap();
        query.resolve_data(&list).unwrap();
    }

    #[test]
    fn query_commands_require_recording_list() {
        let queue = HeadlessQueue::new(FenceMode::Auto);
        let list = command_list(&queue);
        list.commit().unwrap();

        let pool = QueryPool::new(&queue, QueryPoolDescriptor::occlusion(1)).unwrap();
        let mut query = pool.create_query().unwrap();
        assert!(query.begin(&list).is_err());
        assert_eq!(query.state(), QueryState::Resolved);
    }
}
