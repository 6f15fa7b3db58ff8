use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{CalibratedTimestamps, NativeQueue};
use crate::command::CommandList;
use crate::{Error, Result};

use super::{Query, QueryPool, QueryPoolDescriptor};

const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// A [`QueryPool`] of timestamp queries with a CPU/GPU clock calibration.
#[derive(Debug)]
pub struct TimestampQueryPool {
    pool: Arc<QueryPool>,
    frequency: u64,
    calibration: Mutex<CalibratedTimestamps>,
}

impl TimestampQueryPool {
    pub fn new(queue: &dyn NativeQueue, max_queries: u32) -> Result<Arc<Self>> {
        let frequency = queue.timestamp_frequency().ok_or_else(|| {
            Error::Backend("queue does not support timestamp queries".to_owned())
        })?;

        let pool = QueryPool::new(queue, QueryPoolDescriptor::timestamp(max_queries))?;
        let calibration = queue.calibrated_timestamps()?;

        Ok(Arc::new(Self {
            pool,
            frequency,
            calibration: Mutex::new(calibration),
        }))
    }

    #[inline]
    pub fn pool(&self) -> &Arc<QueryPool> {
        &self.pool
    }

    /// Returns the number of GPU ticks per second.
    #[inline]
    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn calibration(&self) -> CalibratedTimestamps {
        *self.calibration.lock()
    }

    /// Samples the GPU and CPU clocks of `queue` to update the offset between them.
    pub fn calibrate(&self, queue: &dyn NativeQueue) -> Result<()> {
        let calibration = queue.calibrated_timestamps()?;
        *self.calibration.lock() = calibration;

        tracing::debug!(
            "calibrated timestamps: gpu {} ticks at cpu {}ns",
            calibration.gpu_ticks,
            calibration.cpu_nanos
        );

        Ok(())
    }

    pub fn create_timestamp_query(self: &Arc<Self>) -> Result<TimestampQuery> {
        Ok(TimestampQuery {
            query: self.pool.create_query()?,
            pool: self.clone(),
        })
    }

    /// Converts a GPU timestamp into nanoseconds of the CPU clock.
    pub fn to_cpu_nanoseconds(&self, gpu_ticks: u64) -> u64 {
        let calibration = self.calibration();

        let delta_ticks = i128::from(gpu_ticks) - i128::from(calibration.gpu_ticks);
        let delta_nanos = delta_ticks * NANOS_PER_SECOND as i128 / i128::from(self.frequency.max(1));

        (i128::from(calibration.cpu_nanos) + delta_nanos).clamp(0, i128::from(u64::MAX)) as u64
    }
}

/// A query capturing the GPU time at which it was inserted into a command list.
#[derive(Debug)]
pub struct TimestampQuery {
    query: Query,
    pool: Arc<TimestampQueryPool>,
}

impl TimestampQuery {
    #[inline]
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn insert_timestamp(&mut self, command_list: &CommandList) -> Result<()> {
        self.query.end(command_list)
    }

    pub fn resolve_timestamp(&mut self, command_list: &CommandList) -> Result<()> {
        self.query.resolve_data(command_list)
    }

    /// Returns the resolved timestamp in GPU ticks.
    pub fn gpu_timestamp(&self) -> Result<u64> {
        let data = self.query.read_data()?;
        let bytes = data
            .get(..8)
            .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
            .ok_or_else(|| Error::Backend("timestamp query result is truncated".to_owned()))?;

        Ok(u64::from_le_bytes(bytes))
    }

    /// Returns the resolved timestamp in nanoseconds of the CPU clock.
    pub fn cpu_nanoseconds(&self) -> Result<u64> {
        let ticks = self.gpu_timestamp()?;
        Ok(self.pool.to_cpu_nanoseconds(ticks))
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::headless::{FenceMode, HeadlessQueue, GPU_CLOCK_OFFSET};
    use crate::backend::{CalibratedTimestamps, NativeQueue};
    use crate::command::CommandList;

    use super::TimestampQueryPool;

    #[test]
    fn timestamp_to_cpu_nanoseconds() {
        let queue = HeadlessQueue::new(FenceMode::Auto);
        let pool = TimestampQueryPool::new(&queue, 4).unwrap();
        *pool.calibration.lock() = CalibratedTimestamps {
            gpu_ticks: 5_000,
            cpu_nanos: 100,
        };

        assert_eq!(pool.to_cpu_nanoseconds(5_000), 100);
        assert_eq!(pool.to_cpu_nanoseconds(6_000), 1_100);
        assert_eq!(pool.to_cpu_nanoseconds(0), 0);
    }

    #[test]
    fn timestamp_query_roundtrip() {
        let queue = HeadlessQueue::new(FenceMode::Auto);
        let pool = TimestampQueryPool::new(&queue, 2).unwrap();
        let list = CommandList::new("timestamps", queue.family(), queue.create_command_list().unwrap());

        let mut query = pool.create_timestamp_query().unwrap();
        query.insert_timestamp(&list).unwrap();
        query.resolve_timestamp(&list).unwrap();

        let gpu = query.gpu_timestamp().unwrap();
        assert!(gpu >= GPU_CLOCK_OFFSET);

        pool.calibrate(&queue).unwrap();
        let cpu = query.cpu_nanoseconds().unwrap();
        assert_eq!(cpu, gpu - GPU_CLOCK_OFFSET);
    }
}
