use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::descriptor::DescriptorManager;
use crate::{Error, Result};

/// Device-wide state shared by programs, bindings and queues.
#[derive(Debug)]
pub struct Context {
    config: Config,
    frame_index: AtomicU32,
    descriptors: DescriptorManager,
}

impl Context {
    pub fn new(config: Config) -> Arc<Self> {
        let descriptors = DescriptorManager::new(&config.descriptors);

        Arc::new(Self {
            config,
            frame_index: AtomicU32::new(0),
            descriptors,
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the number of frames in flight.
    #[inline]
    pub fn frames_count(&self) -> u32 {
        self.config.context.frames_in_flight
    }

    /// Returns the index of the frame currently being recorded.
    #[inline]
    pub fn frame_index(&self) -> u32 {
        self.frame_index.load(Ordering::Acquire)
    }

    pub fn set_frame_index(&self, index: u32) -> Result<()> {
        let count = self.frames_count();
        if index >= count {
            return Err(Error::FrameIndexOutOfRange { index, count });
        }

        self.frame_index.store(index, Ordering::Release);
        Ok(())
    }

    /// Advances to the next frame in flight and returns its index.
    pub fn advance_frame(&self) -> u32 {
        let count = self.frames_count();
        let prev = self
            .frame_index
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |index| {
                Some((index + 1) % count)
            })
            .unwrap_or_else(|index| index);

        (prev + 1) % count
    }

    #[inline]
    pub fn descriptors(&self) -> &DescriptorManager {
        &self.descriptors
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::Error;

    use super::Context;

    #[test]
    fn context_advance_frame() {
        let context = Context::new(Config::default());
        assert_eq!(context.frames_count(), 3);
        assert_eq!(context.frame_index(), 0);

        assert_eq!(context.advance_frame(), 1);
        assert_eq!(context.advance_frame(), 2);
        assert_eq!(context.advance_frame(), 0);
        assert_eq!(context.frame_index(), 0);
    }

    #[test]
    fn context_frame_index_out_of_range() {
        let context = Context::new(Config::default());
        assert_eq!(
            context.set_frame_index(3),
            Err(Error::FrameIndexOutOfRange { index: 3, count: 3 })
        );
        context.set_frame_index(2).unwrap();
        assert_eq!(context.frame_index(), 2);
    }
}
