use std::ops::Range;

use parking_lot::Mutex;
use rhi_tracing::trace_span;

use crate::range_set::RangeSet;
use crate::{Error, Result};

use super::{Descriptor, DescriptorHeapType};

/// A fixed-size pool of descriptors from which contiguous ranges are reserved.
///
/// Ranges are reserved with [`reserve_range`] and must be returned with [`release_range`] once
/// no command list references them anymore.
///
/// [`reserve_range`]: Self::reserve_range
/// [`release_range`]: Self::release_range
#[derive(Debug)]
pub struct DescriptorHeap {
    heap_type: DescriptorHeapType,
    size: u32,
    inner: Mutex<HeapState>,
}

#[derive(Debug)]
struct HeapState {
    free: RangeSet<u32>,
    descriptors: Vec<Option<Descriptor>>,
}

impl DescriptorHeap {
    pub fn new(heap_type: DescriptorHeapType, size: u32) -> Self {
        Self {
            heap_type,
            size,
            inner: Mutex::new(HeapState {
                free: RangeSet::from_range(0..size),
                descriptors: vec![None; size as usize],
            }),
        }
    }

    #[inline]
    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn is_shader_visible(&self) -> bool {
        self.heap_type.is_shader_visible()
    }

    /// Returns the number of descriptors that are not reserved.
    pub fn free_len(&self) -> u32 {
        self.inner.lock().free.total_len()
    }

    /// Reserves a contiguous range of `len` descriptors.
    pub fn reserve_range(&self, len: u32) -> Result<Range<u32>> {
        let _span = trace_span!("DescriptorHeap::reserve_range").entered();

        if len == 0 {
            return Ok(0..0);
        }

        let range = self
            .inner
            .lock()
            .free
            .reserve(len)
            .ok_or(Error::DescriptorHeapExhausted {
                heap_type: self.heap_type,
                requested: len,
            })?;

        tracing::debug!(
            "reserved descriptor range {:?} in {:?} heap",
            range,
            self.heap_type
        );

        Ok(range)
    }

    /// Releases a range previously returned by [`reserve_range`].
    ///
    /// The descriptors stored in the range are cleared.
    ///
    /// [`reserve_range`]: Self::reserve_range
    pub fn release_range(&self, range: Range<u32>) -> Result<()> {
        let _span = trace_span!("DescriptorHeap::release_range").entered();

        if range.is_empty() {
            return Ok(());
        }

        self.check_range(&range)?;

        let mut inner = self.inner.lock();
        if !inner.free.release(range.clone()) {
            tracing::warn!(
                "descriptor range {:?} in {:?} heap was already released",
                range,
                self.heap_type
            );
            return Ok(());
        }

        inner.descriptors[range.start as usize..range.end as usize].fill(None);

        tracing::debug!(
            "released descriptor range {:?} in {:?} heap",
            range,
            self.heap_type
        );

        Ok(())
    }

    /// Copies `descriptors` into the heap starting at `offset`.
    pub fn write_descriptors(&self, offset: u32, descriptors: &[Descriptor]) -> Result<()> {
        let range = offset..offset + descriptors.len() as u32;
        self.check_range(&range)?;

        let mut inner = self.inner.lock();
        for (slot, descriptor) in inner.descriptors[range.start as usize..range.end as usize]
            .iter_mut()
            .zip(descriptors)
        {
            *slot = Some(*descriptor);
        }

        Ok(())
    }

    /// Copies `descriptors` into the heap starting at `offset` if the slots are still empty.
    ///
    /// Returns `false` without writing anything if any slot already holds a different
    /// descriptor.
    pub fn write_descriptors_once(
        &self,
        offset: u32,
        descriptors: &[Descriptor],
    ) -> Result<bool> {
        let range = offset..offset + descriptors.len() as u32;
        self.check_range(&range)?;

        let mut inner = self.inner.lock();
        let slots = &mut inner.descriptors[range.start as usize..range.end as usize];
        let compatible = slots
            .iter()
            .zip(descriptors)
            .all(|(slot, descriptor)| slot.is_none() || *slot == Some(*descriptor));
        if !compatible {
            return Ok(false);
        }

        for (slot, descriptor) in slots.iter_mut().zip(descriptors) {
            *slot = Some(*descriptor);
        }

        Ok(true)
    }

    /// Returns the descriptor stored at `index`.
    pub fn descriptor(&self, index: u32) -> Option<Descriptor> {
        self.inner
            .lock()
            .descriptors
            .get(index as usize)
            .copied()
            .flatten()
    }

    fn check_range(&self, range: &Range<u32>) -> Result<()> {
        if range.start > range.end || range.end > self.size {
            return Err(Error::DescriptorRangeOutOfBounds {
                heap_type: self.heap_type,
                range: range.clone(),
                size: self.size,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::descriptor::{Descriptor, DescriptorHeapType, DescriptorRangeType};
    use crate::resource::{Resource, ResourceDescriptor, ResourceView};
    use crate::Error;

    use super::DescriptorHeap;

    #[test]
    fn heap_reserve_release() {
        let heap = DescriptorHeap::new(DescriptorHeapType::ShaderResources, 16);

        let a = heap.reserve_range(10).unwrap();
        assert_eq!(a, 0..10);
        assert_eq!(
            heap.reserve_range(7),
            Err(Error::DescriptorHeapExhausted {
                heap_type: DescriptorHeapType::ShaderResources,
                requested: 7
            })
        );

        heap.release_range(a).unwrap();
        assert_eq!(heap.free_len(), 16);
        assert_eq!(heap.reserve_range(16).unwrap(), 0..16);
    }

    #[test]
    fn heap_write_descriptors() {
        let heap = DescriptorHeap::new(DescriptorHeapType::ShaderResources, 4);
        let buffer = Resource::new(ResourceDescriptor::buffer("buffer", 64, 0x100));
        let descriptor = Descriptor::new(
            &ResourceView::new(buffer.clone()),
            DescriptorRangeType::ConstantBuffer,
        );

        let range = heap.reserve_range(2).unwrap();
        heap.write_descriptors(range.start + 1, &[descriptor]).unwrap();
        assert_eq!(heap.descriptor(1), Some(descriptor));
        assert_eq!(heap.descriptor(0), None);

        assert!(matches!(
            heap.write_descriptors(3, &[descriptor, descriptor]),
            Err(Error::DescriptorRangeOutOfBounds { .. })
        ));

        heap.release_range(range).unwrap();
        assert_eq!(heap.descriptor(1), None);
    }

    #[test]
    fn heap_write_descriptors_once() {
        let heap = DescriptorHeap::new(DescriptorHeapType::ShaderResources, 4);
        let descriptor = |name| {
            Descriptor::new(
                &ResourceView::new(Resource::new(ResourceDescriptor::buffer(name, 64, 0x100))),
                DescriptorRangeType::ShaderResource,
            )
        };
        let a = descriptor("a");
        let b = descriptor("b");

        let range = heap.reserve_range(2).unwrap();
        assert!(heap.write_descriptors_once(range.start, &[a]).unwrap());
        assert!(heap.write_descriptors_once(range.start, &[a, b]).unwrap());
        assert!(!heap.write_descriptors_once(range.start, &[b, b]).unwrap());
        assert_eq!(heap.descriptor(range.start), Some(a));
        assert_eq!(heap.descriptor(range.start + 1), Some(b));
    }

    #[test]
    fn heap_release_out_of_bounds() {
        let heap = DescriptorHeap::new(DescriptorHeapType::Samplers, 4);
        assert!(heap.release_range(2..6).is_err());
    }
}
