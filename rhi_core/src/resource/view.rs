use std::sync::Arc;

use crate::subresource::{SubResourceCount, SubResourceIndex};
use crate::{Error, Result};

use super::{Resource, ResourceId};

/// A view of a subresource range of a [`Resource`].
#[derive(Clone, Debug)]
pub struct ResourceView {
    resource: Arc<Resource>,
    base: SubResourceIndex,
    count: SubResourceCount,
    offset: u64,
}

impl ResourceView {
    /// Creates a view of all subresources of `resource`.
    pub fn new(resource: Arc<Resource>) -> Self {
        let count = resource.subresource_count();

        Self {
            resource,
            base: SubResourceIndex::default(),
            count,
            offset: 0,
        }
    }

    /// Creates a view of `count` subresources starting at `base`.
    ///
    /// Returns an error if the range exceeds the subresources of `resource`.
    pub fn with_subresources(
        resource: Arc<Resource>,
        base: SubResourceIndex,
        count: SubResourceCount,
    ) -> Result<Self> {
        let total = resource.subresource_count();
        let last = SubResourceIndex::new(
            base.depth_slice + count.depth() - 1,
            base.array_index + count.array_size() - 1,
            base.mip_level + count.mip_levels_count() - 1,
        );

        if !base.is_within(&total) || !last.is_within(&total) {
            return Err(Error::SubResourceOutOfRange {
                index: last,
                count: total,
            });
        }

        Ok(Self {
            resource,
            base,
            count,
            offset: 0,
        })
    }

    /// Creates a view of a buffer starting at `offset` bytes.
    pub fn with_offset(resource: Arc<Resource>, offset: u64) -> Self {
        let mut view = Self::new(resource);
        view.offset = offset;
        view
    }

    #[inline]
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    #[inline]
    pub fn resource_id(&self) -> ResourceId {
        self.resource.id()
    }

    #[inline]
    pub fn base(&self) -> SubResourceIndex {
        self.base
    }

    #[inline]
    pub fn count(&self) -> SubResourceCount {
        self.count
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the GPU address of the first byte of the view.
    pub fn gpu_address(&self) -> u64 {
        self.resource.gpu_address() + self.offset
    }

    /// Returns `true` if both views reference the same range of the same resource.
    pub fn is_same_view(&self, other: &Self) -> bool {
        self.resource.id() == other.resource.id()
            && self.base == other.base
            && self.count == other.count
            && self.offset == other.offset
    }
}

#[cfg(test)]
mod tests {
    use crate::resource::{Resource, ResourceDescriptor};
    use crate::subresource::{SubResourceCount, SubResourceIndex};

    use super::ResourceView;

    #[test]
    fn view_within_resource() {
        let texture = Resource::new(ResourceDescriptor::texture(
            "texture",
            128,
            128,
            SubResourceCount::new(1, 6, 8),
        ));

        let view = ResourceView::with_subresources(
            texture.clone(),
            SubResourceIndex::new(0, 2, 1),
            SubResourceCount::new(1, 4, 7),
        )
        .unwrap();
        assert_eq!(view.count().raw_count(), 28);

        assert!(ResourceView::with_subresources(
            texture,
            SubResourceIndex::new(0, 3, 0),
            SubResourceCount::new(1, 4, 1),
        )
        .is_err());
    }

    #[test]
    fn buffer_view_gpu_address() {
        let buffer = Resource::new(ResourceDescriptor::buffer("buffer", 1024, 0x10000));
        let view = ResourceView::with_offset(buffer.clone(), 256);
        assert_eq!(view.gpu_address(), 0x10100);
        assert!(!view.is_same_view(&ResourceView::new(buffer)));
    }
}
