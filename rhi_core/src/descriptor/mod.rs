//! Descriptors and descriptor heaps.

mod heap;

use std::sync::Arc;

use crate::config::DescriptorsConfig;
use crate::resource::{ResourceId, ResourceState, ResourceView};
use crate::subresource::{SubResourceCount, SubResourceIndex};
use crate::{Error, Result};

pub use heap::DescriptorHeap;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DescriptorHeapType {
    ShaderResources,
    Samplers,
    RenderTargets,
    DepthStencil,
}

impl DescriptorHeapType {
    pub const COUNT: usize = 4;

    pub const ALL: [Self; Self::COUNT] = [
        Self::ShaderResources,
        Self::Samplers,
        Self::RenderTargets,
        Self::DepthStencil,
    ];

    /// Returns `true` if descriptors of this type can be referenced from shaders.
    pub const fn is_shader_visible(&self) -> bool {
        matches!(self, Self::ShaderResources | Self::Samplers)
    }

    #[inline]
    pub const fn index(&self) -> usize {
        *self as usize
    }
}

/// The kind of descriptors in a descriptor range.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorRangeType {
    ConstantBuffer,
    ShaderResource,
    UnorderedAccess,
    Sampler,
}

impl DescriptorRangeType {
    pub const fn heap_type(&self) -> DescriptorHeapType {
        match self {
            Self::Sampler => DescriptorHeapType::Samplers,
            _ => DescriptorHeapType::ShaderResources,
        }
    }

    /// Returns the state a resource must be in to be accessed through this descriptor.
    pub const fn required_state(&self) -> Option<ResourceState> {
        match self {
            Self::ConstantBuffer => Some(ResourceState::ConstantBuffer),
            Self::ShaderResource => Some(ResourceState::ShaderResource),
            Self::UnorderedAccess => Some(ResourceState::UnorderedAccess),
            Self::Sampler => None,
        }
    }
}

/// A descriptor of a resource view stored in a [`DescriptorHeap`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub resource: ResourceId,
    pub range_type: DescriptorRangeType,
    pub base: SubResourceIndex,
    pub count: SubResourceCount,
    pub gpu_address: u64,
}

impl Descriptor {
    pub fn new(view: &ResourceView, range_type: DescriptorRangeType) -> Self {
        Self {
            resource: view.resource_id(),
            range_type,
            base: view.base(),
            count: view.count(),
            gpu_address: view.gpu_address(),
        }
    }
}

/// Owner of the default descriptor heaps of a context.
#[derive(Debug)]
pub struct DescriptorManager {
    heaps: [Arc<DescriptorHeap>; DescriptorHeapType::COUNT],
}

impl DescriptorManager {
    pub fn new(config: &DescriptorsConfig) -> Self {
        let heaps = DescriptorHeapType::ALL.map(|heap_type| {
            let size = match heap_type {
                DescriptorHeapType::ShaderResources => config.shader_resources,
                DescriptorHeapType::Samplers => config.samplers,
                DescriptorHeapType::RenderTargets => config.render_targets,
                DescriptorHeapType::DepthStencil => config.depth_stencil,
            };

            Arc::new(DescriptorHeap::new(heap_type, size))
        });

        Self { heaps }
    }

    pub fn heap(&self, heap_type: DescriptorHeapType) -> &Arc<DescriptorHeap> {
        &self.heaps[heap_type.index()]
    }

    /// Returns the default shader-visible heap of the given type.
    pub fn default_shader_visible_heap(
        &self,
        heap_type: DescriptorHeapType,
    ) -> Result<&Arc<DescriptorHeap>> {
        if !heap_type.is_shader_visible() {
            return Err(Error::HeapNotShaderVisible(heap_type));
        }

        Ok(self.heap(heap_type))
    }
}
