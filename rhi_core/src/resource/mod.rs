//! GPU resources and their state tracking.

mod barriers;
mod state;
mod view;

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::subresource::SubResourceCount;

pub use barriers::{
    AddResult, BarrierChange, BarrierId, BarrierSet, BarrierType, OwnerChange, ResourceBarrier,
    ResourceBarriers, ResourceBarriersGuard, StateChange,
};
pub use state::ResourceState;
pub use view::ResourceView;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// A unique identifier of a [`Resource`].
///
/// Ids are never reused while the process is running.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn to_bits(self) -> u64 {
        self.0
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer { size: u64 },
    Texture { width: u32, height: u32 },
    Sampler,
}

#[derive(Clone, Debug)]
pub struct ResourceDescriptor<'a> {
    pub name: &'a str,
    pub kind: ResourceKind,
    pub subresource_count: SubResourceCount,
    /// The address of the resource in GPU memory, `0` if it can not be addressed directly.
    pub gpu_address: u64,
    pub initial_state: ResourceState,
}

impl<'a> ResourceDescriptor<'a> {
    pub fn buffer(name: &'a str, size: u64, gpu_address: u64) -> Self {
        Self {
            name,
            kind: ResourceKind::Buffer { size },
            subresource_count: SubResourceCount::default(),
            gpu_address,
            initial_state: ResourceState::Undefined,
        }
    }

    pub fn texture(name: &'a str, width: u32, height: u32, count: SubResourceCount) -> Self {
        Self {
            name,
            kind: ResourceKind::Texture { width, height },
            subresource_count: count,
            gpu_address: 0,
            initial_state: ResourceState::Undefined,
        }
    }

    pub fn sampler(name: &'a str) -> Self {
        Self {
            name,
            kind: ResourceKind::Sampler,
            subresource_count: SubResourceCount::default(),
            gpu_address: 0,
            initial_state: ResourceState::Undefined,
        }
    }
}

/// A GPU resource with a tracked usage state and queue ownership.
///
/// The state of a single resource is expected to be changed by one thread at a time. Callers
/// preparing transitions for the same resource from multiple threads must serialize them.
#[derive(Debug)]
pub struct Resource {
    id: ResourceId,
    name: String,
    kind: ResourceKind,
    subresource_count: SubResourceCount,
    gpu_address: u64,
    tracking: Mutex<Tracking>,
}

#[derive(Copy, Clone, Debug)]
struct Tracking {
    state: ResourceState,
    owner_queue_family: Option<u32>,
}

impl Resource {
    pub fn new(descriptor: ResourceDescriptor<'_>) -> Arc<Self> {
        Arc::new(Self {
            id: ResourceId::next(),
            name: descriptor.name.to_owned(),
            kind: descriptor.kind,
            subresource_count: descriptor.subresource_count,
            gpu_address: descriptor.gpu_address,
            tracking: Mutex::new(Tracking {
                state: descriptor.initial_state,
                owner_queue_family: None,
            }),
        })
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    #[inline]
    pub fn subresource_count(&self) -> SubResourceCount {
        self.subresource_count
    }

    #[inline]
    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    pub fn state(&self) -> ResourceState {
        self.tracking.lock().state
    }

    pub fn owner_queue_family(&self) -> Option<u32> {
        self.tracking.lock().owner_queue_family
    }

    /// Sets the state of the resource without recording a transition barrier.
    ///
    /// Returns `true` if the state was changed.
    pub fn set_state(&self, state: ResourceState) -> bool {
        let mut tracking = self.tracking.lock();
        if tracking.state == state {
            return false;
        }

        tracking.state = state;
        true
    }

    /// Sets the state of the resource and records the required transition in `barriers`.
    ///
    /// If the resource is already in `state` any pending transition of this resource is removed
    /// from `barriers`. Otherwise a transition from the current state is added, creating the
    /// barriers collection if necessary. No transition is recorded when leaving the
    /// [`Undefined`] state since the contents are discarded anyway.
    ///
    /// Returns `true` if the state was changed.
    ///
    /// [`Undefined`]: ResourceState::Undefined
    pub fn set_state_with_barriers(
        self: &Arc<Self>,
        state: ResourceState,
        barriers: &mut Option<Arc<ResourceBarriers>>,
    ) -> bool {
        let before = {
            let mut tracking = self.tracking.lock();
            let before = tracking.state;
            tracking.state = state;
            before
        };

        if before == state {
            if let Some(barriers) = barriers {
                barriers.remove_state_transition(self.id);
            }

            return false;
        }

        if before != ResourceState::Undefined {
            barriers
                .get_or_insert_with(|| Arc::new(ResourceBarriers::new()))
                .add_state_transition(self, before, state);
        }

        true
    }

    /// Sets the queue family owning the resource without recording an ownership transition.
    ///
    /// Returns `true` if the owner was changed.
    pub fn set_owner_queue_family(&self, family: u32) -> bool {
        let mut tracking = self.tracking.lock();
        if tracking.owner_queue_family == Some(family) {
            return false;
        }

        tracking.owner_queue_family = Some(family);
        true
    }

    /// Sets the queue family owning the resource and records the ownership transition in
    /// `barriers`.
    ///
    /// A transition is only recorded if the resource was previously owned by another queue
    /// family. Returns `true` if the owner was changed.
    pub fn set_owner_queue_family_with_barriers(
        self: &Arc<Self>,
        family: u32,
        barriers: &mut Option<Arc<ResourceBarriers>>,
    ) -> bool {
        let before = {
            let mut tracking = self.tracking.lock();
            core::mem::replace(&mut tracking.owner_queue_family, Some(family))
        };

        match before {
            Some(before) if before == family => {
                if let Some(barriers) = barriers {
                    barriers.remove_owner_transition(self.id);
                }

                false
            }
            Some(before) => {
                barriers
                    .get_or_insert_with(|| Arc::new(ResourceBarriers::new()))
                    .add_owner_transition(self, before, family);
                true
            }
            None => true,
        }
    }
}

impl Display for Resource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' {}", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{AddResult, Resource, ResourceBarriers, ResourceDescriptor, ResourceState};

    fn buffer() -> Arc<Resource> {
        Resource::new(ResourceDescriptor::buffer("buffer", 256, 0x1000))
    }

    #[test]
    fn resource_ids_unique() {
        let a = buffer();
        let b = buffer();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn set_state_from_undefined_records_no_barrier() {
        let resource = buffer();
        let mut barriers = None;

        assert!(resource.set_state_with_barriers(ResourceState::CopyDest, &mut barriers));
        assert!(barriers.is_none());
        assert_eq!(resource.state(), ResourceState::CopyDest);
    }

    #[test]
    fn set_state_records_transition() {
        let resource = buffer();
        resource.set_state(ResourceState::CopyDest);

        let mut barriers = None;
        assert!(resource.set_state_with_barriers(ResourceState::ShaderResource, &mut barriers));

        let barriers = barriers.unwrap();
        assert!(barriers.has_state_transition(
            resource.id(),
            ResourceState::CopyDest,
            ResourceState::ShaderResource
        ));
        assert_eq!(resource.state(), ResourceState::ShaderResource);
    }

    #[test]
    fn set_same_state_removes_pending_transition() {
        let resource = buffer();
        resource.set_state(ResourceState::CopyDest);

        let barriers = Arc::new(ResourceBarriers::new());
        assert_eq!(
            barriers.add_state_transition(
                &resource,
                ResourceState::Common,
                ResourceState::CopyDest
            ),
            AddResult::Added
        );

        let mut barriers = Some(barriers);
        assert!(!resource.set_state_with_barriers(ResourceState::CopyDest, &mut barriers));
        assert!(barriers.unwrap().is_empty());
    }

    #[test]
    fn set_owner_queue_family_records_transition() {
        let resource = buffer();
        let mut barriers = None;

        assert!(resource.set_owner_queue_family_with_barriers(2, &mut barriers));
        assert!(barriers.is_none());

        assert!(resource.set_owner_queue_family_with_barriers(0, &mut barriers));
        let barriers = barriers.unwrap();
        assert!(barriers.has_owner_transition(resource.id(), 2, 0));
        assert_eq!(resource.owner_queue_family(), Some(0));

        let mut barriers = Some(barriers);
        assert!(!resource.set_owner_queue_family_with_barriers(0, &mut barriers));
        assert!(barriers.unwrap().is_empty());
    }
}
