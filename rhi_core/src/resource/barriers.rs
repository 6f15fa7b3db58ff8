use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rhi_tracing::trace_span;

use super::{Resource, ResourceId, ResourceState};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BarrierType {
    StateTransition,
    OwnerTransition,
}

/// The identity of a [`ResourceBarrier`].
///
/// A [`ResourceBarriers`] collection holds at most one barrier per `BarrierId`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BarrierId {
    pub resource: ResourceId,
    pub kind: BarrierType,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StateChange {
    pub before: ResourceState,
    pub after: ResourceState,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OwnerChange {
    pub queue_family_before: u32,
    pub queue_family_after: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BarrierChange {
    State(StateChange),
    Owner(OwnerChange),
}

impl BarrierChange {
    pub const fn kind(&self) -> BarrierType {
        match self {
            Self::State(_) => BarrierType::StateTransition,
            Self::Owner(_) => BarrierType::OwnerTransition,
        }
    }
}

/// A pending state or queue ownership transition of a single resource.
#[derive(Clone, Debug)]
pub struct ResourceBarrier {
    resource: Arc<Resource>,
    change: BarrierChange,
}

impl ResourceBarrier {
    pub fn state_transition(
        resource: Arc<Resource>,
        before: ResourceState,
        after: ResourceState,
    ) -> Self {
        Self {
            resource,
            change: BarrierChange::State(StateChange { before, after }),
        }
    }

    pub fn owner_transition(
        resource: Arc<Resource>,
        queue_family_before: u32,
        queue_family_after: u32,
    ) -> Self {
        Self {
            resource,
            change: BarrierChange::Owner(OwnerChange {
                queue_family_before,
                queue_family_after,
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> BarrierId {
        BarrierId {
            resource: self.resource.id(),
            kind: self.change.kind(),
        }
    }

    #[inline]
    pub fn kind(&self) -> BarrierType {
        self.change.kind()
    }

    #[inline]
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    #[inline]
    pub fn change(&self) -> BarrierChange {
        self.change
    }

    pub fn state_change(&self) -> Option<StateChange> {
        match self.change {
            BarrierChange::State(change) => Some(change),
            BarrierChange::Owner(_) => None,
        }
    }

    pub fn owner_change(&self) -> Option<OwnerChange> {
        match self.change {
            BarrierChange::State(_) => None,
            BarrierChange::Owner(change) => Some(change),
        }
    }

    /// Applies the target state or owner of this barrier to the tracked resource.
    ///
    /// This only updates the tracked state. Emitting the native barrier is done by the command
    /// list.
    pub fn apply_transition(&self) {
        match self.change {
            BarrierChange::State(change) => {
                self.resource.set_state(change.after);
            }
            BarrierChange::Owner(change) => {
                self.resource
                    .set_owner_queue_family(change.queue_family_after);
            }
        }
    }

    /// Updates the target of this barrier keeping its original source.
    ///
    /// Returns `false` if `change` is of a different type than this barrier.
    fn update_target(&mut self, change: BarrierChange) -> bool {
        match (&mut self.change, change) {
            (BarrierChange::State(this), BarrierChange::State(other)) => {
                this.after = other.after;
                true
            }
            (BarrierChange::Owner(this), BarrierChange::Owner(other)) => {
                this.queue_family_after = other.queue_family_after;
                true
            }
            _ => false,
        }
    }
}

impl PartialEq for ResourceBarrier {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id() && self.change == other.change
    }
}

impl Eq for ResourceBarrier {}

impl Display for ResourceBarrier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.change {
            BarrierChange::State(change) => write!(
                f,
                "resource {} state transition from {} to {}",
                self.resource, change.before, change.after
            ),
            BarrierChange::Owner(change) => write!(
                f,
                "resource {} ownership transition from queue family {} to {}",
                self.resource, change.queue_family_before, change.queue_family_after
            ),
        }
    }
}

/// The result of adding a barrier to a [`ResourceBarriers`] collection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AddResult {
    /// An identical barrier was already in the collection.
    Existing,
    /// The barrier was newly added.
    Added,
    /// A barrier for the same resource and type existed and its target was updated.
    Updated,
}

/// The set of barriers held by a [`ResourceBarriers`] collection.
///
/// A `BarrierSet` is only accessible through a locked [`ResourceBarriersGuard`], all of its
/// methods assume the lock is held and can be freely combined by the caller.
#[derive(Clone, Debug, Default)]
pub struct BarrierSet {
    barriers: BTreeMap<BarrierId, ResourceBarrier>,
}

impl BarrierSet {
    pub fn add(&mut self, barrier: ResourceBarrier) -> AddResult {
        let _span = trace_span!("BarrierSet::add").entered();

        match self.barriers.entry(barrier.id()) {
            Entry::Vacant(entry) => {
                entry.insert(barrier);
                AddResult::Added
            }
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if existing.change == barrier.change {
                    return AddResult::Existing;
                }

                let updated = existing.update_target(barrier.change);
                debug_assert!(updated);
                AddResult::Updated
            }
        }
    }

    pub fn add_state_transition(
        &mut self,
        resource: &Arc<Resource>,
        before: ResourceState,
        after: ResourceState,
    ) -> AddResult {
        self.add(ResourceBarrier::state_transition(
            resource.clone(),
            before,
            after,
        ))
    }

    pub fn add_owner_transition(
        &mut self,
        resource: &Arc<Resource>,
        queue_family_before: u32,
        queue_family_after: u32,
    ) -> AddResult {
        self.add(ResourceBarrier::owner_transition(
            resource.clone(),
            queue_family_before,
            queue_family_after,
        ))
    }

    /// Removes the barrier with the given `id`. Returns `false` if it did not exist.
    pub fn remove(&mut self, id: BarrierId) -> bool {
        self.barriers.remove(&id).is_some()
    }

    pub fn remove_state_transition(&mut self, resource: ResourceId) -> bool {
        self.remove(BarrierId {
            resource,
            kind: BarrierType::StateTransition,
        })
    }

    pub fn remove_owner_transition(&mut self, resource: ResourceId) -> bool {
        self.remove(BarrierId {
            resource,
            kind: BarrierType::OwnerTransition,
        })
    }

    pub fn get(&self, id: BarrierId) -> Option<&ResourceBarrier> {
        self.barriers.get(&id)
    }

    pub fn has_state_transition(
        &self,
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    ) -> bool {
        let id = BarrierId {
            resource,
            kind: BarrierType::StateTransition,
        };

        self.get(id)
            .is_some_and(|b| b.change == BarrierChange::State(StateChange { before, after }))
    }

    pub fn has_owner_transition(
        &self,
        resource: ResourceId,
        queue_family_before: u32,
        queue_family_after: u32,
    ) -> bool {
        let id = BarrierId {
            resource,
            kind: BarrierType::OwnerTransition,
        };

        self.get(id).is_some_and(|b| {
            b.change
                == BarrierChange::Owner(OwnerChange {
                    queue_family_before,
                    queue_family_after,
                })
        })
    }

    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    /// Returns an iterator over all barriers ordered by their [`BarrierId`].
    pub fn iter(&self) -> impl Iterator<Item = &ResourceBarrier> {
        self.barriers.values()
    }

    pub fn apply_transitions(&self) {
        for barrier in self.barriers.values() {
            barrier.apply_transition();
        }
    }

    pub fn clear(&mut self) {
        self.barriers.clear();
    }
}

pub type ResourceBarriersGuard<'a> = MutexGuard<'a, BarrierSet>;

/// A thread-safe collection of pending resource barriers.
///
/// Every method locks the collection for its duration. Use [`lock`] to perform multiple
/// operations under a single lock.
///
/// The lock order is collection first, resource second. [`Resource`] never holds its own
/// lock while accessing a collection.
///
/// [`lock`]: Self::lock
#[derive(Debug, Default)]
pub struct ResourceBarriers {
    inner: Mutex<BarrierSet>,
}

impl ResourceBarriers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_barriers<I>(barriers: I) -> Self
    where
        I: IntoIterator<Item = ResourceBarrier>,
    {
        let mut set = BarrierSet::default();
        for barrier in barriers {
            set.add(barrier);
        }

        Self {
            inner: Mutex::new(set),
        }
    }

    /// Creates transitions of all `resources` from their current state and owner to the common
    /// `state` and `owner_queue_family`.
    ///
    /// Resources already in the target state are skipped. An ownership transition is only
    /// created for resources that have a known owner.
    pub fn create_transitions(
        resources: &[Arc<Resource>],
        state: Option<ResourceState>,
        owner_queue_family: Option<u32>,
    ) -> Self {
        let _span = trace_span!("ResourceBarriers::create_transitions").entered();

        let mut set = BarrierSet::default();
        for resource in resources {
            if let Some(state) = state {
                let before = resource.state();
                if before != state {
                    set.add_state_transition(resource, before, state);
                }
            }

            if let (Some(family), Some(before)) = (owner_queue_family, resource.owner_queue_family())
            {
                if before != family {
                    set.add_owner_transition(resource, before, family);
                }
            }
        }

        Self {
            inner: Mutex::new(set),
        }
    }

    /// Locks the collection.
    pub fn lock(&self) -> ResourceBarriersGuard<'_> {
        self.inner.lock()
    }

    pub fn add(&self, barrier: ResourceBarrier) -> AddResult {
        self.lock().add(barrier)
    }

    pub fn add_state_transition(
        &self,
        resource: &Arc<Resource>,
        before: ResourceState,
        after: ResourceState,
    ) -> AddResult {
        self.lock().add_state_transition(resource, before, after)
    }

    pub fn add_owner_transition(
        &self,
        resource: &Arc<Resource>,
        queue_family_before: u32,
        queue_family_after: u32,
    ) -> AddResult {
        self.lock()
            .add_owner_transition(resource, queue_family_before, queue_family_after)
    }

    pub fn remove(&self, id: BarrierId) -> bool {
        self.lock().remove(id)
    }

    pub fn remove_state_transition(&self, resource: ResourceId) -> bool {
        self.lock().remove_state_transition(resource)
    }

    pub fn remove_owner_transition(&self, resource: ResourceId) -> bool {
        self.lock().remove_owner_transition(resource)
    }

    pub fn has_state_transition(
        &self,
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    ) -> bool {
        self.lock().has_state_transition(resource, before, after)
    }

    pub fn has_owner_transition(
        &self,
        resource: ResourceId,
        queue_family_before: u32,
        queue_family_after: u32,
    ) -> bool {
        self.lock()
            .has_owner_transition(resource, queue_family_before, queue_family_after)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns a snapshot of all barriers ordered by their [`BarrierId`].
    pub fn barriers(&self) -> Vec<ResourceBarrier> {
        self.lock().iter().cloned().collect()
    }

    /// Applies the target state or owner of every barrier to its resource.
    pub fn apply_transitions(&self) {
        let _span = trace_span!("ResourceBarriers::apply_transitions").entered();

        self.lock().apply_transitions();
    }
}

impl Display for ResourceBarriers {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let set = self.lock();
        for (index, barrier) in set.iter().enumerate() {
            if index != 0 {
                writeln!(f)?;
            }

            write!(f, "  - {}", barrier)?;
        }

        Ok(())
    }
}
