use std::ops::Range;
use std::sync::Arc;

use bitflags::bitflags;
use hashbrown::HashMap;
use rhi_tracing::trace_span;
use smallvec::SmallVec;

use crate::backend::RootParameterValue;
use crate::command::CommandList;
use crate::descriptor::{Descriptor, DescriptorHeapType};
use crate::resource::{ResourceBarriers, ResourceState, ResourceView};
use crate::{Error, Result};

use super::{
    ArgumentLayout, NativeBindingType, Program, ProgramArgument, ProgramArgumentAccessMask,
    ProgramArgumentAccessType,
};

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct ApplyBehavior: u8 {
        /// Skip constant arguments if bindings of the same program were applied before.
        const CONSTANT_ONCE = 1 << 0;
        /// Skip mutable arguments that are identical to the previously applied bindings.
        const CHANGES_ONLY = 1 << 1;
        /// Transition bound resources to the state required by their binding.
        const STATE_BARRIERS = 1 << 2;
        /// Keep bound resources alive until the command list has completed execution.
        const RETAIN_RESOURCES = 1 << 3;
    }
}

impl Default for ApplyBehavior {
    fn default() -> Self {
        Self::all()
    }
}

/// The value of a root parameter recorded for a program argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootParameterBinding {
    pub argument: ProgramArgument,
    pub root_parameter_index: u32,
    pub access_type: ProgramArgumentAccessType,
    pub value: RootParameterValue,
}

#[derive(Clone, Debug)]
struct ArgumentBinding {
    views: Vec<ResourceView>,
    root_parameter: RootParameterBinding,
}

impl ArgumentBinding {
    fn is_same_as(&self, other: &Self) -> bool {
        self.root_parameter == other.root_parameter
            && self.views.len() == other.views.len()
            && self
                .views
                .iter()
                .zip(&other.views)
                .all(|(a, b)| a.is_same_view(b))
    }
}

/// Resources and constants bound to the arguments of a [`Program`] for one frame in flight.
///
/// Descriptors of `Mutable` arguments are owned by the bindings and released when they are
/// dropped. Descriptors of `Constant` and `FrameConstant` arguments are owned by the program.
#[derive(Debug)]
pub struct ProgramBindings {
    program: Arc<Program>,
    frame_index: u32,
    arguments: Vec<ArgumentBinding>,
    mutable_ranges: HashMap<DescriptorHeapType, Range<u32>>,
}

impl ProgramBindings {
    /// Creates new bindings of `program` for frame `frame_index`.
    ///
    /// Every argument of the program except root constants must be bound in `views`. Root
    /// constants are zero until set with [`set_root_constants`].
    ///
    /// [`set_root_constants`]: Self::set_root_constants
    pub fn new<I>(program: &Arc<Program>, views: I, frame_index: u32) -> Result<Self>
    where
        I: IntoIterator<Item = (ProgramArgument, Vec<ResourceView>)>,
    {
        let mut bound = vec![None; program.arguments().len()];
        for (argument, views) in views {
            let index = program
                .argument_index(&argument)
                .ok_or(Error::UnknownArgument(argument))?;
            bound[index] = Some(views);
        }

        let constants = vec![None; program.arguments().len()];
        Self::from_parts(program.clone(), bound, constants, frame_index)
    }

    fn from_parts(
        program: Arc<Program>,
        mut views: Vec<Option<Vec<ResourceView>>>,
        mut constants: Vec<Option<SmallVec<[u8; 16]>>>,
        frame_index: u32,
    ) -> Result<Self> {
        let _span = trace_span!("ProgramBindings::new").entered();

        let count = program.context().frames_count();
        if frame_index >= count {
            return Err(Error::FrameIndexOutOfRange {
                index: frame_index,
                count,
            });
        }

        let mut bindings = Self {
            program,
            frame_index,
            arguments: Vec::new(),
            mutable_ranges: HashMap::new(),
        };

        // Ranges reserved before a failure are released by `Drop`.
        for heap_type in DescriptorHeapType::ALL {
            let len = bindings
                .program
                .descriptor_count(heap_type, ProgramArgumentAccessType::Mutable);
            if len == 0 {
                continue;
            }

            let range = bindings
                .program
                .context()
                .descriptors()
                .default_shader_visible_heap(heap_type)?
                .reserve_range(len)?;
            bindings.mutable_ranges.insert(heap_type, range);
        }

        let program = bindings.program.clone();
        let mut writes = Vec::with_capacity(program.arguments().len());
        for (index, layout) in program.arguments().iter().enumerate() {
            let (binding, descriptors) = bindings.create_argument_binding(
                layout,
                views[index].take(),
                constants[index].take(),
            )?;
            bindings.arguments.push(binding);
            writes.push(descriptors);
        }

        // Descriptors are only written once every argument is valid.
        for (binding, descriptors) in bindings.arguments.iter().zip(&writes) {
            bindings.write_descriptors(binding, descriptors)?;
        }

        Ok(bindings)
    }

    #[inline]
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    #[inline]
    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    /// Returns the root parameter bindings of all arguments in root parameter order.
    pub fn root_parameter_bindings(&self) -> impl Iterator<Item = &RootParameterBinding> {
        self.arguments.iter().map(|binding| &binding.root_parameter)
    }

    pub fn resource_views(&self, argument: &ProgramArgument) -> Option<&[ResourceView]> {
        let index = self.program.argument_index(argument)?;
        Some(&self.arguments[index].views)
    }

    /// Returns the descriptor range used by these bindings for the given heap and access type.
    pub fn descriptor_range(
        &self,
        heap_type: DescriptorHeapType,
        access_type: ProgramArgumentAccessType,
    ) -> Option<Range<u32>> {
        match access_type {
            ProgramArgumentAccessType::Mutable => self.mutable_ranges.get(&heap_type).cloned(),
            _ => self
                .program
                .descriptor_range(heap_type, access_type, self.frame_index),
        }
    }

    /// Replaces the resources bound to the mutable `argument`.
    pub fn set_resource_views(
        &mut self,
        argument: &ProgramArgument,
        views: Vec<ResourceView>,
    ) -> Result<()> {
        let program = self.program.clone();
        let index = program
            .argument_index(argument)
            .ok_or_else(|| Error::UnknownArgument(argument.clone()))?;
        let layout = &program.arguments()[index];

        if layout.settings.access_type != ProgramArgumentAccessType::Mutable {
            return Err(Error::ConstantArgumentModified(argument.clone()));
        }

        let (binding, descriptors) = self.create_argument_binding(layout, Some(views), None)?;
        self.write_descriptors(&binding, &descriptors)?;
        self.arguments[index] = binding;
        Ok(())
    }

    /// Sets the data of the root constant `argument`.
    pub fn set_root_constants(&mut self, argument: &ProgramArgument, data: &[u8]) -> Result<()> {
        let program = self.program.clone();
        let index = program
            .argument_index(argument)
            .ok_or_else(|| Error::UnknownArgument(argument.clone()))?;
        let layout = &program.arguments()[index];

        let expected = if layout.settings.is_root_constant() {
            layout.settings.root_constant_size
        } else {
            0
        };

        if !layout.settings.is_root_constant() || data.len() as u32 != expected {
            return Err(Error::RootConstantSizeMismatch {
                argument: argument.clone(),
                expected,
                actual: data.len() as u32,
            });
        }

        self.arguments[index].root_parameter.value =
            RootParameterValue::Constants(SmallVec::from_slice(data));
        Ok(())
    }

    /// Creates a copy of these bindings with the resources of mutable arguments replaced by
    /// `replacements`.
    ///
    /// The copy has its own descriptors for mutable arguments. If `frame_index` is `None` the
    /// copy uses the frame of these bindings.
    pub fn create_copy<I>(&self, replacements: I, frame_index: Option<u32>) -> Result<Self>
    where
        I: IntoIterator<Item = (ProgramArgument, Vec<ResourceView>)>,
    {
        let _span = trace_span!("ProgramBindings::create_copy").entered();

        let mut views: Vec<_> = self
            .arguments
            .iter()
            .map(|binding| Some(binding.views.clone()))
            .collect();
        let constants: Vec<_> = self
            .arguments
            .iter()
            .map(|binding| match &binding.root_parameter.value {
                RootParameterValue::Constants(data) => Some(data.clone()),
                _ => None,
            })
            .collect();

        for (argument, replacement) in replacements {
            let Some(index) = self.program.argument_index(&argument) else {
                return Err(Error::UnknownArgument(argument));
            };

            if self.program.arguments()[index].settings.access_type
                != ProgramArgumentAccessType::Mutable
            {
                return Err(Error::ConstantArgumentModified(argument));
            }

            views[index] = Some(replacement);
        }

        Self::from_parts(
            self.program.clone(),
            views,
            constants,
            frame_index.unwrap_or(self.frame_index),
        )
    }

    /// Binds all arguments to `command_list`.
    ///
    /// `applied` are the bindings last applied to the same command list, if any. Arguments
    /// that are already bound by `applied` are skipped according to `behavior`.
    pub fn apply(
        &self,
        command_list: &CommandList,
        applied: Option<&ProgramBindings>,
        behavior: ApplyBehavior,
    ) -> Result<()> {
        let _span = trace_span!("ProgramBindings::apply").entered();

        let applied = applied.filter(|applied| Arc::ptr_eq(&applied.program, &self.program));

        let mut access_mask = ProgramArgumentAccessMask::MUTABLE;
        match applied {
            Some(applied) if behavior.contains(ApplyBehavior::CONSTANT_ONCE) => {
                if applied.frame_index != self.frame_index {
                    access_mask |= ProgramArgumentAccessMask::FRAME_CONSTANT;
                }
            }
            _ => {
                access_mask |=
                    ProgramArgumentAccessMask::CONSTANT | ProgramArgumentAccessMask::FRAME_CONSTANT;
            }
        }

        // Transitions are only applied together with the emission of their barriers.
        let barriers = ResourceBarriers::new();
        let mut discarded = Vec::new();
        let mut retained = Vec::new();
        let mut root_parameters = Vec::with_capacity(self.arguments.len());

        for (index, binding) in self.arguments.iter().enumerate() {
            let access_type = binding.root_parameter.access_type;
            if !access_mask.contains(access_type.mask()) {
                continue;
            }

            if access_type == ProgramArgumentAccessType::Mutable
                && behavior.contains(ApplyBehavior::CHANGES_ONLY)
                && applied.is_some_and(|applied| applied.arguments[index].is_same_as(binding))
            {
                continue;
            }

            if behavior.contains(ApplyBehavior::STATE_BARRIERS) {
                let layout = &self.program.arguments()[index];
                if let Some(state) = layout.settings.range_type.required_state() {
                    for view in &binding.views {
                        let resource = view.resource();
                        match resource.state() {
                            before if before == state => {
                                barriers.remove_state_transition(resource.id());
                            }
                            ResourceState::Undefined => discarded.push((resource, state)),
                            before => {
                                barriers.add_state_transition(resource, before, state);
                            }
                        }
                    }
                }
            }

            if behavior.contains(ApplyBehavior::RETAIN_RESOURCES) {
                retained.extend(binding.views.iter().map(|view| view.resource().clone()));
            }

            root_parameters.push(&binding.root_parameter);
        }

        if behavior.contains(ApplyBehavior::STATE_BARRIERS) {
            command_list.set_resource_barriers(&barriers)?;

            // Leaving `Undefined` discards the contents and needs no barrier.
            for (resource, state) in discarded {
                resource.set_state(state);
            }
        }

        command_list.record(|native| {
            for binding in &root_parameters {
                native.set_root_parameter(binding.root_parameter_index, &binding.value);
            }
        })?;

        if !retained.is_empty() {
            command_list.retain_resources(retained);
        }

        Ok(())
    }

    fn create_argument_binding(
        &self,
        layout: &ArgumentLayout,
        views: Option<Vec<ResourceView>>,
        constants: Option<SmallVec<[u8; 16]>>,
    ) -> Result<(ArgumentBinding, Vec<Descriptor>)> {
        let settings = &layout.settings;
        let argument = &settings.argument;

        let mut descriptors = Vec::new();
        let (views, value) = match settings.binding_type {
            NativeBindingType::RootConstant => {
                let views = views.unwrap_or_default();
                if !views.is_empty() {
                    return Err(Error::ResourceCountMismatch {
                        argument: argument.clone(),
                        expected: 0,
                        actual: views.len() as u32,
                    });
                }

                let data = constants
                    .unwrap_or_else(|| SmallVec::from_elem(0, settings.root_constant_size as usize));
                (views, RootParameterValue::Constants(data))
            }
            NativeBindingType::DescriptorTable => {
                let views = self.checked_views(layout, views)?;

                let heap_type = settings.range_type.heap_type();
                let base = match settings.access_type {
                    ProgramArgumentAccessType::Mutable => {
                        self.mutable_ranges.get(&heap_type).map(|range| range.start)
                    }
                    access_type => self
                        .program
                        .descriptor_range(heap_type, access_type, self.frame_index)
                        .map(|range| range.start),
                }
                .ok_or_else(|| Error::MissingArgumentBinding(argument.clone()))?;
                let offset = base + layout.descriptor_offset;

                descriptors.extend(
                    views
                        .iter()
                        .map(|view| Descriptor::new(view, settings.range_type)),
                );

                (views, RootParameterValue::DescriptorTable { heap_type, offset })
            }
            binding_type => {
                let views = self.checked_views(layout, views)?;
                let gpu_address = views.first().map_or(0, ResourceView::gpu_address);

                (
                    views,
                    RootParameterValue::View {
                        binding_type,
                        gpu_address,
                    },
                )
            }
        };

        let binding = ArgumentBinding {
            views,
            root_parameter: RootParameterBinding {
                argument: argument.clone(),
                root_parameter_index: layout.root_parameter_index,
                access_type: settings.access_type,
                value,
            },
        };

        Ok((binding, descriptors))
    }

    /// Copies the descriptors of a descriptor table `binding` into its heap.
    ///
    /// Descriptors of `Constant` and `FrameConstant` arguments are shared by all bindings of
    /// the program. They are fixed by the first bindings that write them.
    fn write_descriptors(
        &self,
        binding: &ArgumentBinding,
        descriptors: &[Descriptor],
    ) -> Result<()> {
        let RootParameterValue::DescriptorTable { heap_type, offset } = binding.root_parameter.value
        else {
            return Ok(());
        };

        let heap = self.program.context().descriptors().heap(heap_type);
        match binding.root_parameter.access_type {
            ProgramArgumentAccessType::Mutable => heap.write_descriptors(offset, descriptors),
            _ => {
                if heap.write_descriptors_once(offset, descriptors)? {
                    Ok(())
                } else {
                    Err(Error::ConstantArgumentModified(
                        binding.root_parameter.argument.clone(),
                    ))
                }
            }
        }
    }

    fn checked_views(
        &self,
        layout: &ArgumentLayout,
        views: Option<Vec<ResourceView>>,
    ) -> Result<Vec<ResourceView>> {
        let argument = &layout.settings.argument;
        let views = views.ok_or_else(|| Error::MissingArgumentBinding(argument.clone()))?;

        if views.len() as u32 != layout.settings.resource_count {
            return Err(Error::ResourceCountMismatch {
                argument: argument.clone(),
                expected: layout.settings.resource_count,
                actual: views.len() as u32,
            });
        }

        Ok(views)
    }
}

impl Drop for ProgramBindings {
    fn drop(&mut self) {
        for (heap_type, range) in self.mutable_ranges.drain() {
            let heap = self.program.context().descriptors().heap(heap_type);
            if let Err(err) = heap.release_range(range) {
                tracing::error!(
                    "failed to release descriptors of bindings of program '{}': {}",
                    self.program.name(),
                    err
                );
            }
        }
    }
}
