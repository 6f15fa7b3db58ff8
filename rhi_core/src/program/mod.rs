//! Programs, their arguments and the bindings of resources to them.

mod argument;
mod bindings;

use std::ops::Range;
use std::sync::Arc;

use hashbrown::HashMap;
use rhi_tracing::trace_span;

use crate::context::Context;
use crate::descriptor::DescriptorHeapType;
use crate::{Error, Result};

pub use argument::{
    ArgumentBindingSettings, NativeBindingType, ProgramArgument, ProgramArgumentAccessMask,
    ProgramArgumentAccessType, ShaderType,
};
pub use bindings::{ApplyBehavior, ProgramBindings, RootParameterBinding};

type GroupKey = (DescriptorHeapType, ProgramArgumentAccessType);

/// The position of an argument in the root signature and the descriptor layout of a program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgumentLayout {
    pub settings: ArgumentBindingSettings,
    pub root_parameter_index: u32,
    /// Offset of the first descriptor of the argument within the descriptors of all arguments
    /// with the same heap and access type.
    pub descriptor_offset: u32,
}

/// A program and the layout of its arguments.
///
/// Descriptors of [`Constant`] and [`FrameConstant`] arguments are shared by all bindings of
/// the program. Their descriptor ranges are reserved when the program is created and released
/// when it is dropped. [`FrameConstant`] arguments reserve one copy of their descriptors for
/// every frame in flight.
///
/// [`Constant`]: ProgramArgumentAccessType::Constant
/// [`FrameConstant`]: ProgramArgumentAccessType::FrameConstant
#[derive(Debug)]
pub struct Program {
    context: Arc<Context>,
    name: String,
    arguments: Vec<ArgumentLayout>,
    indices: HashMap<ProgramArgument, usize>,
    /// Number of descriptors of a single frame per heap and access type.
    descriptor_counts: HashMap<GroupKey, u32>,
    constant_ranges: HashMap<GroupKey, Range<u32>>,
}

impl Program {
    /// Creates a new program with the given `arguments`.
    ///
    /// Root parameter indices are assigned in the order of `arguments`.
    pub fn new(
        context: &Arc<Context>,
        name: &str,
        arguments: Vec<ArgumentBindingSettings>,
    ) -> Result<Arc<Self>> {
        let _span = trace_span!("Program::new").entered();

        let mut program = Self {
            context: context.clone(),
            name: name.to_owned(),
            arguments: Vec::with_capacity(arguments.len()),
            indices: HashMap::with_capacity(arguments.len()),
            descriptor_counts: HashMap::new(),
            constant_ranges: HashMap::new(),
        };

        for (index, settings) in arguments.into_iter().enumerate() {
            if program.indices.contains_key(&settings.argument) {
                return Err(Error::DuplicateArgument(settings.argument));
            }

            let mut descriptor_offset = 0;
            if settings.is_descriptor_table() {
                let key = (settings.range_type.heap_type(), settings.access_type);
                let count = program.descriptor_counts.entry(key).or_insert(0);
                descriptor_offset = *count;
                *count += settings.resource_count;
            }

            program.indices.insert(settings.argument.clone(), index);
            program.arguments.push(ArgumentLayout {
                settings,
                root_parameter_index: index as u32,
                descriptor_offset,
            });
        }

        let mut groups: Vec<_> = program
            .descriptor_counts
            .iter()
            .filter(|((_, access_type), _)| *access_type != ProgramArgumentAccessType::Mutable)
            .map(|(key, count)| (*key, *count))
            .collect();
        groups.sort_unstable();

        let frames_count = context.frames_count();
        for ((heap_type, access_type), count) in groups {
            let len = match access_type {
                ProgramArgumentAccessType::FrameConstant => count * frames_count,
                _ => count,
            };

            // Reservations made before a failure are released by `Drop`.
            let range = context
                .descriptors()
                .default_shader_visible_heap(heap_type)?
                .reserve_range(len)?;
            program
                .constant_ranges
                .insert((heap_type, access_type), range);
        }

        tracing::debug!(
            "created program '{}' with {} arguments",
            program.name,
            program.arguments.len()
        );

        Ok(Arc::new(program))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Returns the layout of all arguments in root parameter order.
    #[inline]
    pub fn arguments(&self) -> &[ArgumentLayout] {
        &self.arguments
    }

    pub fn argument_index(&self, argument: &ProgramArgument) -> Option<usize> {
        self.indices.get(argument).copied()
    }

    pub fn argument(&self, argument: &ProgramArgument) -> Option<&ArgumentLayout> {
        self.argument_index(argument)
            .map(|index| &self.arguments[index])
    }

    /// Returns the number of descriptors of a single frame of all arguments with the given
    /// heap and access type.
    pub fn descriptor_count(
        &self,
        heap_type: DescriptorHeapType,
        access_type: ProgramArgumentAccessType,
    ) -> u32 {
        self.descriptor_counts
            .get(&(heap_type, access_type))
            .copied()
            .unwrap_or(0)
    }

    /// Returns the complete descriptor range reserved by the program for the given heap and
    /// access type. `Mutable` arguments have no range reserved by the program.
    pub fn reserved_range(
        &self,
        heap_type: DescriptorHeapType,
        access_type: ProgramArgumentAccessType,
    ) -> Option<Range<u32>> {
        self.constant_ranges.get(&(heap_type, access_type)).cloned()
    }

    /// Returns the descriptor range used by bindings of frame `frame_index`.
    ///
    /// For `FrameConstant` arguments this is the sub-range
    /// `[start + frame_index * len, start + frame_index * len + len)` of the reserved range.
    pub fn descriptor_range(
        &self,
        heap_type: DescriptorHeapType,
        access_type: ProgramArgumentAccessType,
        frame_index: u32,
    ) -> Option<Range<u32>> {
        let range = self.reserved_range(heap_type, access_type)?;
        match access_type {
            ProgramArgumentAccessType::Constant => Some(range),
            ProgramArgumentAccessType::FrameConstant => {
                let len = self.descriptor_count(heap_type, access_type);
                let start = range.start + frame_index * len;
                Some(start..start + len)
            }
            ProgramArgumentAccessType::Mutable => None,
        }
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        for ((heap_type, _), range) in self.constant_ranges.drain() {
            let heap = self.context.descriptors().heap(heap_type);
            if let Err(err) = heap.release_range(range) {
                tracing::error!(
                    "failed to release descriptors of program '{}': {}",
                    self.name,
                    err
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::Config;
    use crate::context::Context;
    use crate::descriptor::{DescriptorHeapType, DescriptorRangeType};
    use crate::Error;

    use super::{
        ArgumentBindingSettings, Program, ProgramArgument, ProgramArgumentAccessType, ShaderType,
    };

    fn table(
        name: &str,
        access_type: ProgramArgumentAccessType,
        count: u32,
    ) -> ArgumentBindingSettings {
        ArgumentBindingSettings::descriptor_table(
            ProgramArgument::new(ShaderType::Pixel, name),
            access_type,
            DescriptorRangeType::ShaderResource,
            count,
        )
    }

    #[test]
    fn program_layout() {
        let context = Context::new(Config::default());
        let program = Program::new(
            &context,
            "layout",
            vec![
                table("a", ProgramArgumentAccessType::Mutable, 2),
                table("b", ProgramArgumentAccessType::Constant, 1),
                table("c", ProgramArgumentAccessType::Mutable, 3),
                table("d", ProgramArgumentAccessType::FrameConstant, 4),
            ],
        )
        .unwrap();

        let offsets: Vec<_> = program
            .arguments()
            .iter()
            .map(|layout| (layout.root_parameter_index, layout.descriptor_offset))
            .collect();
        assert_eq!(offsets, [(0, 0), (1, 0), (2, 2), (3, 0)]);

        let heap = DescriptorHeapType::ShaderResources;
        assert_eq!(
            program.descriptor_count(heap, ProgramArgumentAccessType::Mutable),
            5
        );
        assert_eq!(
            program
                .reserved_range(heap, ProgramArgumentAccessType::FrameConstant)
                .unwrap()
                .len(),
            12
        );
        assert!(program
            .reserved_range(heap, ProgramArgumentAccessType::Mutable)
            .is_none());
    }

    #[test]
    fn program_releases_constant_ranges() {
        let context = Context::new(Config::default());
        let heap = context
            .descriptors()
            .heap(DescriptorHeapType::ShaderResources)
            .clone();
        let free = heap.free_len();

        let program = Program::new(
            &context,
            "constants",
            vec![
                table("a", ProgramArgumentAccessType::Constant, 2),
                table("b", ProgramArgumentAccessType::FrameConstant, 2),
            ],
        )
        .unwrap();
        assert_eq!(heap.free_len(), free - 2 - 2 * 3);

        drop(program);
        assert_eq!(heap.free_len(), free);
    }

    #[test]
    fn program_duplicate_argument() {
        let context = Context::new(Config::default());
        let res = Program::new(
            &context,
            "duplicate",
            vec![
                table("a", ProgramArgumentAccessType::Mutable, 1),
                table("a", ProgramArgumentAccessType::Constant, 1),
            ],
        );

        assert_eq!(
            res.err(),
            Some(Error::DuplicateArgument(ProgramArgument::new(
                ShaderType::Pixel,
                "a"
            )))
        );
    }

    #[test]
    fn program_reservation_failure_releases_ranges() {
        let mut config = Config::default();
        config.descriptors.shader_resources = 8;
        config.descriptors.samplers = 1;
        let context = Context::new(config);

        let res = Program::new(
            &context,
            "exhausted",
            vec![
                table("a", ProgramArgumentAccessType::Constant, 4),
                ArgumentBindingSettings::descriptor_table(
                    ProgramArgument::new(ShaderType::Pixel, "s"),
                    ProgramArgumentAccessType::Constant,
                    DescriptorRangeType::Sampler,
                    2,
                ),
            ],
        );
        assert!(matches!(res, Err(Error::DescriptorHeapExhausted { .. })));

        let heap: &Arc<_> = context.descriptors().heap(DescriptorHeapType::ShaderResources);
        assert_eq!(heap.free_len(), 8);
    }
}
