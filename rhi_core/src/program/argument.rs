use std::fmt::{self, Display, Formatter};

use bitflags::bitflags;

use crate::descriptor::DescriptorRangeType;
use crate::{Error, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShaderType {
    /// The argument is visible to all shader stages.
    All,
    Vertex,
    Pixel,
    Compute,
}

impl Display for ShaderType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::All => "All",
            Self::Vertex => "Vertex",
            Self::Pixel => "Pixel",
            Self::Compute => "Compute",
        };

        f.write_str(name)
    }
}

/// A named shader argument of a program.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramArgument {
    shader_type: ShaderType,
    name: String,
}

impl ProgramArgument {
    pub fn new(shader_type: ShaderType, name: impl Into<String>) -> Self {
        Self {
            shader_type,
            name: name.into(),
        }
    }

    #[inline]
    pub fn shader_type(&self) -> ShaderType {
        self.shader_type
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for ProgramArgument {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.shader_type, self.name)
    }
}

/// How often the value bound to an argument changes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProgramArgumentAccessType {
    /// The value is shared by all bindings of the program.
    Constant,
    /// The value is shared by all bindings of the program for the same frame in flight.
    FrameConstant,
    /// Every binding has its own value.
    Mutable,
}

impl ProgramArgumentAccessType {
    pub const ALL: [Self; 3] = [Self::Constant, Self::FrameConstant, Self::Mutable];

    pub const fn mask(self) -> ProgramArgumentAccessMask {
        match self {
            Self::Constant => ProgramArgumentAccessMask::CONSTANT,
            Self::FrameConstant => ProgramArgumentAccessMask::FRAME_CONSTANT,
            Self::Mutable => ProgramArgumentAccessMask::MUTABLE,
        }
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct ProgramArgumentAccessMask: u8 {
        const CONSTANT = 1 << 0;
        const FRAME_CONSTANT = 1 << 1;
        const MUTABLE = 1 << 2;
    }
}

/// The way an argument is bound to its root parameter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum NativeBindingType {
    DescriptorTable = 0,
    RootConstant = 1,
    ConstantBufferView = 2,
    ShaderResourceView = 3,
    UnorderedAccessView = 4,
}

impl NativeBindingType {
    /// Returns the descriptor range type of a view bound directly by address.
    pub const fn view_range_type(self) -> Option<DescriptorRangeType> {
        match self {
            Self::ConstantBufferView => Some(DescriptorRangeType::ConstantBuffer),
            Self::ShaderResourceView => Some(DescriptorRangeType::ShaderResource),
            Self::UnorderedAccessView => Some(DescriptorRangeType::UnorderedAccess),
            Self::DescriptorTable | Self::RootConstant => None,
        }
    }
}

impl TryFrom<u32> for NativeBindingType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::DescriptorTable),
            1 => Ok(Self::RootConstant),
            2 => Ok(Self::ConstantBufferView),
            3 => Ok(Self::ShaderResourceView),
            4 => Ok(Self::UnorderedAccessView),
            _ => Err(Error::UnexpectedBindingType(value)),
        }
    }
}

/// The declaration of a single program argument.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArgumentBindingSettings {
    pub argument: ProgramArgument,
    pub access_type: ProgramArgumentAccessType,
    pub binding_type: NativeBindingType,
    pub range_type: DescriptorRangeType,
    /// Number of resources bound to the argument.
    pub resource_count: u32,
    /// Size in bytes of the data of a root constant argument.
    pub root_constant_size: u32,
}

impl ArgumentBindingSettings {
    pub fn descriptor_table(
        argument: ProgramArgument,
        access_type: ProgramArgumentAccessType,
        range_type: DescriptorRangeType,
        resource_count: u32,
    ) -> Self {
        Self {
            argument,
            access_type,
            binding_type: NativeBindingType::DescriptorTable,
            range_type,
            resource_count,
            root_constant_size: 0,
        }
    }

    pub fn root_constant(
        argument: ProgramArgument,
        access_type: ProgramArgumentAccessType,
        size: u32,
    ) -> Self {
        Self {
            argument,
            access_type,
            binding_type: NativeBindingType::RootConstant,
            range_type: DescriptorRangeType::ConstantBuffer,
            resource_count: 0,
            root_constant_size: size,
        }
    }

    /// Creates the settings of a view bound by its address from a raw native binding type.
    ///
    /// Returns [`UnexpectedBindingType`] if `binding_type` is not a view binding.
    ///
    /// [`UnexpectedBindingType`]: Error::UnexpectedBindingType
    pub fn root_view(
        argument: ProgramArgument,
        access_type: ProgramArgumentAccessType,
        binding_type: u32,
    ) -> Result<Self> {
        let native = NativeBindingType::try_from(binding_type)?;
        let range_type = native
            .view_range_type()
            .ok_or(Error::UnexpectedBindingType(binding_type))?;

        Ok(Self {
            argument,
            access_type,
            binding_type: native,
            range_type,
            resource_count: 1,
            root_constant_size: 0,
        })
    }

    #[inline]
    pub fn is_descriptor_table(&self) -> bool {
        self.binding_type == NativeBindingType::DescriptorTable
    }

    #[inline]
    pub fn is_root_constant(&self) -> bool {
        self.binding_type == NativeBindingType::RootConstant
    }
}

#[cfg(test)]
mod tests {
    use crate::descriptor::DescriptorRangeType;
    use crate::Error;

    use super::{
        ArgumentBindingSettings, NativeBindingType, ProgramArgument, ProgramArgumentAccessType,
        ShaderType,
    };

    #[test]
    fn argument_display() {
        let argument = ProgramArgument::new(ShaderType::Pixel, "g_texture");
        assert_eq!(argument.to_string(), "Pixel::g_texture");
    }

    #[test]
    fn binding_type_from_raw() {
        assert_eq!(
            NativeBindingType::try_from(3),
            Ok(NativeBindingType::ShaderResourceView)
        );
        assert_eq!(
            NativeBindingType::try_from(9),
            Err(Error::UnexpectedBindingType(9))
        );
    }

    #[test]
    fn root_view_rejects_non_view_binding() {
        let argument = ProgramArgument::new(ShaderType::All, "g_constants");

        let settings = ArgumentBindingSettings::root_view(
            argument.clone(),
            ProgramArgumentAccessType::Mutable,
            NativeBindingType::ConstantBufferView as u32,
        )
        .unwrap();
        assert_eq!(settings.range_type, DescriptorRangeType::ConstantBuffer);

        assert_eq!(
            ArgumentBindingSettings::root_view(
                argument,
                ProgramArgumentAccessType::Mutable,
                NativeBindingType::RootConstant as u32,
            ),
            Err(Error::UnexpectedBindingType(1))
        );
    }
}
