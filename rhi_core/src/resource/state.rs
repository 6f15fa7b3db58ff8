use std::fmt::{self, Display, Formatter};

/// The usage state of a GPU resource.
///
/// Transitions between arbitrary states are not validated. The caller is responsible for
/// only requesting transitions that are valid for the resource.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceState {
    /// The contents of the resource are undefined. Newly created resources start in this
    /// state.
    #[default]
    Undefined,
    Common,
    VertexBuffer,
    ConstantBuffer,
    IndexBuffer,
    RenderTarget,
    InputAttachment,
    UnorderedAccess,
    DepthWrite,
    DepthRead,
    ShaderResource,
    StreamOut,
    IndirectArgument,
    CopyDest,
    CopySource,
    ResolveDest,
    ResolveSource,
    GenericRead,
    Present,
}

impl ResourceState {
    /// Returns `true` if the GPU may write to the resource in this state.
    pub const fn is_write(&self) -> bool {
        matches!(
            self,
            Self::RenderTarget
                | Self::UnorderedAccess
                | Self::DepthWrite
                | Self::StreamOut
                | Self::CopyDest
                | Self::ResolveDest
        )
    }

    /// Returns `true` if the GPU only reads from the resource in this state.
    pub const fn is_read_only(&self) -> bool {
        !self.is_write() && !matches!(self, Self::Undefined | Self::Common)
    }
}

impl Display for ResourceState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::ResourceState;

    #[test]
    fn resource_state_access() {
        assert!(ResourceState::RenderTarget.is_write());
        assert!(ResourceState::CopyDest.is_write());
        assert!(ResourceState::ShaderResource.is_read_only());
        assert!(ResourceState::Present.is_read_only());
        assert!(!ResourceState::Undefined.is_read_only());
        assert!(!ResourceState::Common.is_write());
        assert_eq!(ResourceState::default(), ResourceState::Undefined);
    }
}
