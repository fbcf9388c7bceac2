//! Backend-agnostic descriptions of GPU resources and their states.

use std::num::NonZeroU64;

use bitflags::bitflags;
use geometry::{Extent, Px};

use crate::Color;

/// Opaque handle to a texture or buffer owned by a [`Device`].
///
/// [`Device`]: crate::backend::Device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId(NonZeroU64);

impl ResourceId {
    #[must_use]
    pub fn new(raw: NonZeroU64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> NonZeroU64 {
        self.0
    }
}

/// Opaque handle to a root signature and pipeline state pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineId(NonZeroU64);

impl PipelineId {
    #[must_use]
    pub fn new(raw: NonZeroU64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> NonZeroU64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Unknown,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Rg32Float,
    R32Float,
    R32Typeless,
    R24G8Typeless,
    D24UnormS8Uint,
    R24UnormX8Typeless,
    D32Float,
}

impl Format {
    #[must_use]
    pub fn is_depth(self) -> bool {
        matches!(self, Self::D24UnormS8Uint | Self::D32Float)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    Present,
    RenderTarget,
    PixelShaderResource,
    DepthWrite,
    GenericRead,
    CopyDest,
}

/// A transition of one resource from one state to another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Barrier {
    pub resource: ResourceId,
    pub before: ResourceState,
    pub after: ResourceState,
}

bitflags! {
    /// The views a texture may be bound through. A texture must be created
    /// with the matching usage before a view of that kind is written for it.
    pub struct TextureUsage: u32 {
        const SHADER_RESOURCE = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const DEPTH_STENCIL = 1 << 2;
        const UNORDERED_ACCESS = 1 << 3;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureDimension {
    D2,
    D3,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color(Color),
    DepthStencil { depth: f32, stencil: u8 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureDesc {
    pub label: &'static str,
    pub dimension: TextureDimension,
    pub extent: Extent<u32, Px>,
    /// Depth for 3D textures, array layers otherwise. Cube maps have 6.
    pub depth_or_layers: u16,
    pub mip_levels: u16,
    pub format: Format,
    pub usage: TextureUsage,
    pub initial_state: ResourceState,
    pub clear_value: Option<ClearValue>,
}

impl TextureDesc {
    /// A single-layer, single-mip 2D texture.
    #[must_use]
    pub fn texture_2d(
        label: &'static str,
        extent: Extent<u32, Px>,
        format: Format,
        usage: TextureUsage,
        initial_state: ResourceState,
    ) -> Self {
        Self {
            label,
            dimension: TextureDimension::D2,
            extent,
            depth_or_layers: 1,
            mip_levels: 1,
            format,
            usage,
            initial_state,
            clear_value: None,
        }
    }

    #[must_use]
    pub fn with_clear_value(mut self, clear_value: ClearValue) -> Self {
        self.clear_value = Some(clear_value);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryKind {
    /// GPU-local memory, not CPU visible.
    Default,
    /// CPU-writable memory that stays mapped for the lifetime of the buffer.
    Upload,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: &'static str,
    pub size: u64,
    pub memory: MemoryKind,
    pub initial_state: ResourceState,
}

impl BufferDesc {
    #[must_use]
    pub fn upload(label: &'static str, size: u64) -> Self {
        Self {
            label,
            size,
            memory: MemoryKind::Upload,
            initial_state: ResourceState::GenericRead,
        }
    }
}

/// A resource together with the state it was last transitioned to.
///
/// Every state change goes through this type so that the barrier recorded on
/// the command list always names the state the resource is actually in.
#[derive(Debug)]
pub struct TrackedResource {
    id: ResourceId,
    state: ResourceState,
}

impl TrackedResource {
    #[must_use]
    pub fn new(id: ResourceId, state: ResourceState) -> Self {
        Self { id, state }
    }

    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Moves the resource from `from` to `to` and returns the barrier that
    /// performs the transition.
    ///
    /// ## Panics
    ///
    /// Panics if the resource is not in `from`.
    pub fn transition(&mut self, from: ResourceState, to: ResourceState) -> Barrier {
        assert_eq!(
            self.state, from,
            "resource {:?} is in {:?}, not {:?}",
            self.id, self.state, from
        );

        self.state = to;
        Barrier {
            resource: self.id,
            before: from,
            after: to,
        }
    }

    /// Moves the resource to `to` from whatever state it is in. Returns `None`
    /// if it is already there and no barrier is needed.
    pub fn transition_to(&mut self, to: ResourceState) -> Option<Barrier> {
        if self.state == to {
            None
        } else {
            Some(self.transition(self.state, to))
        }
    }
}
