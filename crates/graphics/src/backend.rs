//! The seam between the renderer and a graphics API.
//!
//! Everything above this module refers to GPU objects through [`ResourceId`]
//! and [`PipelineId`] and records work through [`CommandList`]. A backend
//! owns the actual objects.

use std::path::PathBuf;

use geometry::{Px, Rect, Viewport};

use crate::{
    descriptor::DescriptorHeapStart,
    resource::{Barrier, BufferDesc, TextureDesc},
    view::ViewDesc,
    Color, CpuHandle, DescriptorHeapKind, Format, GpuHandle, PipelineId, ResourceId, Result,
};

/// Root parameter slots shared by every full-screen pipeline. The root
/// signature itself is embedded in the vertex shader.
pub mod root {
    /// Constant buffer bound to `b0`.
    pub const CONSTANTS: u32 = 0;
    /// Descriptor table with the source color texture at `t0`.
    pub const SOURCE: u32 = 1;
    /// Descriptor table with the source depth texture at `t1`.
    pub const DEPTH: u32 = 2;
}

/// GPU virtual address of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuAddress(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexBufferView {
    pub address: GpuAddress,
    pub size: u32,
    pub stride: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub semantic: &'static str,
    pub format: Format,
    pub offset: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderSource {
    pub path: PathBuf,
    pub entry_point: &'static str,
    pub stage: ShaderStage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderBytecode(pub Vec<u8>);

/// A full-screen pipeline: triangle list, no culling, no blending and no depth
/// test.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineDesc {
    pub label: &'static str,
    pub vertex_shader: ShaderBytecode,
    pub pixel_shader: ShaderBytecode,
    pub input_layout: &'static [VertexAttribute],
    pub render_target_format: Format,
    /// Format of the depth buffer bound alongside the render target, if any.
    pub depth_stencil_format: Option<Format>,
}

pub trait Device {
    /// Creates a heap with `capacity` descriptors. Only the SRV heap is shader
    /// visible.
    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorHeapKind,
        capacity: u32,
    ) -> Result<DescriptorHeapStart>;

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<ResourceId>;

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<ResourceId>;

    /// Copies `data` into an upload buffer at `offset`.
    fn write_buffer(&mut self, buffer: ResourceId, offset: u64, data: &[u8]) -> Result<()>;

    fn gpu_address(&self, buffer: ResourceId) -> Result<GpuAddress>;

    /// Destroys a resource. Unknown ids are ignored.
    fn destroy_resource(&mut self, resource: ResourceId);

    /// Writes a view of `resource` into the descriptor at `destination`.
    fn create_view(
        &mut self,
        resource: ResourceId,
        desc: &ViewDesc,
        destination: CpuHandle,
    ) -> Result<()>;

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineId>;

    /// Destroys a pipeline. Unknown ids are ignored.
    fn destroy_pipeline(&mut self, pipeline: PipelineId);
}

/// Records GPU work. Commands execute in the order they are recorded.
pub trait CommandList {
    /// Records all barriers in one call.
    fn resource_barrier(&mut self, barriers: &[Barrier]);

    fn set_render_targets(&mut self, render_targets: &[CpuHandle], depth_stencil: Option<CpuHandle>);

    fn clear_render_target(&mut self, render_target: CpuHandle, color: Color);

    fn clear_depth_stencil(&mut self, depth_stencil: CpuHandle, depth: f32, stencil: u8);

    fn set_viewport(&mut self, viewport: &Viewport);

    fn set_scissor_rect(&mut self, rect: &Rect<u32, Px>);

    /// Binds the pipeline's root signature and state, and sets the triangle
    /// list topology.
    fn set_pipeline(&mut self, pipeline: PipelineId);

    /// Binds the shader-visible descriptor heap of the device.
    fn set_descriptor_heaps(&mut self);

    fn set_descriptor_table(&mut self, root_index: u32, base: GpuHandle);

    fn set_constant_buffer(&mut self, root_index: u32, address: GpuAddress);

    fn set_vertex_buffer(&mut self, view: &VertexBufferView);

    fn draw(&mut self, vertex_count: u32, instance_count: u32);
}

pub trait ShaderCompiler {
    fn compile(&self, source: &ShaderSource) -> Result<ShaderBytecode>;
}

/// The images presented to the screen.
pub trait SwapChain {
    fn back_buffer_count(&self) -> u32;

    fn current_back_buffer_index(&self) -> u32;

    fn back_buffer(&self, index: u32) -> ResourceId;

    fn format(&self) -> Format;

    fn extent(&self) -> geometry::Extent<u32, Px>;
}
