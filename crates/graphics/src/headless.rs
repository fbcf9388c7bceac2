//! A backend that records instead of rendering.
//!
//! The device keeps every resource, view and pipeline it creates in tables
//! that can be inspected, and the command list keeps every command it is given.
//! Descriptor addresses are synthetic but follow the same base-plus-stride
//! layout as a real heap.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use geometry::{Px, Rect, Viewport};
use smallvec::SmallVec;
use structures::slot_table::{Key, SlotTable};

use crate::{
    backend::{
        CommandList, Device, GpuAddress, PipelineDesc, ShaderBytecode, ShaderCompiler,
        ShaderSource, ShaderStage, VertexBufferView,
    },
    descriptor::DescriptorHeapStart,
    resource::{Barrier, BufferDesc, MemoryKind, TextureDesc},
    view::ViewDesc,
    Color, CpuHandle, DescriptorHeapKind, Error, GpuHandle, PipelineId, ResourceId,
    ResourceState, Result,
};

const DESCRIPTOR_STRIDE: u32 = 32;
const BUFFER_ADDRESS_BASE: u64 = 1 << 40;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Barrier(SmallVec<[Barrier; 2]>),
    SetRenderTargets {
        render_targets: SmallVec<[CpuHandle; 1]>,
        depth_stencil: Option<CpuHandle>,
    },
    ClearRenderTarget {
        render_target: CpuHandle,
        color: Color,
    },
    ClearDepthStencil {
        depth_stencil: CpuHandle,
        depth: f32,
        stencil: u8,
    },
    SetViewport(Viewport),
    SetScissorRect(Rect<u32, Px>),
    SetPipeline(PipelineId),
    SetDescriptorHeaps,
    SetDescriptorTable {
        root_index: u32,
        base: GpuHandle,
    },
    SetConstantBuffer {
        root_index: u32,
        address: GpuAddress,
    },
    SetVertexBuffer(VertexBufferView),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
}

#[derive(Default)]
pub struct HeadlessCommandList {
    commands: Vec<Command>,
}

impl HeadlessCommandList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    #[must_use]
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Draw { .. }))
            .count()
    }

    /// The barrier batches in recording order.
    pub fn barrier_batches(&self) -> impl Iterator<Item = &[Barrier]> + '_ {
        self.commands.iter().filter_map(|c| match c {
            Command::Barrier(barriers) => Some(barriers.as_slice()),
            _ => None,
        })
    }

    /// The render target bound for each draw, in recording order.
    #[must_use]
    pub fn draw_targets(&self) -> Vec<CpuHandle> {
        let mut current = None;
        let mut targets = Vec::new();

        for command in &self.commands {
            match command {
                Command::SetRenderTargets { render_targets, .. } => {
                    current = render_targets.first().copied();
                }
                Command::Draw { .. } => {
                    if let Some(target) = current {
                        targets.push(target);
                    }
                }
                _ => {}
            }
        }

        targets
    }
}

impl CommandList for HeadlessCommandList {
    fn resource_barrier(&mut self, barriers: &[Barrier]) {
        self.commands
            .push(Command::Barrier(SmallVec::from_slice(barriers)));
    }

    fn set_render_targets(&mut self, render_targets: &[CpuHandle], depth_stencil: Option<CpuHandle>) {
        self.commands.push(Command::SetRenderTargets {
            render_targets: SmallVec::from_slice(render_targets),
            depth_stencil,
        });
    }

    fn clear_render_target(&mut self, render_target: CpuHandle, color: Color) {
        self.commands.push(Command::ClearRenderTarget {
            render_target,
            color,
        });
    }

    fn clear_depth_stencil(&mut self, depth_stencil: CpuHandle, depth: f32, stencil: u8) {
        self.commands.push(Command::ClearDepthStencil {
            depth_stencil,
            depth,
            stencil,
        });
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.commands.push(Command::SetViewport(*viewport));
    }

    fn set_scissor_rect(&mut self, rect: &Rect<u32, Px>) {
        self.commands.push(Command::SetScissorRect(*rect));
    }

    fn set_pipeline(&mut self, pipeline: PipelineId) {
        self.commands.push(Command::SetPipeline(pipeline));
    }

    fn set_descriptor_heaps(&mut self) {
        self.commands.push(Command::SetDescriptorHeaps);
    }

    fn set_descriptor_table(&mut self, root_index: u32, base: GpuHandle) {
        self.commands
            .push(Command::SetDescriptorTable { root_index, base });
    }

    fn set_constant_buffer(&mut self, root_index: u32, address: GpuAddress) {
        self.commands
            .push(Command::SetConstantBuffer { root_index, address });
    }

    fn set_vertex_buffer(&mut self, view: &VertexBufferView) {
        self.commands.push(Command::SetVertexBuffer(*view));
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.commands.push(Command::Draw {
            vertex_count,
            instance_count,
        });
    }
}

enum Resource {
    Texture(TextureDesc),
    Buffer {
        desc: BufferDesc,
        address: GpuAddress,
        contents: Vec<u8>,
    },
}

impl Resource {
    fn label(&self) -> &'static str {
        match self {
            Self::Texture(desc) => desc.label,
            Self::Buffer { desc, .. } => desc.label,
        }
    }

    fn initial_state(&self) -> ResourceState {
        match self {
            Self::Texture(desc) => desc.initial_state,
            Self::Buffer { desc, .. } => desc.initial_state,
        }
    }
}

#[derive(Default)]
struct State {
    resources: SlotTable<Resource>,
    pipelines: SlotTable<PipelineDesc>,
    views: HashMap<CpuHandle, (ResourceId, ViewDesc)>,
    heaps: Vec<(DescriptorHeapKind, u32)>,
    next_buffer_address: u64,
    texture_budget: Option<usize>,
}

/// A device that keeps everything in memory.
///
/// Clones share the same state, so a test can keep one clone for inspection
/// after handing another to the graphics context.
#[derive(Clone, Default)]
pub struct HeadlessDevice {
    state: Rc<RefCell<State>>,
}

impl HeadlessDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn live_resource_count(&self) -> usize {
        self.state.borrow().resources.len()
    }

    #[must_use]
    pub fn live_pipeline_count(&self) -> usize {
        self.state.borrow().pipelines.len()
    }

    #[must_use]
    pub fn is_live(&self, resource: ResourceId) -> bool {
        self.state
            .borrow()
            .resources
            .contains(Key::from_bits(resource.raw()))
    }

    #[must_use]
    pub fn resource_label(&self, resource: ResourceId) -> Option<&'static str> {
        self.state
            .borrow()
            .resources
            .get(Key::from_bits(resource.raw()))
            .map(Resource::label)
    }

    #[must_use]
    pub fn initial_state(&self, resource: ResourceId) -> Option<ResourceState> {
        self.state
            .borrow()
            .resources
            .get(Key::from_bits(resource.raw()))
            .map(Resource::initial_state)
    }

    #[must_use]
    pub fn texture_desc(&self, resource: ResourceId) -> Option<TextureDesc> {
        match self
            .state
            .borrow()
            .resources
            .get(Key::from_bits(resource.raw()))
        {
            Some(Resource::Texture(desc)) => Some(desc.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn buffer_contents(&self, resource: ResourceId) -> Option<Vec<u8>> {
        match self
            .state
            .borrow()
            .resources
            .get(Key::from_bits(resource.raw()))
        {
            Some(Resource::Buffer { contents, .. }) => Some(contents.clone()),
            _ => None,
        }
    }

    /// The buffer whose GPU address range contains `address`.
    #[must_use]
    pub fn buffer_at(&self, address: GpuAddress) -> Option<ResourceId> {
        let state = self.state.borrow();
        let found = state.resources.iter().find_map(|(key, resource)| match resource {
            Resource::Buffer {
                desc,
                address: base,
                ..
            } if (base.0..base.0 + desc.size).contains(&address.0) => {
                Some(ResourceId::new(key.to_bits()))
            }
            _ => None,
        });
        found
    }

    #[must_use]
    pub fn view_at(&self, handle: CpuHandle) -> Option<(ResourceId, ViewDesc)> {
        self.state.borrow().views.get(&handle).copied()
    }

    #[must_use]
    pub fn pipeline_label(&self, pipeline: PipelineId) -> Option<&'static str> {
        self.state
            .borrow()
            .pipelines
            .get(Key::from_bits(pipeline.raw()))
            .map(|desc| desc.label)
    }

    /// Lets the next `count` textures be created and fails every texture
    /// after that, as if the device had run out of memory.
    pub fn fail_textures_after(&self, count: usize) {
        self.state.borrow_mut().texture_budget = Some(count);
    }

    /// The heaps created so far, in creation order.
    #[must_use]
    pub fn heaps(&self) -> Vec<(DescriptorHeapKind, u32)> {
        self.state.borrow().heaps.clone()
    }
}

impl Device for HeadlessDevice {
    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorHeapKind,
        capacity: u32,
    ) -> Result<DescriptorHeapStart> {
        let mut state = self.state.borrow_mut();
        state.heaps.push((kind, capacity));

        // Each heap gets its own 4 GiB window so handles never overlap.
        let base = (state.heaps.len() as u64) << 32;
        Ok(DescriptorHeapStart {
            cpu: CpuHandle(base),
            gpu: if kind.is_shader_visible() {
                GpuHandle(base | 1 << 48)
            } else {
                GpuHandle::NULL
            },
            stride: DESCRIPTOR_STRIDE,
        })
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<ResourceId> {
        let mut state = self.state.borrow_mut();
        match &mut state.texture_budget {
            Some(0) => {
                return Err(Error::Device(format!(
                    "out of memory for texture `{}`",
                    desc.label
                )))
            }
            Some(remaining) => *remaining -= 1,
            None => {}
        }

        let key = state.resources.insert(Resource::Texture(desc.clone()));
        Ok(ResourceId::new(key.to_bits()))
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<ResourceId> {
        let mut state = self.state.borrow_mut();

        let address = GpuAddress(BUFFER_ADDRESS_BASE + state.next_buffer_address);
        state.next_buffer_address += crate::next_multiple_of(desc.size.max(1), 256);

        let contents = match desc.memory {
            MemoryKind::Upload => vec![0; desc.size as usize],
            MemoryKind::Default => Vec::new(),
        };

        let key = state.resources.insert(Resource::Buffer {
            desc: desc.clone(),
            address,
            contents,
        });
        Ok(ResourceId::new(key.to_bits()))
    }

    fn write_buffer(&mut self, buffer: ResourceId, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        match state.resources.get_mut(Key::from_bits(buffer.raw())) {
            Some(Resource::Buffer {
                desc, contents, ..
            }) if desc.memory == MemoryKind::Upload => {
                let start = offset as usize;
                let end = start + data.len();
                if end > contents.len() {
                    return Err(Error::Device(format!(
                        "write of {} bytes at {offset} overruns `{}` ({} bytes)",
                        data.len(),
                        desc.label,
                        desc.size
                    )));
                }
                contents[start..end].copy_from_slice(data);
                Ok(())
            }
            Some(_) => Err(Error::Device(format!(
                "{buffer:?} is not a CPU-writable buffer"
            ))),
            None => Err(Error::UnknownResource(buffer)),
        }
    }

    fn gpu_address(&self, buffer: ResourceId) -> Result<GpuAddress> {
        match self
            .state
            .borrow()
            .resources
            .get(Key::from_bits(buffer.raw()))
        {
            Some(Resource::Buffer { address, .. }) => Ok(*address),
            Some(Resource::Texture(_)) => Err(Error::Device(format!(
                "{buffer:?} is a texture and has no GPU address"
            ))),
            None => Err(Error::UnknownResource(buffer)),
        }
    }

    fn destroy_resource(&mut self, resource: ResourceId) {
        let mut state = self.state.borrow_mut();
        if state
            .resources
            .remove(Key::from_bits(resource.raw()))
            .is_some()
        {
            state.views.retain(|_, (id, _)| *id != resource);
        }
    }

    fn create_view(
        &mut self,
        resource: ResourceId,
        desc: &ViewDesc,
        destination: CpuHandle,
    ) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.resources.contains(Key::from_bits(resource.raw())) {
            return Err(Error::UnknownResource(resource));
        }

        state.views.insert(destination, (resource, *desc));
        Ok(())
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineId> {
        let key = self.state.borrow_mut().pipelines.insert(desc.clone());
        Ok(PipelineId::new(key.to_bits()))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineId) {
        let _ = self
            .state
            .borrow_mut()
            .pipelines
            .remove(Key::from_bits(pipeline.raw()));
    }
}

/// Produces placeholder bytecode naming the shader it was compiled from.
#[derive(Default)]
pub struct HeadlessShaderCompiler {
    missing: Vec<String>,
    compiled: RefCell<Vec<ShaderSource>>,
}

impl HeadlessShaderCompiler {
    /// A compiler that fails for any shader whose file name is in `missing`.
    #[must_use]
    pub fn with_missing(missing: &[&str]) -> Self {
        Self {
            missing: missing.iter().map(|s| (*s).to_owned()).collect(),
            compiled: RefCell::default(),
        }
    }

    #[must_use]
    pub fn compiled_count(&self) -> usize {
        self.compiled.borrow().len()
    }
}

impl ShaderCompiler for HeadlessShaderCompiler {
    fn compile(&self, source: &ShaderSource) -> Result<ShaderBytecode> {
        let file_name = source
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if self.missing.contains(&file_name) {
            return Err(Error::ShaderCompilation {
                path: source.path.display().to_string(),
                message: "file not found".to_owned(),
            });
        }

        self.compiled.borrow_mut().push(source.clone());

        let stage = match source.stage {
            ShaderStage::Vertex => "vs",
            ShaderStage::Pixel => "ps",
        };
        Ok(ShaderBytecode(
            format!("{}:{}:{stage}", source.path.display(), source.entry_point).into_bytes(),
        ))
    }
}
