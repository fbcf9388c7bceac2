//! The engine context: one device, its descriptor heaps, and the per-frame
//! back buffer bookkeeping.

use std::{
    cell::{Ref, RefCell, RefMut},
    path::PathBuf,
    rc::Rc,
};

use geometry::{Extent, Px, Rect, Viewport};
use log::{debug, info};

use crate::{
    backend::{CommandList, Device, ShaderBytecode, ShaderCompiler, ShaderSource, ShaderStage, SwapChain},
    descriptor::{DescriptorHeaps, DescriptorSlot},
    resource::{ClearValue, TextureDesc, TextureUsage, TrackedResource},
    view::ViewFactory,
    Color, CpuHandle, DescriptorHeapKind, Format, GpuHandle, GraphicsConfig, ResourceState,
    Result,
};

/// State shared by everything that owns GPU objects.
///
/// Owners hold an `Rc` to this and give their descriptors and resources back
/// when they are dropped.
pub struct DeviceContext {
    device: RefCell<Box<dyn Device>>,
    descriptors: RefCell<DescriptorHeaps>,
    shaders: Box<dyn ShaderCompiler>,
    shader_directory: PathBuf,
}

impl DeviceContext {
    /// Creates the descriptor heaps on `device` with the capacities in
    /// `config`.
    ///
    /// ## Errors
    ///
    /// Returns the device's error if a heap cannot be created.
    pub fn new(
        mut device: Box<dyn Device>,
        shaders: Box<dyn ShaderCompiler>,
        config: &GraphicsConfig,
    ) -> Result<Self> {
        let descriptors = DescriptorHeaps::new(&mut *device, &config.descriptor_heaps)?;

        debug!(
            "descriptor heaps: {} RTV, {} DSV, {} SRV",
            config.descriptor_heaps.rtv_capacity,
            config.descriptor_heaps.dsv_capacity,
            config.descriptor_heaps.srv_capacity
        );

        Ok(Self {
            device: RefCell::new(device),
            descriptors: RefCell::new(descriptors),
            shaders,
            shader_directory: config.shader_directory.clone(),
        })
    }

    /// ## Panics
    ///
    /// Panics if the device is already borrowed.
    pub fn device(&self) -> RefMut<'_, Box<dyn Device>> {
        self.device.borrow_mut()
    }

    pub fn descriptors(&self) -> Ref<'_, DescriptorHeaps> {
        self.descriptors.borrow()
    }

    pub fn descriptors_mut(&self) -> RefMut<'_, DescriptorHeaps> {
        self.descriptors.borrow_mut()
    }

    /// See [`DescriptorSlotAllocator::allocate`].
    ///
    /// [`DescriptorSlotAllocator::allocate`]: crate::descriptor::DescriptorSlotAllocator::allocate
    pub fn allocate(&self, kind: DescriptorHeapKind) -> Result<DescriptorSlot> {
        self.descriptors.borrow_mut().allocate(kind)
    }

    pub fn release(&self, slot: &DescriptorSlot) {
        self.descriptors.borrow_mut().release(slot);
    }

    /// Compiles `entry_point` from `file`, which is looked up in the shader
    /// directory.
    pub fn compile_shader(
        &self,
        file: &str,
        entry_point: &'static str,
        stage: ShaderStage,
    ) -> Result<ShaderBytecode> {
        self.shaders.compile(&ShaderSource {
            path: self.shader_directory.join(file),
            entry_point,
            stage,
        })
    }
}

/// The render target and depth buffer for the frame being recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTarget {
    pub back_buffer_index: u32,
    pub rtv: CpuHandle,
    pub dsv: CpuHandle,
    pub extent: Extent<u32, Px>,
}

struct BackBuffer {
    resource: TrackedResource,
    rtv: DescriptorSlot,
}

/// The top-level owner of the graphics device.
///
/// On creation the low slots of each heap are reserved: RTVs `0..n` for the
/// `n` back buffers, DSV `0` for the main depth buffer, and SRV `0` for the
/// debug UI font texture.
pub struct GraphicsContext {
    context: Rc<DeviceContext>,
    back_buffers: Vec<BackBuffer>,
    back_buffer_format: Format,
    depth: TrackedResource,
    main_dsv: DescriptorSlot,
    ui_srv: DescriptorSlot,
    extent: Extent<u32, Px>,
    clear_color: Color,
}

impl GraphicsContext {
    pub const DEPTH_FORMAT: Format = Format::D24UnormS8Uint;

    /// ## Errors
    ///
    /// Fails if the heaps are too small for the reserved slots or if the
    /// device cannot create the heaps, the main depth buffer, or their views.
    pub fn new(
        device: Box<dyn Device>,
        shaders: Box<dyn ShaderCompiler>,
        swap_chain: &dyn SwapChain,
        config: &GraphicsConfig,
    ) -> Result<Self> {
        let context = Rc::new(DeviceContext::new(device, shaders, config)?);
        let extent = swap_chain.extent();

        let (rtvs, main_dsv, ui_srv) = {
            let mut descriptors = context.descriptors_mut();
            let rtvs = (0..swap_chain.back_buffer_count())
                .map(|i| descriptors.reserve(DescriptorHeapKind::Rtv, i))
                .collect::<Result<Vec<_>>>()?;
            let main_dsv = descriptors.reserve(DescriptorHeapKind::Dsv, 0)?;
            let ui_srv = descriptors.reserve(DescriptorHeapKind::Srv, 0)?;
            (rtvs, main_dsv, ui_srv)
        };

        let depth = {
            let mut device = context.device();

            let depth = device.create_texture(
                &TextureDesc::texture_2d(
                    "Main Depth Buffer",
                    extent,
                    Self::DEPTH_FORMAT,
                    TextureUsage::DEPTH_STENCIL,
                    ResourceState::DepthWrite,
                )
                .with_clear_value(ClearValue::DepthStencil {
                    depth: 1.0,
                    stencil: 0,
                }),
            )?;

            let mut views = ViewFactory::new(&mut **device);
            views.texture_2d_dsv(depth, &main_dsv, Self::DEPTH_FORMAT)?;
            for (i, rtv) in rtvs.iter().enumerate() {
                views.texture_2d_rtv(swap_chain.back_buffer(i as u32), rtv, swap_chain.format())?;
            }

            depth
        };

        let back_buffers = rtvs
            .into_iter()
            .enumerate()
            .map(|(i, rtv)| BackBuffer {
                resource: TrackedResource::new(
                    swap_chain.back_buffer(i as u32),
                    ResourceState::Present,
                ),
                rtv,
            })
            .collect();

        info!(
            "graphics context ready: {}x{}, {} back buffers",
            extent.width,
            extent.height,
            swap_chain.back_buffer_count()
        );

        Ok(Self {
            context,
            back_buffers,
            back_buffer_format: swap_chain.format(),
            depth: TrackedResource::new(depth, ResourceState::DepthWrite),
            main_dsv,
            ui_srv,
            extent,
            clear_color: config.clear_color,
        })
    }

    #[must_use]
    pub fn context(&self) -> &Rc<DeviceContext> {
        &self.context
    }

    #[must_use]
    pub fn extent(&self) -> Extent<u32, Px> {
        self.extent
    }

    #[must_use]
    pub fn back_buffer_format(&self) -> Format {
        self.back_buffer_format
    }

    pub fn allocate_rtv(&self) -> Result<DescriptorSlot> {
        self.context.allocate(DescriptorHeapKind::Rtv)
    }

    pub fn allocate_dsv(&self) -> Result<DescriptorSlot> {
        self.context.allocate(DescriptorHeapKind::Dsv)
    }

    pub fn allocate_srv(&self) -> Result<DescriptorSlot> {
        self.context.allocate(DescriptorHeapKind::Srv)
    }

    pub fn release_rtv(&self, index: u32) {
        self.release(DescriptorHeapKind::Rtv, index);
    }

    pub fn release_dsv(&self, index: u32) {
        self.release(DescriptorHeapKind::Dsv, index);
    }

    pub fn release_srv(&self, index: u32) {
        self.release(DescriptorHeapKind::Srv, index);
    }

    fn release(&self, kind: DescriptorHeapKind, index: u32) {
        self.context
            .descriptors_mut()
            .heap_mut(kind)
            .release(index);
    }

    #[must_use]
    pub fn cpu_handle(&self, kind: DescriptorHeapKind, index: u32) -> CpuHandle {
        self.context.descriptors().heap(kind).cpu_handle(index)
    }

    #[must_use]
    pub fn gpu_handle(&self, kind: DescriptorHeapKind, index: u32) -> GpuHandle {
        self.context.descriptors().heap(kind).gpu_handle(index)
    }

    #[must_use]
    pub fn back_buffer_rtv(&self, index: u32) -> CpuHandle {
        self.back_buffers[index as usize].rtv.cpu
    }

    #[must_use]
    pub fn main_dsv(&self) -> CpuHandle {
        self.main_dsv.cpu
    }

    /// The reserved SRV for the debug UI. No view is written to it here.
    #[must_use]
    pub fn ui_srv(&self) -> DescriptorSlot {
        self.ui_srv
    }

    /// Transitions the current back buffer to a render target, binds it with
    /// the main depth buffer, and clears both.
    pub fn begin_frame(
        &mut self,
        command_list: &mut dyn CommandList,
        swap_chain: &dyn SwapChain,
    ) -> FrameTarget {
        let index = swap_chain.current_back_buffer_index();
        let back_buffer = &mut self.back_buffers[index as usize];

        let barrier = back_buffer
            .resource
            .transition(ResourceState::Present, ResourceState::RenderTarget);
        command_list.resource_barrier(&[barrier]);

        let target = FrameTarget {
            back_buffer_index: index,
            rtv: back_buffer.rtv.cpu,
            dsv: self.main_dsv.cpu,
            extent: self.extent,
        };

        command_list.set_render_targets(&[target.rtv], Some(target.dsv));
        command_list.clear_render_target(target.rtv, self.clear_color);
        command_list.clear_depth_stencil(target.dsv, 1.0, 0);
        command_list.set_viewport(&Viewport::from_extent(self.extent));
        command_list.set_scissor_rect(&Rect::from_extent(self.extent));

        target
    }

    /// Transitions the back buffer back to the present state.
    pub fn end_frame(&mut self, command_list: &mut dyn CommandList, target: &FrameTarget) {
        let barrier = self.back_buffers[target.back_buffer_index as usize]
            .resource
            .transition(ResourceState::RenderTarget, ResourceState::Present);
        command_list.resource_barrier(&[barrier]);
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        {
            let mut descriptors = self.context.descriptors_mut();
            for back_buffer in &self.back_buffers {
                descriptors.release(&back_buffer.rtv);
            }
            descriptors.release(&self.main_dsv);
            descriptors.release(&self.ui_srv);
        }

        self.context.device().destroy_resource(self.depth.id());
    }
}
