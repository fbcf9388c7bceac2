//! Render-to-texture surfaces.
//!
//! An [`OffscreenSurface`] is a color texture and a depth texture of the same
//! size, with an RTV, a DSV, and an SRV for each texture. The surface is
//! either being drawn into (color in `RenderTarget`, depth in `DepthWrite`)
//! or being read by a later pass (both in `PixelShaderResource`).

use std::rc::Rc;

use geometry::{Extent, Px, Rect, Viewport};
use log::debug;
use smallvec::SmallVec;

use crate::{
    backend::CommandList,
    context::DeviceContext,
    descriptor::DescriptorSlot,
    resource::{Barrier, ClearValue, TextureDesc, TextureUsage, TrackedResource},
    view::ViewFactory,
    Color, CpuHandle, DescriptorHeapKind, Format, GpuHandle, ResourceId, ResourceState, Result,
};

#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceDesc {
    pub label: &'static str,
    pub extent: Extent<u32, Px>,
    pub color_format: Format,
    pub clear_color: Color,
    /// The state the depth texture is created in. The color texture always
    /// starts out readable.
    pub initial_depth_state: ResourceState,
}

/// Where a full-screen pass writes to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PassOutput {
    pub rtv: CpuHandle,
    pub extent: Extent<u32, Px>,
    pub clear_color: Color,
}

pub struct OffscreenSurface {
    context: Rc<DeviceContext>,
    color: TrackedResource,
    depth: TrackedResource,
    rtv: DescriptorSlot,
    dsv: DescriptorSlot,
    srv: DescriptorSlot,
    depth_srv: DescriptorSlot,
    extent: Extent<u32, Px>,
    clear_color: Color,
}

impl OffscreenSurface {
    /// Typeless so that it can be viewed both as a depth buffer and as a
    /// texture.
    pub const DEPTH_FORMAT: Format = Format::R24G8Typeless;
    pub const DEPTH_VIEW_FORMAT: Format = Format::D24UnormS8Uint;
    pub const DEPTH_READ_FORMAT: Format = Format::R24UnormX8Typeless;

    /// ## Panics
    ///
    /// Panics if any of the four descriptor slots cannot be allocated. A
    /// surface without its full set of views cannot be used.
    ///
    /// ## Errors
    ///
    /// Returns the device's error if a texture or view cannot be created. The
    /// slots and textures created up to that point are released.
    pub fn new(context: &Rc<DeviceContext>, desc: &SurfaceDesc) -> Result<Self> {
        let mut parts = PartialSurface::new(context);

        let rtv = parts.allocate(DescriptorHeapKind::Rtv, desc.label);
        let dsv = parts.allocate(DescriptorHeapKind::Dsv, desc.label);
        let srv = parts.allocate(DescriptorHeapKind::Srv, desc.label);
        let depth_srv = parts.allocate(DescriptorHeapKind::Srv, desc.label);

        let color = parts.create_texture(
            &TextureDesc::texture_2d(
                desc.label,
                desc.extent,
                desc.color_format,
                TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
                ResourceState::PixelShaderResource,
            )
            .with_clear_value(ClearValue::Color(desc.clear_color)),
        )?;

        let depth = parts.create_texture(
            &TextureDesc::texture_2d(
                desc.label,
                desc.extent,
                Self::DEPTH_FORMAT,
                TextureUsage::DEPTH_STENCIL | TextureUsage::SHADER_RESOURCE,
                desc.initial_depth_state,
            )
            .with_clear_value(ClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0,
            }),
        )?;

        {
            let mut device = context.device();
            let mut views = ViewFactory::new(&mut **device);
            views.texture_2d_rtv(color, &rtv, desc.color_format)?;
            views.texture_2d_srv(color, &srv, desc.color_format, 1)?;
            views.texture_2d_dsv(depth, &dsv, Self::DEPTH_VIEW_FORMAT)?;
            views.texture_2d_srv(depth, &depth_srv, Self::DEPTH_READ_FORMAT, 1)?;
        }

        parts.keep();

        debug!(
            "offscreen surface `{}`: {}x{}, rtv {}, dsv {}, srv {}, depth srv {}",
            desc.label,
            desc.extent.width,
            desc.extent.height,
            rtv.index,
            dsv.index,
            srv.index,
            depth_srv.index
        );

        Ok(Self {
            context: context.clone(),
            color: TrackedResource::new(color, ResourceState::PixelShaderResource),
            depth: TrackedResource::new(depth, desc.initial_depth_state),
            rtv,
            dsv,
            srv,
            depth_srv,
            extent: desc.extent,
            clear_color: desc.clear_color,
        })
    }

    /// Prepares the surface to be drawn into: transitions both textures to
    /// their write states, binds them, clears them, and sets the viewport and
    /// scissor to cover the surface.
    ///
    /// Only textures that are not already in their write state get a barrier.
    pub fn pre_draw(&mut self, command_list: &mut dyn CommandList) {
        let barriers = [
            self.color.transition_to(ResourceState::RenderTarget),
            self.depth.transition_to(ResourceState::DepthWrite),
        ]
        .into_iter()
        .flatten()
        .collect::<SmallVec<[Barrier; 2]>>();

        if !barriers.is_empty() {
            command_list.resource_barrier(&barriers);
        }

        command_list.set_render_targets(&[self.rtv.cpu], Some(self.dsv.cpu));
        command_list.clear_render_target(self.rtv.cpu, self.clear_color);
        command_list.clear_depth_stencil(self.dsv.cpu, 1.0, 0);
        command_list.set_viewport(&Viewport::from_extent(self.extent));
        command_list.set_scissor_rect(&Rect::from_extent(self.extent));
    }

    /// Makes both textures readable by later passes.
    pub fn post_draw(&mut self, command_list: &mut dyn CommandList) {
        let barriers = [
            self.color.transition_to(ResourceState::PixelShaderResource),
            self.depth.transition_to(ResourceState::PixelShaderResource),
        ]
        .into_iter()
        .flatten()
        .collect::<SmallVec<[Barrier; 2]>>();

        if !barriers.is_empty() {
            command_list.resource_barrier(&barriers);
        }
    }

    /// Transitions only the color texture to `RenderTarget`, for passes that
    /// do not use depth.
    ///
    /// ## Panics
    ///
    /// Panics if the color texture is not readable.
    pub fn begin_color_write(&mut self, command_list: &mut dyn CommandList) {
        let barrier = self.color.transition(
            ResourceState::PixelShaderResource,
            ResourceState::RenderTarget,
        );
        command_list.resource_barrier(&[barrier]);
    }

    /// ## Panics
    ///
    /// Panics if the color texture is not a render target.
    pub fn end_color_write(&mut self, command_list: &mut dyn CommandList) {
        let barrier = self.color.transition(
            ResourceState::RenderTarget,
            ResourceState::PixelShaderResource,
        );
        command_list.resource_barrier(&[barrier]);
    }

    #[must_use]
    pub fn pass_output(&self) -> PassOutput {
        PassOutput {
            rtv: self.rtv.cpu,
            extent: self.extent,
            clear_color: self.clear_color,
        }
    }

    #[must_use]
    pub fn rtv(&self) -> CpuHandle {
        self.rtv.cpu
    }

    #[must_use]
    pub fn dsv(&self) -> CpuHandle {
        self.dsv.cpu
    }

    #[must_use]
    pub fn srv(&self) -> GpuHandle {
        self.srv.gpu
    }

    #[must_use]
    pub fn depth_srv(&self) -> GpuHandle {
        self.depth_srv.gpu
    }

    #[must_use]
    pub fn color_resource(&self) -> ResourceId {
        self.color.id()
    }

    #[must_use]
    pub fn depth_resource(&self) -> ResourceId {
        self.depth.id()
    }

    #[must_use]
    pub fn color_state(&self) -> ResourceState {
        self.color.state()
    }

    #[must_use]
    pub fn depth_state(&self) -> ResourceState {
        self.depth.state()
    }

    #[must_use]
    pub fn extent(&self) -> Extent<u32, Px> {
        self.extent
    }

    /// The four descriptor slots, in RTV, DSV, SRV, depth SRV order.
    #[must_use]
    pub fn slots(&self) -> [DescriptorSlot; 4] {
        [self.rtv, self.dsv, self.srv, self.depth_srv]
    }
}

impl Drop for OffscreenSurface {
    fn drop(&mut self) {
        {
            let mut descriptors = self.context.descriptors_mut();
            for slot in self.slots() {
                descriptors.release(&slot);
            }
        }

        let mut device = self.context.device();
        device.destroy_resource(self.color.id());
        device.destroy_resource(self.depth.id());
    }
}

/// The slots and textures of a surface that is still being built. Whatever
/// it holds is given back on drop unless [`PartialSurface::keep`] was called.
struct PartialSurface<'a> {
    context: &'a DeviceContext,
    slots: SmallVec<[DescriptorSlot; 4]>,
    textures: SmallVec<[ResourceId; 2]>,
}

impl<'a> PartialSurface<'a> {
    fn new(context: &'a DeviceContext) -> Self {
        Self {
            context,
            slots: SmallVec::new(),
            textures: SmallVec::new(),
        }
    }

    fn allocate(&mut self, kind: DescriptorHeapKind, label: &str) -> DescriptorSlot {
        match self.context.allocate(kind) {
            Ok(slot) => {
                self.slots.push(slot);
                slot
            }
            Err(e) => panic!("offscreen surface `{label}` needs a {kind} slot: {e}"),
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<ResourceId> {
        let texture = self.context.device().create_texture(desc)?;
        self.textures.push(texture);
        Ok(texture)
    }

    fn keep(mut self) {
        self.slots.clear();
        self.textures.clear();
    }
}

impl Drop for PartialSurface<'_> {
    fn drop(&mut self) {
        for slot in &self.slots {
            self.context.release(slot);
        }

        if !self.textures.is_empty() {
            let mut device = self.context.device();
            for texture in &self.textures {
                device.destroy_resource(*texture);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        headless::{Command, HeadlessShaderCompiler, HeadlessDevice},
        testing::{commands, device_context},
        view::ViewDesc,
        DescriptorHeapConfig, Error, GraphicsConfig,
    };

    fn desc(initial_depth_state: ResourceState) -> SurfaceDesc {
        SurfaceDesc {
            label: "test surface",
            extent: Extent::new(320, 240),
            color_format: Format::Rgba8Unorm,
            clear_color: Color::BLUE,
            initial_depth_state,
        }
    }

    #[test]
    fn creates_all_views() {
        let (device, context) = device_context();
        let surface = OffscreenSurface::new(&context, &desc(ResourceState::PixelShaderResource)).unwrap();

        assert_eq!(
            device.view_at(surface.rtv()),
            Some((
                surface.color_resource(),
                ViewDesc::Texture2dRtv {
                    format: Format::Rgba8Unorm
                }
            ))
        );
        assert_eq!(
            device.view_at(surface.dsv()),
            Some((
                surface.depth_resource(),
                ViewDesc::Texture2dDsv {
                    format: Format::D24UnormS8Uint
                }
            ))
        );

        let [_, _, srv, depth_srv] = surface.slots();
        assert_eq!(srv.gpu, surface.srv());
        assert_eq!(
            device.view_at(depth_srv.cpu),
            Some((
                surface.depth_resource(),
                ViewDesc::Texture2dSrv {
                    format: Format::R24UnormX8Typeless,
                    mip_levels: 1
                }
            ))
        );

        assert_eq!(surface.color_state(), ResourceState::PixelShaderResource);
        assert_eq!(
            device.initial_state(surface.color_resource()),
            Some(ResourceState::PixelShaderResource)
        );
    }

    #[test]
    fn pre_and_post_draw_batch_barriers() {
        let (_device, context) = device_context();
        let mut surface = OffscreenSurface::new(&context, &desc(ResourceState::PixelShaderResource)).unwrap();
        let mut cmd = commands();

        surface.pre_draw(&mut cmd);
        assert_eq!(surface.color_state(), ResourceState::RenderTarget);
        assert_eq!(surface.depth_state(), ResourceState::DepthWrite);

        surface.post_draw(&mut cmd);
        assert_eq!(surface.color_state(), ResourceState::PixelShaderResource);
        assert_eq!(surface.depth_state(), ResourceState::PixelShaderResource);

        let batches = cmd.barrier_batches().collect::<Vec<_>>();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 2);

        assert_eq!(
            cmd.commands()[1],
            Command::SetRenderTargets {
                render_targets: SmallVec::from_slice(&[surface.rtv()]),
                depth_stencil: Some(surface.dsv()),
            }
        );
    }

    #[test]
    fn depth_already_writable_gets_no_barrier() {
        let (_device, context) = device_context();
        let mut surface = OffscreenSurface::new(&context, &desc(ResourceState::DepthWrite)).unwrap();
        let mut cmd = commands();

        surface.pre_draw(&mut cmd);

        let batches = cmd.barrier_batches().collect::<Vec<_>>();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].resource, surface.color_resource());
    }

    #[test]
    fn drop_releases_everything() {
        let (device, context) = device_context();

        let surface = OffscreenSurface::new(&context, &desc(ResourceState::PixelShaderResource)).unwrap();
        assert_eq!(device.live_resource_count(), 2);
        assert_eq!(
            context.descriptors().heap(DescriptorHeapKind::Srv).used_count(),
            2
        );

        drop(surface);
        assert_eq!(device.live_resource_count(), 0);
        for kind in DescriptorHeapKind::ALL {
            assert_eq!(context.descriptors().heap(kind).used_count(), 0);
        }
    }

    #[test]
    #[should_panic(expected = "needs a DSV slot")]
    fn panics_without_slots() {
        let config = GraphicsConfig {
            descriptor_heaps: DescriptorHeapConfig {
                dsv_capacity: 0,
                ..DescriptorHeapConfig::default()
            },
            ..GraphicsConfig::default()
        };
        let context = Rc::new(
            DeviceContext::new(
                Box::new(HeadlessDevice::new()),
                Box::new(HeadlessShaderCompiler::default()),
                &config,
            )
            .unwrap(),
        );

        let _ = OffscreenSurface::new(&context, &desc(ResourceState::PixelShaderResource));
    }

    #[test]
    fn failed_creation_gives_back_slots_and_textures() {
        // Fails on the color texture, then on the depth texture.
        for successful_textures in [0, 1] {
            let (device, context) = device_context();
            device.fail_textures_after(successful_textures);

            let result = OffscreenSurface::new(&context, &desc(ResourceState::PixelShaderResource));
            assert!(matches!(result, Err(Error::Device(_))));

            assert_eq!(device.live_resource_count(), 0);
            for kind in DescriptorHeapKind::ALL {
                assert_eq!(context.descriptors().heap(kind).used_count(), 0);
            }
        }
    }

    #[test]
    fn failed_creation_does_not_shrink_the_heaps() {
        let (device, context) = device_context();
        let capacity = context.descriptors().heap(DescriptorHeapKind::Dsv).capacity();

        device.fail_textures_after(0);
        for _ in 0..capacity + 1 {
            assert!(OffscreenSurface::new(&context, &desc(ResourceState::PixelShaderResource)).is_err());
        }

        device.fail_textures_after(usize::MAX);
        let surface = OffscreenSurface::new(&context, &desc(ResourceState::PixelShaderResource)).unwrap();
        assert_eq!(surface.slots().map(|slot| slot.index), [0, 0, 0, 1]);
    }
}
