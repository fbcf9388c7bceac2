//! Rendering the scene into a texture instead of the back buffer.
//!
//! A frame with the offscreen renderer looks like this:
//!
//! ```text
//! graphics.begin_frame      back buffer -> RenderTarget
//! renderer.update(dt)
//! renderer.pre_draw         scene surface -> RenderTarget / DepthWrite
//!   ... scene draws ...
//! renderer.post_draw        scene surface -> PixelShaderResource
//! renderer.draw_offscreen_texture
//!   post-process chain, then composite onto the back buffer
//!   ... more draws on top, depth-tested against the main depth buffer ...
//! graphics.end_frame        back buffer -> Present
//! ```

use std::rc::Rc;

use geometry::{Extent, Px, Rect, Viewport};
use log::info;

use crate::{
    backend::{root, CommandList, PipelineDesc, ShaderStage},
    chain::{PostProcessChain, PostProcessDesc},
    context::{DeviceContext, FrameTarget, GraphicsContext},
    effect::FULLSCREEN_SHADER,
    fullscreen::{FullscreenTriangle, FullscreenVertex},
    surface::{OffscreenSurface, SurfaceDesc},
    Color, Format, GpuHandle, PipelineId, ResourceState, Result,
};

#[derive(Clone, Debug, PartialEq)]
pub struct OffscreenConfig {
    pub color_format: Format,
    pub clear_color: Color,
    /// Pixel shader that copies the final image onto the back buffer.
    pub composite_shader: &'static str,
}

impl Default for OffscreenConfig {
    fn default() -> Self {
        Self {
            color_format: Format::Rgba8Unorm,
            clear_color: Color::new(0.1, 0.25, 0.5, 1.0),
            composite_shader: "composite.hlsl",
        }
    }
}

pub struct OffscreenRenderer {
    chain: PostProcessChain,
    scene: OffscreenSurface,
    triangle: Rc<FullscreenTriangle>,
    composite: PipelineId,
    context: Rc<DeviceContext>,
}

impl OffscreenRenderer {
    /// Creates the scene surface at the size of the back buffer, an empty
    /// post-process chain, and the composite pipeline.
    ///
    /// The scene's depth texture starts out writable, so the first
    /// [`OffscreenRenderer::pre_draw`] only transitions the color texture.
    ///
    /// ## Panics
    ///
    /// Panics if the descriptor heaps cannot supply the slots for the scene
    /// surface and the chain's two scratch surfaces.
    ///
    /// ## Errors
    ///
    /// Fails if a shader does not compile or the device cannot create a
    /// surface, the triangle, or the composite pipeline.
    pub fn new(graphics: &GraphicsContext, config: &OffscreenConfig) -> Result<Self> {
        let context = graphics.context().clone();
        let extent = graphics.extent();

        let scene = OffscreenSurface::new(
            &context,
            &SurfaceDesc {
                label: "Offscreen Scene",
                extent,
                color_format: config.color_format,
                clear_color: config.clear_color,
                initial_depth_state: ResourceState::DepthWrite,
            },
        )?;

        let triangle = Rc::new(FullscreenTriangle::new(&context)?);

        let mut chain = PostProcessChain::new();
        chain.initialize(
            &context,
            &PostProcessDesc {
                extent,
                format: config.color_format,
                clear_color: config.clear_color,
            },
            triangle.clone(),
        )?;

        let composite = {
            let vertex_shader =
                context.compile_shader(FULLSCREEN_SHADER, "vs_main", ShaderStage::Vertex)?;
            let pixel_shader =
                context.compile_shader(config.composite_shader, "ps_main", ShaderStage::Pixel)?;

            context.device().create_pipeline(&PipelineDesc {
                label: "Offscreen Composite",
                vertex_shader,
                pixel_shader,
                input_layout: FullscreenVertex::LAYOUT,
                render_target_format: graphics.back_buffer_format(),
                depth_stencil_format: Some(GraphicsContext::DEPTH_FORMAT),
            })?
        };

        info!(
            "offscreen renderer ready: {}x{} {:?}",
            extent.width, extent.height, config.color_format
        );

        Ok(Self {
            chain,
            scene,
            triangle,
            composite,
            context,
        })
    }

    #[must_use]
    pub fn chain(&self) -> &PostProcessChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut PostProcessChain {
        &mut self.chain
    }

    #[must_use]
    pub fn scene(&self) -> &OffscreenSurface {
        &self.scene
    }

    #[must_use]
    pub fn extent(&self) -> Extent<u32, Px> {
        self.scene.extent()
    }

    #[must_use]
    pub fn composite_pipeline(&self) -> PipelineId {
        self.composite
    }

    /// Advances the post-process effects by `delta_time` seconds.
    pub fn update(&mut self, delta_time: f32) {
        self.chain.update(delta_time);
    }

    /// Redirects drawing into the scene surface.
    pub fn pre_draw(&mut self, command_list: &mut dyn CommandList) {
        self.scene.pre_draw(command_list);
    }

    /// Makes the scene readable by the post-process chain.
    pub fn post_draw(&mut self, command_list: &mut dyn CommandList) {
        self.scene.post_draw(command_list);
    }

    /// Runs the post-process chain over the scene and draws the result onto
    /// `target`, then rebinds `target` with its depth buffer so that later
    /// draws land on top of the composited image.
    ///
    /// If `restore` is given, that pipeline is bound again afterward. Returns
    /// the texture that was composited.
    pub fn draw_offscreen_texture(
        &mut self,
        command_list: &mut dyn CommandList,
        target: &FrameTarget,
        restore: Option<PipelineId>,
    ) -> GpuHandle {
        let source = self.chain.apply_effects_with_depth(
            command_list,
            self.scene.srv(),
            self.scene.depth_srv(),
        );

        command_list.set_render_targets(&[target.rtv], Some(target.dsv));
        command_list.set_viewport(&Viewport::from_extent(target.extent));
        command_list.set_scissor_rect(&Rect::from_extent(target.extent));
        command_list.set_descriptor_heaps();

        command_list.set_pipeline(self.composite);
        command_list.set_descriptor_table(root::SOURCE, source);
        self.triangle.draw(command_list);

        if let Some(pipeline) = restore {
            command_list.set_pipeline(pipeline);
        }

        source
    }
}

impl Drop for OffscreenRenderer {
    fn drop(&mut self) {
        self.context.device().destroy_pipeline(self.composite);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        effect::{DepthFog, Grayscale},
        headless::Command,
        testing::{commands, graphics_context},
    };

    #[test]
    fn first_frame_only_transitions_color() {
        let (_device, _swap_chain, graphics) = graphics_context();
        let mut renderer = OffscreenRenderer::new(&graphics, &OffscreenConfig::default()).unwrap();
        let scene_color = renderer.scene().color_resource();

        let mut cmd = commands();
        renderer.pre_draw(&mut cmd);
        renderer.post_draw(&mut cmd);
        renderer.pre_draw(&mut cmd);

        let batches = cmd.barrier_batches().collect::<Vec<_>>();
        assert_eq!(batches.len(), 3);

        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].resource, scene_color);
        assert_eq!(batches[0][0].after, ResourceState::RenderTarget);

        assert_eq!(batches[1].len(), 2);
        assert_eq!(batches[2].len(), 2);
        assert_eq!(batches[2][1].before, ResourceState::PixelShaderResource);
        assert_eq!(batches[2][1].after, ResourceState::DepthWrite);
    }

    #[test]
    fn composite_without_effects() {
        let (device, swap_chain, mut graphics) = graphics_context();
        let mut renderer = OffscreenRenderer::new(&graphics, &OffscreenConfig::default()).unwrap();

        let mut cmd = commands();
        let target = graphics.begin_frame(&mut cmd, &swap_chain);
        renderer.pre_draw(&mut cmd);
        renderer.post_draw(&mut cmd);
        let source = renderer.draw_offscreen_texture(&mut cmd, &target, None);
        assert_eq!(
            cmd.commands().last(),
            Some(&Command::Draw {
                vertex_count: 3,
                instance_count: 1
            })
        );
        graphics.end_frame(&mut cmd, &target);

        assert_eq!(source, renderer.scene().srv());
        assert_eq!(cmd.draw_count(), 1);
        assert_eq!(cmd.draw_targets(), vec![target.rtv]);

        let recorded = cmd.commands();
        assert!(recorded.contains(&Command::SetRenderTargets {
            render_targets: smallvec::smallvec![target.rtv],
            depth_stencil: Some(target.dsv),
        }));
        assert!(recorded.contains(&Command::SetDescriptorTable {
            root_index: root::SOURCE,
            base: renderer.scene().srv(),
        }));
        assert_eq!(
            device.pipeline_label(renderer.composite_pipeline()),
            Some("Offscreen Composite")
        );
    }

    #[test]
    fn effects_run_before_composite() {
        let (_device, swap_chain, mut graphics) = graphics_context();
        let mut renderer = OffscreenRenderer::new(&graphics, &OffscreenConfig::default()).unwrap();
        renderer.chain_mut().add_effect::<DepthFog>();
        renderer.chain_mut().add_effect::<Grayscale>();

        let restore = PipelineId::new(std::num::NonZeroU64::new(99).unwrap());

        let mut cmd = commands();
        let target = graphics.begin_frame(&mut cmd, &swap_chain);
        renderer.pre_draw(&mut cmd);
        renderer.post_draw(&mut cmd);
        let source = renderer.draw_offscreen_texture(&mut cmd, &target, Some(restore));

        let chain = renderer.chain();
        assert_eq!(source, chain.buffer(1).unwrap().srv());
        assert_eq!(
            cmd.draw_targets(),
            vec![
                chain.buffer(0).unwrap().rtv(),
                chain.buffer(1).unwrap().rtv(),
                target.rtv
            ]
        );

        let recorded = cmd.commands();
        assert!(recorded.contains(&Command::SetDescriptorTable {
            root_index: root::DEPTH,
            base: renderer.scene().depth_srv(),
        }));
        assert!(recorded.contains(&Command::SetDescriptorTable {
            root_index: root::SOURCE,
            base: source,
        }));
        assert_eq!(recorded.last(), Some(&Command::SetPipeline(restore)));
        assert_ne!(source, GpuHandle::NULL);
    }

    #[test]
    fn drop_releases_everything() {
        let (device, _swap_chain, graphics) = graphics_context();
        let resources = device.live_resource_count();
        let used = |kind| graphics.context().descriptors().heap(kind).used_count();
        let srvs = used(crate::DescriptorHeapKind::Srv);

        let mut renderer = OffscreenRenderer::new(&graphics, &OffscreenConfig::default()).unwrap();
        renderer.chain_mut().add_effect::<Grayscale>();
        assert_eq!(used(crate::DescriptorHeapKind::Srv), srvs + 6);

        drop(renderer);
        assert_eq!(device.live_resource_count(), resources);
        assert_eq!(device.live_pipeline_count(), 0);
        assert_eq!(used(crate::DescriptorHeapKind::Srv), srvs);
    }
}
