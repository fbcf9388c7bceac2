//! Full-screen post-process effects.
//!
//! An effect reads one texture (two for depth-aware effects) and writes one
//! render target with a single full-screen triangle. Each effect owns its
//! pipeline and a small upload buffer holding its parameters.

mod depth_fog;
mod dissolve;
mod grayscale;
mod rgb_shift;
mod vignette;

use std::{any::Any, rc::Rc};

use bytemuck::Pod;
use geometry::{Rect, Viewport};
use log::{debug, warn};

pub use depth_fog::{DepthFog, DepthFogParams};
pub use dissolve::{Dissolve, DissolveParams};
pub use grayscale::{Grayscale, GrayscaleParams};
pub use rgb_shift::{RgbShift, RgbShiftParams};
pub use vignette::{Vignette, VignetteParams};

use crate::{
    backend::{root, CommandList, GpuAddress, PipelineDesc, ShaderStage},
    context::DeviceContext,
    fullscreen::{FullscreenTriangle, FullscreenVertex},
    resource::BufferDesc,
    surface::PassOutput,
    Format, GpuHandle, PipelineId, ResourceId, Result,
};

/// Shader file with the vertex stage and root signature shared by every
/// full-screen pass.
pub const FULLSCREEN_SHADER: &str = "fullscreen.hlsl";

/// Constant buffers must start on a 256-byte boundary.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

struct PassResources {
    context: Rc<DeviceContext>,
    pipeline: PipelineId,
    constants: ResourceId,
    constants_address: GpuAddress,
}

impl Drop for PassResources {
    fn drop(&mut self) {
        let mut device = self.context.device();
        device.destroy_pipeline(self.pipeline);
        device.destroy_resource(self.constants);
    }
}

/// The GPU half of an effect: its pipeline, its constant buffer, and whether
/// it should run.
///
/// Concrete effects embed one of these and forward to it.
pub struct EffectPass {
    label: &'static str,
    pixel_shader: &'static str,
    enabled: bool,
    gpu: Option<PassResources>,
}

impl EffectPass {
    /// An enabled, uninitialized pass that will draw with `pixel_shader`.
    #[must_use]
    pub fn new(label: &'static str, pixel_shader: &'static str) -> Self {
        Self {
            label,
            pixel_shader,
            enabled: true,
            gpu: None,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.gpu.is_some()
    }

    /// Whether [`EffectPass::draw`] would record anything.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.enabled && self.gpu.is_some()
    }

    #[must_use]
    pub fn pipeline(&self) -> Option<PipelineId> {
        self.gpu.as_ref().map(|gpu| gpu.pipeline)
    }

    #[must_use]
    pub fn constants(&self) -> Option<ResourceId> {
        self.gpu.as_ref().map(|gpu| gpu.constants)
    }

    /// Compiles the shaders, builds the pipeline and creates a constant
    /// buffer for `params`. Does nothing if the pass is already initialized.
    ///
    /// ## Errors
    ///
    /// Fails if a shader does not compile or the device cannot create the
    /// pipeline or the buffer. Nothing is left allocated on failure.
    pub fn initialize<P: Pod>(
        &mut self,
        context: &Rc<DeviceContext>,
        render_target_format: Format,
        params: &P,
    ) -> Result<()> {
        if self.gpu.is_some() {
            return Ok(());
        }

        let vertex_shader =
            context.compile_shader(FULLSCREEN_SHADER, "vs_main", ShaderStage::Vertex)?;
        let pixel_shader = context.compile_shader(self.pixel_shader, "ps_main", ShaderStage::Pixel)?;

        let bytes = bytemuck::bytes_of(params);
        let size = crate::next_multiple_of(bytes.len() as u64, CONSTANT_BUFFER_ALIGNMENT);

        let mut device = context.device();

        let pipeline = device.create_pipeline(&PipelineDesc {
            label: self.label,
            vertex_shader,
            pixel_shader,
            input_layout: FullscreenVertex::LAYOUT,
            render_target_format,
            depth_stencil_format: None,
        })?;

        let constants = match device.create_buffer(&BufferDesc::upload(self.label, size)) {
            Ok(buffer) => buffer,
            Err(e) => {
                device.destroy_pipeline(pipeline);
                return Err(e);
            }
        };

        let address = device
            .write_buffer(constants, 0, bytes)
            .and_then(|()| device.gpu_address(constants));

        let constants_address = match address {
            Ok(address) => address,
            Err(e) => {
                device.destroy_pipeline(pipeline);
                device.destroy_resource(constants);
                return Err(e);
            }
        };
        drop(device);

        debug!("effect `{}` initialized, {size} byte constant buffer", self.label);

        self.gpu = Some(PassResources {
            context: context.clone(),
            pipeline,
            constants,
            constants_address,
        });

        Ok(())
    }

    /// Copies `params` into the constant buffer. Does nothing before
    /// initialization.
    pub fn upload<P: Pod>(&self, params: &P) {
        if let Some(gpu) = &self.gpu {
            let result = gpu
                .context
                .device()
                .write_buffer(gpu.constants, 0, bytemuck::bytes_of(params));

            if let Err(e) = result {
                warn!("could not update parameters of `{}`: {e}", self.label);
            }
        }
    }

    /// Draws one full-screen triangle into `output`, sampling `input` and, if
    /// given, `depth`.
    ///
    /// Records nothing if the pass is disabled or uninitialized, or if there
    /// is no triangle to draw with.
    pub fn draw(
        &self,
        command_list: &mut dyn CommandList,
        input: GpuHandle,
        depth: Option<GpuHandle>,
        output: &PassOutput,
        triangle: Option<&FullscreenTriangle>,
    ) {
        let (Some(gpu), Some(triangle)) = (&self.gpu, triangle) else {
            return;
        };

        if !self.enabled {
            return;
        }

        command_list.set_render_targets(&[output.rtv], None);
        command_list.clear_render_target(output.rtv, output.clear_color);
        command_list.set_viewport(&Viewport::from_extent(output.extent));
        command_list.set_scissor_rect(&Rect::from_extent(output.extent));

        command_list.set_descriptor_heaps();
        command_list.set_pipeline(gpu.pipeline);
        command_list.set_constant_buffer(root::CONSTANTS, gpu.constants_address);
        command_list.set_descriptor_table(root::SOURCE, input);
        if let Some(depth) = depth {
            command_list.set_descriptor_table(root::DEPTH, depth);
        }

        triangle.draw(command_list);
    }
}

/// A post-process pass that can be placed in a [`PostProcessChain`].
///
/// Implementors provide access to their [`EffectPass`] and their parameter
/// block; enabling, initialization and drawing come from the pass.
///
/// [`PostProcessChain`]: crate::chain::PostProcessChain
pub trait Effect: Any {
    fn pass(&self) -> &EffectPass;

    fn pass_mut(&mut self) -> &mut EffectPass;

    /// Builds the pipeline and constant buffer. Calling this more than once
    /// has no further effect.
    fn initialize(&mut self, context: &Rc<DeviceContext>, format: Format) -> Result<()>;

    /// Advances animated parameters by `delta_time` seconds and uploads them.
    fn update(&mut self, delta_time: f32);

    fn name(&self) -> &'static str {
        self.pass().label()
    }

    fn is_enabled(&self) -> bool {
        self.pass().is_enabled()
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.pass_mut().set_enabled(enabled);
    }

    fn is_initialized(&self) -> bool {
        self.pass().is_initialized()
    }

    /// Whether the effect samples scene depth. Such effects are only run
    /// through [`Effect::apply_with_depth`].
    fn requires_depth_texture(&self) -> bool {
        false
    }

    fn apply(
        &self,
        command_list: &mut dyn CommandList,
        input: GpuHandle,
        output: &PassOutput,
        triangle: Option<&FullscreenTriangle>,
    ) {
        self.pass().draw(command_list, input, None, output, triangle);
    }

    /// Applies the effect with access to the scene's depth. Effects that do
    /// not need depth ignore it.
    fn apply_with_depth(
        &self,
        command_list: &mut dyn CommandList,
        input: GpuHandle,
        _depth: GpuHandle,
        output: &PassOutput,
        triangle: Option<&FullscreenTriangle>,
    ) {
        self.apply(command_list, input, output, triangle);
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
