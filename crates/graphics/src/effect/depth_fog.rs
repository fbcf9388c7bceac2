use std::{any::Any, rc::Rc};

use bytemuck::{Pod, Zeroable};
use log::warn;

use super::{Effect, EffectPass};
use crate::{
    backend::CommandList, context::DeviceContext, fullscreen::FullscreenTriangle,
    surface::PassOutput, Color, Format, GpuHandle, Result,
};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DepthFogParams {
    pub color: [f32; 4],
    /// Depth at which fog starts, in normalized device depth.
    pub near: f32,
    /// Depth at which fog reaches full density.
    pub far: f32,
    pub density: f32,
    pub _padding: f32,
}

impl Default for DepthFogParams {
    fn default() -> Self {
        Self {
            color: Color::new(0.6, 0.65, 0.7, 1.0).to_array(),
            near: 0.9,
            far: 1.0,
            density: 1.0,
            _padding: 0.0,
        }
    }
}

/// Fades distant pixels toward a fog color using the scene depth.
pub struct DepthFog {
    pass: EffectPass,
    params: DepthFogParams,
}

impl DepthFog {
    #[must_use]
    pub fn params(&self) -> &DepthFogParams {
        &self.params
    }

    pub fn set_color(&mut self, color: Color) {
        self.params.color = color.to_array();
        self.pass.upload(&self.params);
    }

    pub fn set_range(&mut self, near: f32, far: f32) {
        self.params.near = near;
        self.params.far = far;
        self.pass.upload(&self.params);
    }

    pub fn set_density(&mut self, density: f32) {
        self.params.density = density;
        self.pass.upload(&self.params);
    }
}

impl Default for DepthFog {
    fn default() -> Self {
        Self {
            pass: EffectPass::new("Depth Fog", "depth_fog.hlsl"),
            params: DepthFogParams::default(),
        }
    }
}

impl Effect for DepthFog {
    fn pass(&self) -> &EffectPass {
        &self.pass
    }

    fn pass_mut(&mut self) -> &mut EffectPass {
        &mut self.pass
    }

    fn initialize(&mut self, context: &Rc<DeviceContext>, format: Format) -> Result<()> {
        self.pass.initialize(context, format, &self.params)
    }

    fn update(&mut self, _delta_time: f32) {
        if self.pass.is_active() {
            self.pass.upload(&self.params);
        }
    }

    fn requires_depth_texture(&self) -> bool {
        true
    }

    fn apply(
        &self,
        _command_list: &mut dyn CommandList,
        _input: GpuHandle,
        _output: &PassOutput,
        _triangle: Option<&FullscreenTriangle>,
    ) {
        warn!("`{}` requires depth texture, not applied", self.name());
    }

    fn apply_with_depth(
        &self,
        command_list: &mut dyn CommandList,
        input: GpuHandle,
        depth: GpuHandle,
        output: &PassOutput,
        triangle: Option<&FullscreenTriangle>,
    ) {
        self.pass
            .draw(command_list, input, Some(depth), output, triangle);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use geometry::Extent;

    use super::*;
    use crate::{
        backend::root,
        headless::Command,
        testing::{capture_logs, captured_warnings, commands, device_context},
        CpuHandle,
    };

    fn output() -> PassOutput {
        PassOutput {
            rtv: CpuHandle(0x1000),
            extent: Extent::new(64, 64),
            clear_color: Color::BLACK,
        }
    }

    #[test]
    fn plain_apply_draws_nothing() {
        let (_device, context) = device_context();
        let triangle = FullscreenTriangle::new(&context).unwrap();
        let mut fog = DepthFog::default();
        fog.initialize(&context, Format::Rgba8Unorm).unwrap();

        assert!(fog.requires_depth_texture());

        let mut cmd = commands();
        capture_logs();
        fog.apply(&mut cmd, GpuHandle(0x2000), &output(), Some(&triangle));
        assert!(cmd.commands().is_empty());
        assert_eq!(
            captured_warnings(),
            vec!["`Depth Fog` requires depth texture, not applied".to_owned()]
        );
    }

    #[test]
    fn depth_apply_binds_depth() {
        let (_device, context) = device_context();
        let triangle = FullscreenTriangle::new(&context).unwrap();
        let mut fog = DepthFog::default();
        fog.initialize(&context, Format::Rgba8Unorm).unwrap();

        let mut cmd = commands();
        fog.apply_with_depth(
            &mut cmd,
            GpuHandle(0x2000),
            GpuHandle(0x3000),
            &output(),
            Some(&triangle),
        );

        assert_eq!(cmd.draw_count(), 1);
        assert!(cmd.commands().contains(&Command::SetDescriptorTable {
            root_index: root::DEPTH,
            base: GpuHandle(0x3000)
        }));
    }
}
