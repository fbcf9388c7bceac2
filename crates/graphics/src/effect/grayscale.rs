use std::{any::Any, rc::Rc};

use bytemuck::{Pod, Zeroable};

use super::{Effect, EffectPass};
use crate::{context::DeviceContext, Format, Result};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GrayscaleParams {
    /// 0 leaves the image untouched, 1 is fully desaturated.
    pub intensity: f32,
    pub _padding: [f32; 3],
}

impl Default for GrayscaleParams {
    fn default() -> Self {
        Self {
            intensity: 1.0,
            _padding: [0.0; 3],
        }
    }
}

/// Blends the image toward its luminance.
pub struct Grayscale {
    pass: EffectPass,
    params: GrayscaleParams,
}

impl Grayscale {
    #[must_use]
    pub fn params(&self) -> &GrayscaleParams {
        &self.params
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        self.params.intensity = intensity.clamp(0.0, 1.0);
        self.pass.upload(&self.params);
    }
}

impl Default for Grayscale {
    fn default() -> Self {
        Self {
            pass: EffectPass::new("Grayscale", "grayscale.hlsl"),
            params: GrayscaleParams::default(),
        }
    }
}

impl Effect for Grayscale {
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

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
