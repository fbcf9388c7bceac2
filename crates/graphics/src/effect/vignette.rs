use std::{any::Any, rc::Rc};

use bytemuck::{Pod, Zeroable};

use super::{Effect, EffectPass};
use crate::{context::DeviceContext, Format, Result};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct VignetteParams {
    pub strength: f32,
    /// Distance from the center, in UV units, at which darkening starts.
    pub radius: f32,
    pub softness: f32,
    pub _padding: f32,
}

impl Default for VignetteParams {
    fn default() -> Self {
        Self {
            strength: 0.8,
            radius: 0.75,
            softness: 0.45,
            _padding: 0.0,
        }
    }
}

/// Darkens the edges of the image.
pub struct Vignette {
    pass: EffectPass,
    params: VignetteParams,
}

impl Vignette {
    #[must_use]
    pub fn params(&self) -> &VignetteParams {
        &self.params
    }

    pub fn set_params(&mut self, params: VignetteParams) {
        self.params = params;
        self.pass.upload(&self.params);
    }
}

impl Default for Vignette {
    fn default() -> Self {
        Self {
            pass: EffectPass::new("Vignette", "vignette.hlsl"),
            params: VignetteParams::default(),
        }
    }
}

impl Effect for Vignette {
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
