use std::{any::Any, rc::Rc};

use bytemuck::{Pod, Zeroable};

use super::{Effect, EffectPass};
use crate::{context::DeviceContext, Format, Result};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DissolveParams {
    /// 0 is fully visible, 1 is fully dissolved.
    pub progress: f32,
    /// Width of the glowing edge, in noise units.
    pub edge_width: f32,
    pub _padding: [f32; 2],
    pub edge_color: [f32; 4],
}

impl Default for DissolveParams {
    fn default() -> Self {
        Self {
            progress: 0.0,
            edge_width: 0.05,
            _padding: [0.0; 2],
            edge_color: [1.0, 0.5, 0.1, 1.0],
        }
    }
}

/// Burns the image away along a noise pattern.
///
/// Progress advances by `speed` per second. When it reaches 1 it either wraps
/// back to 0 (if looping) or stays at 1.
pub struct Dissolve {
    pass: EffectPass,
    params: DissolveParams,
    speed: f32,
    looping: bool,
}

impl Dissolve {
    #[must_use]
    pub fn params(&self) -> &DissolveParams {
        &self.params
    }

    #[must_use]
    pub fn progress(&self) -> f32 {
        self.params.progress
    }

    pub fn set_progress(&mut self, progress: f32) {
        self.params.progress = progress.clamp(0.0, 1.0);
        self.pass.upload(&self.params);
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.speed = speed;
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn set_edge(&mut self, width: f32, color: crate::Color) {
        self.params.edge_width = width;
        self.params.edge_color = color.to_array();
        self.pass.upload(&self.params);
    }
}

impl Default for Dissolve {
    fn default() -> Self {
        Self {
            pass: EffectPass::new("Dissolve", "dissolve.hlsl"),
            params: DissolveParams::default(),
            speed: 0.5,
            looping: true,
        }
    }
}

impl Effect for Dissolve {
    fn pass(&self) -> &EffectPass {
        &self.pass
    }

    fn pass_mut(&mut self) -> &mut EffectPass {
        &mut self.pass
    }

    fn initialize(&mut self, context: &Rc<DeviceContext>, format: Format) -> Result<()> {
        self.pass.initialize(context, format, &self.params)
    }

    fn update(&mut self, delta_time: f32) {
        if !self.pass.is_active() {
            return;
        }

        let progress = self.params.progress + self.speed * delta_time;
        self.params.progress = if progress < 1.0 {
            progress
        } else if self.looping {
            progress.fract()
        } else {
            1.0
        };

        self.pass.upload(&self.params);
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
    use super::*;
    use crate::testing::device_context;

    #[test]
    fn progress_wraps_when_looping() {
        let (device, context) = device_context();
        let mut dissolve = Dissolve::default();
        dissolve.initialize(&context, Format::Rgba8Unorm).unwrap();
        dissolve.set_speed(1.0);

        dissolve.update(0.75);
        assert_eq!(dissolve.progress(), 0.75);
        dissolve.update(0.5);
        assert_eq!(dissolve.progress(), 0.25);

        let contents = device
            .buffer_contents(dissolve.pass().constants().unwrap())
            .unwrap();
        assert_eq!(&contents[..4], &0.25f32.to_ne_bytes());
    }

    #[test]
    fn progress_holds_when_not_looping() {
        let (_device, context) = device_context();
        let mut dissolve = Dissolve::default();
        dissolve.initialize(&context, Format::Rgba8Unorm).unwrap();
        dissolve.set_speed(1.0);
        dissolve.set_looping(false);

        dissolve.update(3.0);
        assert_eq!(dissolve.progress(), 1.0);
    }
}
