use std::{any::Any, rc::Rc};

use bytemuck::{Pod, Zeroable};

use super::{Effect, EffectPass};
use crate::{context::DeviceContext, Format, Result};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct RgbShiftParams {
    /// Maximum offset of the red and blue channels, in UV units.
    pub amount: f32,
    /// How fast the offset oscillates.
    pub speed: f32,
    pub time: f32,
    pub _padding: f32,
}

impl Default for RgbShiftParams {
    fn default() -> Self {
        Self {
            amount: 0.005,
            speed: 2.0,
            time: 0.0,
            _padding: 0.0,
        }
    }
}

/// Splits the color channels apart by a time-varying offset.
pub struct RgbShift {
    pass: EffectPass,
    params: RgbShiftParams,
}

impl RgbShift {
    #[must_use]
    pub fn params(&self) -> &RgbShiftParams {
        &self.params
    }

    pub fn set_amount(&mut self, amount: f32) {
        self.params.amount = amount;
        self.pass.upload(&self.params);
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.params.speed = speed;
        self.pass.upload(&self.params);
    }
}

impl Default for RgbShift {
    fn default() -> Self {
        Self {
            pass: EffectPass::new("RGB Shift", "rgb_shift.hlsl"),
            params: RgbShiftParams::default(),
        }
    }
}

impl Effect for RgbShift {
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

        self.params.time += delta_time;
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
    fn time_only_advances_while_active() {
        let (_device, context) = device_context();
        let mut shift = RgbShift::default();

        shift.update(1.0);
        assert_eq!(shift.params().time, 0.0);

        shift.initialize(&context, Format::Rgba8Unorm).unwrap();
        shift.update(0.5);
        shift.update(0.25);
        assert_eq!(shift.params().time, 0.75);

        shift.set_enabled(false);
        shift.update(1.0);
        assert_eq!(shift.params().time, 0.75);
    }
}
