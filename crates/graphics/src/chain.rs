//! An ordered list of effects applied one after another.
//!
//! Each pass reads the previous pass's output and writes into whichever of the
//! two scratch surfaces is not being read. The first pass reads the chain's
//! input directly, and the output of the last pass is returned as the result.

use std::rc::Rc;

use geometry::{Extent, Px};
use log::{debug, warn};

use crate::{
    backend::CommandList,
    context::DeviceContext,
    effect::Effect,
    fullscreen::FullscreenTriangle,
    surface::{OffscreenSurface, SurfaceDesc},
    Color, Format, GpuHandle, ResourceState, Result,
};

const BUFFER_LABELS: [&str; 2] = ["Post Process Buffer 0", "Post Process Buffer 1"];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PostProcessDesc {
    pub extent: Extent<u32, Px>,
    pub format: Format,
    pub clear_color: Color,
}

struct ChainResources {
    context: Rc<DeviceContext>,
    buffers: [OffscreenSurface; 2],
    triangle: Rc<FullscreenTriangle>,
    format: Format,
}

#[derive(Default)]
pub struct PostProcessChain {
    effects: Vec<Box<dyn Effect>>,
    state: Option<ChainResources>,
}

impl PostProcessChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the two scratch surfaces and initializes every effect added so
    /// far. Effects that fail to initialize are logged and left out of the
    /// chain until they are initialized.
    ///
    /// ## Panics
    ///
    /// Panics if the descriptor heaps cannot supply the slots for both
    /// scratch surfaces.
    ///
    /// ## Errors
    ///
    /// Returns the device's error if a scratch surface cannot be created.
    pub fn initialize(
        &mut self,
        context: &Rc<DeviceContext>,
        desc: &PostProcessDesc,
        triangle: Rc<FullscreenTriangle>,
    ) -> Result<()> {
        if self.state.is_some() {
            return Ok(());
        }

        let surface = |label| {
            OffscreenSurface::new(
                context,
                &SurfaceDesc {
                    label,
                    extent: desc.extent,
                    color_format: desc.format,
                    clear_color: desc.clear_color,
                    initial_depth_state: ResourceState::PixelShaderResource,
                },
            )
        };
        let buffers = [surface(BUFFER_LABELS[0])?, surface(BUFFER_LABELS[1])?];

        for effect in &mut self.effects {
            initialize_effect(effect.as_mut(), context, desc.format);
        }

        debug!(
            "post-process chain ready with {} effects",
            self.effects.len()
        );

        self.state = Some(ChainResources {
            context: context.clone(),
            buffers,
            triangle,
            format: desc.format,
        });

        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Appends a default-constructed `T` to the end of the chain and returns
    /// its position. If the chain is initialized, so is the effect.
    pub fn add_effect<T: Effect + Default>(&mut self) -> usize {
        self.push_effect(Box::new(T::default()))
    }

    /// Appends `effect` to the end of the chain and returns its position.
    pub fn push_effect(&mut self, mut effect: Box<dyn Effect>) -> usize {
        if let Some(state) = &self.state {
            initialize_effect(effect.as_mut(), &state.context, state.format);
        }

        self.effects.push(effect);
        self.effects.len() - 1
    }

    pub fn remove_effect(&mut self, index: usize) -> Option<Box<dyn Effect>> {
        (index < self.effects.len()).then(|| self.effects.remove(index))
    }

    /// Moves the effect at `from` so that it ends up at `to`, shifting the
    /// effects in between. Returns `false` if either index is out of range.
    pub fn move_effect(&mut self, from: usize, to: usize) -> bool {
        if from >= self.effects.len() || to >= self.effects.len() {
            return false;
        }

        let effect = self.effects.remove(from);
        self.effects.insert(to, effect);
        true
    }

    #[must_use]
    pub fn effect(&self, index: usize) -> Option<&dyn Effect> {
        self.effects.get(index).map(|effect| &**effect)
    }

    pub fn effect_mut(&mut self, index: usize) -> Option<&mut dyn Effect> {
        let effect: &mut dyn Effect = self.effects.get_mut(index)?.as_mut();
        Some(effect)
    }

    /// The first effect of type `T`.
    #[must_use]
    pub fn get<T: Effect>(&self) -> Option<&T> {
        self.effects
            .iter()
            .find_map(|effect| effect.as_any().downcast_ref())
    }

    pub fn get_mut<T: Effect>(&mut self) -> Option<&mut T> {
        self.effects
            .iter_mut()
            .find_map(|effect| effect.as_any_mut().downcast_mut())
    }

    /// The position of the first effect called `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<usize> {
        self.effects.iter().position(|effect| effect.name() == name)
    }

    /// Returns `false` if there is no effect at `index`.
    pub fn set_effect_enabled(&mut self, index: usize, enabled: bool) -> bool {
        match self.effects.get_mut(index) {
            Some(effect) => {
                effect.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    pub fn set_all_effects_enabled(&mut self, enabled: bool) {
        for effect in &mut self.effects {
            effect.set_enabled(enabled);
        }
    }

    #[must_use]
    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    #[must_use]
    pub fn enabled_effect_count(&self) -> usize {
        self.effects.iter().filter(|e| e.is_enabled()).count()
    }

    /// Advances every effect's animation by `delta_time` seconds.
    pub fn update(&mut self, delta_time: f32) {
        for effect in &mut self.effects {
            effect.update(delta_time);
        }
    }

    /// One of the two scratch surfaces, if the chain is initialized.
    #[must_use]
    pub fn buffer(&self, index: usize) -> Option<&OffscreenSurface> {
        self.state.as_ref().and_then(|state| state.buffers.get(index))
    }

    /// Runs every enabled effect that does not need depth over `input` and
    /// returns the texture holding the result.
    ///
    /// Effects that need depth are skipped with a warning. If nothing runs,
    /// `input` is returned and nothing is recorded.
    pub fn apply_effects(&mut self, command_list: &mut dyn CommandList, input: GpuHandle) -> GpuHandle {
        self.run(command_list, input, None)
    }

    /// Runs every enabled effect over `input`, giving `depth` to the effects
    /// that need it, and returns the texture holding the result.
    pub fn apply_effects_with_depth(
        &mut self,
        command_list: &mut dyn CommandList,
        input: GpuHandle,
        depth: GpuHandle,
    ) -> GpuHandle {
        self.run(command_list, input, Some(depth))
    }

    fn run(
        &mut self,
        command_list: &mut dyn CommandList,
        input: GpuHandle,
        depth: Option<GpuHandle>,
    ) -> GpuHandle {
        let Some(state) = &mut self.state else {
            return input;
        };

        let mut current = input;
        let mut index = 0;

        for effect in &self.effects {
            if !(effect.is_enabled() && effect.is_initialized()) {
                continue;
            }

            if depth.is_none() && effect.requires_depth_texture() {
                warn!(
                    "`{}` requires depth texture, skipped by apply_effects",
                    effect.name()
                );
                continue;
            }

            let buffer = &mut state.buffers[index];
            buffer.begin_color_write(command_list);

            let output = buffer.pass_output();
            let triangle = Some(state.triangle.as_ref());
            match depth {
                Some(depth) if effect.requires_depth_texture() => {
                    effect.apply_with_depth(command_list, current, depth, &output, triangle);
                }
                _ => effect.apply(command_list, current, &output, triangle),
            }

            buffer.end_color_write(command_list);

            current = buffer.srv();
            index = (index + 1) % 2;
        }

        current
    }
}

fn initialize_effect(effect: &mut dyn Effect, context: &Rc<DeviceContext>, format: Format) {
    if let Err(e) = effect.initialize(context, format) {
        warn!("effect `{}` failed to initialize: {e}", effect.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        effect::{DepthFog, Grayscale, RgbShift, Vignette},
        headless::{Command, HeadlessCommandList, HeadlessDevice, HeadlessShaderCompiler},
        testing::{capture_logs, captured_warnings, commands, device_context},
        GraphicsConfig,
    };

    const INPUT: GpuHandle = GpuHandle(0xABC0);
    const DEPTH: GpuHandle = GpuHandle(0xDEF0);

    fn desc() -> PostProcessDesc {
        PostProcessDesc {
            extent: Extent::new(64, 64),
            format: Format::Rgba8Unorm,
            clear_color: Color::BLACK,
        }
    }

    fn chain_with(
        setup: impl FnOnce(&mut PostProcessChain),
    ) -> (HeadlessDevice, PostProcessChain) {
        let (device, context) = device_context();
        let triangle = Rc::new(FullscreenTriangle::new(&context).unwrap());

        let mut chain = PostProcessChain::new();
        setup(&mut chain);
        chain.initialize(&context, &desc(), triangle).unwrap();
        (device, chain)
    }

    fn buffer_rtv(chain: &PostProcessChain, index: usize) -> crate::CpuHandle {
        chain.buffer(index).unwrap().rtv()
    }

    fn buffer_srv(chain: &PostProcessChain, index: usize) -> GpuHandle {
        chain.buffer(index).unwrap().srv()
    }

    fn sources(cmd: &HeadlessCommandList) -> Vec<GpuHandle> {
        cmd.commands()
            .iter()
            .filter_map(|c| match c {
                Command::SetDescriptorTable {
                    root_index: crate::backend::root::SOURCE,
                    base,
                } => Some(*base),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn empty_chain_passes_input_through() {
        let (_device, mut chain) = chain_with(|_| {});
        let mut cmd = commands();

        assert_eq!(chain.apply_effects(&mut cmd, INPUT), INPUT);
        assert_eq!(chain.apply_effects_with_depth(&mut cmd, INPUT, DEPTH), INPUT);
        assert!(cmd.commands().is_empty());
    }

    #[test]
    fn disabled_chain_passes_input_through() {
        let (_device, mut chain) = chain_with(|chain| {
            chain.add_effect::<Grayscale>();
            chain.add_effect::<Vignette>();
        });
        chain.set_all_effects_enabled(false);

        let mut cmd = commands();
        assert_eq!(chain.apply_effects(&mut cmd, INPUT), INPUT);
        assert!(cmd.commands().is_empty());
        assert_eq!(chain.enabled_effect_count(), 0);
    }

    #[test]
    fn uninitialized_chain_is_a_no_op() {
        let mut chain = PostProcessChain::new();
        chain.add_effect::<Grayscale>();

        let mut cmd = commands();
        assert_eq!(chain.apply_effects(&mut cmd, INPUT), INPUT);
        assert!(cmd.commands().is_empty());
        assert!(chain.buffer(0).is_none());
    }

    #[test]
    fn two_effects_end_on_second_buffer() {
        let (_device, mut chain) = chain_with(|chain| {
            chain.add_effect::<Grayscale>();
            chain.add_effect::<Vignette>();
        });

        let mut cmd = commands();
        let output = chain.apply_effects(&mut cmd, INPUT);

        assert_eq!(output, buffer_srv(&chain, 1));
        assert_eq!(
            cmd.draw_targets(),
            vec![buffer_rtv(&chain, 0), buffer_rtv(&chain, 1)]
        );
        assert_eq!(sources(&cmd), vec![INPUT, buffer_srv(&chain, 0)]);
    }

    #[test]
    fn three_effects_end_on_first_buffer() {
        let (_device, mut chain) = chain_with(|chain| {
            chain.add_effect::<Grayscale>();
            chain.add_effect::<Vignette>();
            chain.add_effect::<RgbShift>();
        });

        let mut cmd = commands();
        let output = chain.apply_effects(&mut cmd, INPUT);

        assert_eq!(output, buffer_srv(&chain, 0));
        assert_eq!(
            cmd.draw_targets(),
            vec![
                buffer_rtv(&chain, 0),
                buffer_rtv(&chain, 1),
                buffer_rtv(&chain, 0)
            ]
        );
    }

    #[test]
    fn every_pass_is_bracketed_by_barriers() {
        let (_device, mut chain) = chain_with(|chain| {
            chain.add_effect::<Grayscale>();
            chain.add_effect::<Vignette>();
        });

        let mut cmd = commands();
        chain.apply_effects(&mut cmd, INPUT);

        let batches = cmd.barrier_batches().collect::<Vec<_>>();
        assert_eq!(batches.len(), 4);
        for (i, batch) in batches.iter().enumerate() {
            let buffer = chain.buffer(i / 2).unwrap();
            assert_eq!(batch.len(), 1);
            assert_eq!(batch[0].resource, buffer.color_resource());

            let (before, after) = if i % 2 == 0 {
                (ResourceState::PixelShaderResource, ResourceState::RenderTarget)
            } else {
                (ResourceState::RenderTarget, ResourceState::PixelShaderResource)
            };
            assert_eq!((batch[0].before, batch[0].after), (before, after));
        }

        for i in 0..2 {
            assert_eq!(
                chain.buffer(i).unwrap().color_state(),
                ResourceState::PixelShaderResource
            );
        }
    }

    #[test]
    fn disabled_effects_do_not_shift_parity() {
        let (_device, mut chain) = chain_with(|chain| {
            chain.add_effect::<Grayscale>();
            chain.add_effect::<Vignette>();
            chain.add_effect::<RgbShift>();
        });
        assert!(chain.set_effect_enabled(1, false));

        let mut cmd = commands();
        let output = chain.apply_effects(&mut cmd, INPUT);

        assert_eq!(cmd.draw_count(), 2);
        assert_eq!(output, buffer_srv(&chain, 1));
        assert_eq!(
            cmd.draw_targets(),
            vec![buffer_rtv(&chain, 0), buffer_rtv(&chain, 1)]
        );

        let pipelines = cmd
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::SetPipeline(pipeline) => Some(*pipeline),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            pipelines,
            vec![
                chain.get::<Grayscale>().unwrap().pass().pipeline().unwrap(),
                chain.get::<RgbShift>().unwrap().pass().pipeline().unwrap(),
            ]
        );
    }

    #[test]
    fn depth_effect_is_skipped_without_depth() {
        let (_device, mut chain) = chain_with(|chain| {
            chain.add_effect::<DepthFog>();
            chain.add_effect::<Grayscale>();
        });

        let mut cmd = commands();
        capture_logs();
        let output = chain.apply_effects(&mut cmd, INPUT);

        assert_eq!(cmd.draw_count(), 1);
        assert_eq!(output, buffer_srv(&chain, 0));
        assert_eq!(sources(&cmd), vec![INPUT]);
        assert_eq!(cmd.barrier_batches().count(), 2);

        let warnings = captured_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("`Depth Fog` requires depth texture"));
    }

    #[test]
    fn depth_effect_runs_with_depth() {
        let (_device, mut chain) = chain_with(|chain| {
            chain.add_effect::<DepthFog>();
            chain.add_effect::<Grayscale>();
        });

        let mut cmd = commands();
        let output = chain.apply_effects_with_depth(&mut cmd, INPUT, DEPTH);

        assert_eq!(cmd.draw_count(), 2);
        assert_eq!(output, buffer_srv(&chain, 1));
        assert!(cmd.commands().contains(&Command::SetDescriptorTable {
            root_index: crate::backend::root::DEPTH,
            base: DEPTH
        }));
    }

    #[test]
    fn only_depth_effect_without_depth_passes_through() {
        let (_device, mut chain) = chain_with(|chain| {
            chain.add_effect::<DepthFog>();
        });

        let mut cmd = commands();
        assert_eq!(chain.apply_effects(&mut cmd, INPUT), INPUT);
        assert!(cmd.commands().is_empty());
    }

    #[test]
    fn grayscale_vignette_off_rgb_shift() {
        let (_device, mut chain) = chain_with(|chain| {
            chain.add_effect::<Grayscale>();
            let vignette = chain.add_effect::<Vignette>();
            chain.set_effect_enabled(vignette, false);
            chain.add_effect::<RgbShift>();
        });

        let mut cmd = commands();
        let output = chain.apply_effects(&mut cmd, INPUT);

        assert_eq!(cmd.draw_count(), 2);
        assert_eq!(output, buffer_srv(&chain, 1));
    }

    #[test]
    fn effects_added_after_initialize_are_initialized() {
        let (device, mut chain) = chain_with(|_| {});
        let before = device.live_pipeline_count();

        let index = chain.add_effect::<Vignette>();
        assert!(chain.effect(index).unwrap().is_initialized());
        assert_eq!(device.live_pipeline_count(), before + 1);

        let removed = chain.remove_effect(index).unwrap();
        assert_eq!(removed.name(), "Vignette");
        drop(removed);
        assert_eq!(device.live_pipeline_count(), before);
        assert!(chain.remove_effect(index).is_none());
    }

    #[test]
    fn failed_effect_is_skipped() {
        let device = HeadlessDevice::new();
        let context = Rc::new(
            DeviceContext::new(
                Box::new(device.clone()),
                Box::new(HeadlessShaderCompiler::with_missing(&["vignette.hlsl"])),
                &GraphicsConfig::default(),
            )
            .unwrap(),
        );
        let triangle = Rc::new(FullscreenTriangle::new(&context).unwrap());

        let mut chain = PostProcessChain::new();
        chain.add_effect::<Vignette>();
        chain.add_effect::<Grayscale>();
        chain.initialize(&context, &desc(), triangle).unwrap();

        assert!(!chain.effect(0).unwrap().is_initialized());
        assert_eq!(chain.enabled_effect_count(), 2);

        let mut cmd = commands();
        assert_eq!(chain.apply_effects(&mut cmd, INPUT), buffer_srv(&chain, 0));
        assert_eq!(cmd.draw_count(), 1);
    }

    #[test]
    fn move_and_find() {
        let (_device, mut chain) = chain_with(|chain| {
            chain.add_effect::<Grayscale>();
            chain.add_effect::<Vignette>();
            chain.add_effect::<RgbShift>();
        });

        assert!(chain.move_effect(2, 0));
        assert_eq!(chain.find("RGB Shift"), Some(0));
        assert_eq!(chain.find("Grayscale"), Some(1));
        assert_eq!(chain.find("Vignette"), Some(2));
        assert_eq!(chain.find("Bloom"), None);

        assert!(!chain.move_effect(0, 3));
        assert_eq!(chain.effect_count(), 3);

        chain.get_mut::<Grayscale>().unwrap().set_intensity(0.5);
        assert_eq!(chain.get::<Grayscale>().unwrap().params().intensity, 0.5);

        assert!(chain.effect_mut(2).unwrap().is_enabled());
        assert!(!chain.set_effect_enabled(3, false));
    }

    #[test]
    fn drop_releases_buffers_and_effects() {
        let (device, context) = device_context();
        let triangle = Rc::new(FullscreenTriangle::new(&context).unwrap());

        let mut chain = PostProcessChain::new();
        chain.add_effect::<Grayscale>();
        chain.add_effect::<DepthFog>();
        chain.initialize(&context, &desc(), triangle.clone()).unwrap();
        assert_eq!(device.live_pipeline_count(), 2);

        drop(chain);
        assert_eq!(device.live_pipeline_count(), 0);
        // Only the triangle is left.
        assert_eq!(device.live_resource_count(), 1);
        assert_eq!(
            context
                .descriptors()
                .heap(crate::DescriptorHeapKind::Srv)
                .used_count(),
            0
        );
        drop(triangle);
    }
}
