//! Renders a few frames through the offscreen renderer and its post-process
//! chain, and reports what was recorded.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use geometry::Extent;
use graphics::{
    backend::{CommandList, SwapChain},
    effect::{DepthFog, Dissolve, Grayscale, RgbShift, Vignette},
    headless::{HeadlessCommandList, HeadlessDevice, HeadlessShaderCompiler},
    swap_chain::TextureSwapChain,
    GraphicsConfig, GraphicsContext, OffscreenConfig, OffscreenRenderer, PostProcessChain,
};
use log::*;

const FRAME_TIME: f32 = 1.0 / 60.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EffectKind {
    Grayscale,
    Vignette,
    RgbShift,
    DepthFog,
    Dissolve,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Records commands without a GPU.
    Headless,
    /// Direct3D 12, rendering into offscreen back buffers.
    #[cfg(windows)]
    Dx12,
}

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    #[arg(long, value_enum, default_value_t = Backend::Headless)]
    backend: Backend,

    /// Number of frames to render.
    #[arg(long, default_value_t = 3)]
    frames: u32,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Post-process effects, applied in the order given.
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = [EffectKind::DepthFog, EffectKind::Vignette])]
    effects: Vec<EffectKind>,

    /// Directory containing the HLSL sources.
    #[arg(long, default_value = "shaders")]
    shaders: PathBuf,

    /// Enables the graphics API's debug layer.
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn graphics_config(&self) -> GraphicsConfig {
        GraphicsConfig {
            debug_mode: self.debug,
            extent: Extent::new(self.width, self.height),
            shader_directory: self.shaders.clone(),
            ..Default::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::formatted_builder()
        .format_timestamp(None)
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();

    match args.backend {
        Backend::Headless => run_headless(&args),
        #[cfg(windows)]
        Backend::Dx12 => run_dx12(&args),
    }
}

fn run_headless(args: &Args) -> anyhow::Result<()> {
    let config = args.graphics_config();
    let mut device = HeadlessDevice::new();

    let swap_chain = TextureSwapChain::new(
        &mut device,
        config.back_buffer_count,
        config.back_buffer_format,
        config.extent,
    )?;

    let mut graphics = GraphicsContext::new(
        Box::new(device.clone()),
        Box::new(HeadlessShaderCompiler::default()),
        &swap_chain,
        &config,
    )
    .context("could not create the graphics context")?;

    let mut renderer = OffscreenRenderer::new(&graphics, &OffscreenConfig::default())?;
    add_effects(renderer.chain_mut(), &args.effects);

    for frame in 0..args.frames {
        let mut commands = HeadlessCommandList::new();
        record_frame(&mut graphics, &mut renderer, &mut commands, &swap_chain);

        info!(
            "frame {frame}: {} commands, {} draws, {} barrier batches",
            commands.commands().len(),
            commands.draw_count(),
            commands.barrier_batches().count()
        );

        swap_chain.present();
    }

    drop(renderer);
    drop(graphics);
    swap_chain.destroy(&mut device);

    info!(
        "shut down with {} live resources",
        device.live_resource_count()
    );

    Ok(())
}

#[cfg(windows)]
fn run_dx12(args: &Args) -> anyhow::Result<()> {
    use graphics::dx12::Dx12Backend;

    let config = args.graphics_config();
    let backend = Dx12Backend::new(&config).context("could not initialize Direct3D 12")?;
    let mut device = backend.device();

    let swap_chain = TextureSwapChain::new(
        &mut device,
        config.back_buffer_count,
        config.back_buffer_format,
        config.extent,
    )?;

    let mut graphics = GraphicsContext::new(
        Box::new(backend.device()),
        Box::new(backend.shader_compiler()),
        &swap_chain,
        &config,
    )
    .context("could not create the graphics context")?;

    let mut renderer = OffscreenRenderer::new(&graphics, &OffscreenConfig::default())?;
    add_effects(renderer.chain_mut(), &args.effects);

    for frame in 0..args.frames {
        let mut commands = backend.begin_commands()?;
        record_frame(&mut graphics, &mut renderer, &mut commands, &swap_chain);
        let fence = backend.submit(commands)?;
        debug!("frame {frame} submitted (fence {fence})");

        swap_chain.present();
    }

    backend.flush()?;

    drop(renderer);
    drop(graphics);
    swap_chain.destroy(&mut device);

    info!("rendered {} frames", args.frames);
    Ok(())
}

fn add_effects(chain: &mut PostProcessChain, effects: &[EffectKind]) {
    for effect in effects {
        match effect {
            EffectKind::Grayscale => chain.add_effect::<Grayscale>(),
            EffectKind::Vignette => chain.add_effect::<Vignette>(),
            EffectKind::RgbShift => chain.add_effect::<RgbShift>(),
            EffectKind::DepthFog => chain.add_effect::<DepthFog>(),
            EffectKind::Dissolve => chain.add_effect::<Dissolve>(),
        };
    }

    info!(
        "{} of {} effects ready",
        chain.enabled_effect_count(),
        chain.effect_count()
    );
}

fn record_frame(
    graphics: &mut GraphicsContext,
    renderer: &mut OffscreenRenderer,
    commands: &mut dyn CommandList,
    swap_chain: &dyn SwapChain,
) {
    let target = graphics.begin_frame(commands, swap_chain);

    renderer.update(FRAME_TIME);
    renderer.pre_draw(commands);
    // scene draws go here
    renderer.post_draw(commands);
    renderer.draw_offscreen_texture(commands, &target, None);

    graphics.end_frame(commands, &target);
}
