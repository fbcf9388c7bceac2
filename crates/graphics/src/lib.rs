//! Graphics!
//!
//! Descriptor management and the offscreen post-processing pipeline for an
//! explicit GPU API in the style of Direct3D 12.
//!
//! ## Layout
//!
//! - [`descriptor`] hands out fixed slots from the RTV, DSV and SRV heaps.
//! - [`view`] writes typed views into those slots.
//! - [`surface`] pairs a color and depth texture with all four views and
//!   tracks their resource states.
//! - [`effect`] and [`chain`] implement full-screen post-process passes,
//!   ping-ponged between two scratch surfaces.
//! - [`offscreen`] renders the scene into a surface, runs the chain, and
//!   composites the result onto the back buffer.
//!
//! Everything above talks to the GPU through the traits in [`backend`]. The
//! [`headless`] backend records commands for inspection and runs everywhere;
//! the Direct3D 12 backend is only available on Windows.
//!
//! ## Threading
//!
//! All of this is single-threaded. Objects that own GPU resources hold an
//! `Rc<DeviceContext>` and release their descriptors and resources when they
//! are dropped.

pub mod backend;
pub mod chain;
pub mod context;
pub mod descriptor;
pub mod effect;
pub mod fullscreen;
pub mod headless;
pub mod offscreen;
pub mod resource;
pub mod surface;
pub mod swap_chain;
pub mod view;

mod error;

#[cfg(target_os = "windows")]
pub mod dx12;

use std::path::PathBuf;

use geometry::{Extent, Px};

pub use chain::{PostProcessChain, PostProcessDesc};
pub use context::{DeviceContext, FrameTarget, GraphicsContext};
pub use descriptor::{CpuHandle, DescriptorHeapKind, DescriptorSlot, GpuHandle};
pub use error::{Error, Result};
pub use offscreen::{OffscreenConfig, OffscreenRenderer};
pub use resource::{Format, PipelineId, ResourceId, ResourceState};
pub use surface::{OffscreenSurface, SurfaceDesc};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const RED: Self = Self {
        r: 1.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };

    pub const GREEN: Self = Self {
        r: 0.0,
        g: 1.0,
        b: 0.0,
        a: 1.0,
    };

    pub const BLUE: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 1.0,
        a: 1.0,
    };

    pub const BLACK: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };

    pub const TRANSPARENT: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };

    #[must_use]
    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    #[must_use]
    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PowerPreference {
    #[default]
    DontCare,
    LowPower,
    HiPower,
}

/// Number of descriptors in each heap. These are fixed for the lifetime of the
/// graphics context; there is no heap growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapConfig {
    pub rtv_capacity: u32,
    pub dsv_capacity: u32,
    pub srv_capacity: u32,
}

impl Default for DescriptorHeapConfig {
    fn default() -> Self {
        Self {
            rtv_capacity: 16,
            dsv_capacity: 4,
            srv_capacity: 512,
        }
    }
}

/// Options for configuring the graphics context on initialization. Once set,
/// these options cannot be changed without recreating the graphics context.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsConfig {
    pub debug_mode: bool,
    pub power_preference: PowerPreference,
    pub extent: Extent<u32, Px>,
    pub back_buffer_count: u32,
    pub back_buffer_format: Format,
    pub clear_color: Color,
    pub descriptor_heaps: DescriptorHeapConfig,
    /// Directory that shader file names are resolved against.
    pub shader_directory: PathBuf,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            debug_mode: cfg!(debug_assertions),
            power_preference: PowerPreference::default(),
            extent: Extent::new(1280, 720),
            back_buffer_count: 2,
            back_buffer_format: Format::Rgba8Unorm,
            clear_color: Color::new(0.1, 0.25, 0.5, 1.0),
            descriptor_heaps: DescriptorHeapConfig::default(),
            shader_directory: PathBuf::from("shaders"),
        }
    }
}

/// Rounds `value` up to the next multiple of `multiple`.
///
/// ## Panics
///
/// Panics if `multiple` is zero.
#[must_use]
pub fn next_multiple_of(value: u64, multiple: u64) -> u64 {
    assert_ne!(multiple, 0);
    match value % multiple {
        0 => value,
        r => value + (multiple - r),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{cell::RefCell, rc::Rc, sync::Once};

    use crate::{
        headless::{HeadlessCommandList, HeadlessDevice, HeadlessShaderCompiler},
        swap_chain::TextureSwapChain,
        DeviceContext, GraphicsConfig, GraphicsContext,
    };

    pub fn device_context() -> (HeadlessDevice, Rc<DeviceContext>) {
        let device = HeadlessDevice::new();
        let config = GraphicsConfig::default();
        let context = DeviceContext::new(
            Box::new(device.clone()),
            Box::new(HeadlessShaderCompiler::default()),
            &config,
        )
        .unwrap();
        (device, Rc::new(context))
    }

    pub fn graphics_context() -> (HeadlessDevice, TextureSwapChain, GraphicsContext) {
        let mut device = HeadlessDevice::new();
        let config = GraphicsConfig::default();
        let swap_chain = TextureSwapChain::new(
            &mut device,
            config.back_buffer_count,
            config.back_buffer_format,
            config.extent,
        )
        .unwrap();
        let graphics = GraphicsContext::new(
            Box::new(device.clone()),
            Box::new(HeadlessShaderCompiler::default()),
            &swap_chain,
            &config,
        )
        .unwrap();
        (device, swap_chain, graphics)
    }

    pub fn commands() -> HeadlessCommandList {
        HeadlessCommandList::new()
    }

    thread_local! {
        static CAPTURED: RefCell<Vec<(log::Level, String)>> = RefCell::new(Vec::new());
    }

    /// Keeps log records on the thread that emitted them, so tests running in
    /// parallel only see their own.
    struct CaptureLogger;

    impl log::Log for CaptureLogger {
        fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
            true
        }

        fn log(&self, record: &log::Record<'_>) {
            CAPTURED.with(|captured| {
                captured
                    .borrow_mut()
                    .push((record.level(), record.args().to_string()));
            });
        }

        fn flush(&self) {}
    }

    static LOGGER: CaptureLogger = CaptureLogger;

    /// Starts capturing log records on this thread, discarding any captured
    /// before.
    pub fn capture_logs() {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            log::set_logger(&LOGGER).unwrap();
            log::set_max_level(log::LevelFilter::Trace);
        });

        CAPTURED.with(|captured| captured.borrow_mut().clear());
    }

    /// The warnings logged on this thread since [`capture_logs`].
    pub fn captured_warnings() -> Vec<String> {
        CAPTURED.with(|captured| {
            captured
                .borrow()
                .iter()
                .filter(|(level, _)| *level == log::Level::Warn)
                .map(|(_, message)| message.clone())
                .collect()
        })
    }
}
