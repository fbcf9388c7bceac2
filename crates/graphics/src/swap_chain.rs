use std::cell::Cell;

use geometry::{Extent, Px};
use log::debug;

use crate::{
    backend::{Device, SwapChain},
    resource::{TextureDesc, TextureUsage},
    Format, ResourceId, ResourceState, Result,
};

/// A swap chain made of ordinary render-target textures.
///
/// Nothing is shown on screen; [`TextureSwapChain::present`] only advances to
/// the next buffer. Used to render without a window.
pub struct TextureSwapChain {
    buffers: Vec<ResourceId>,
    index: Cell<u32>,
    format: Format,
    extent: Extent<u32, Px>,
}

impl TextureSwapChain {
    /// Creates `count` back buffers in the `Present` state.
    ///
    /// ## Errors
    ///
    /// Returns the device's error if a buffer cannot be created. Buffers
    /// created before the failure are destroyed.
    pub fn new(
        device: &mut dyn Device,
        count: u32,
        format: Format,
        extent: Extent<u32, Px>,
    ) -> Result<Self> {
        let mut buffers = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let desc = TextureDesc::texture_2d(
                "Back Buffer",
                extent,
                format,
                TextureUsage::RENDER_TARGET,
                ResourceState::Present,
            );

            match device.create_texture(&desc) {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    for buffer in buffers {
                        device.destroy_resource(buffer);
                    }
                    return Err(e);
                }
            }
        }

        debug!(
            "created {count} {}x{} back buffers",
            extent.width, extent.height
        );

        Ok(Self {
            buffers,
            index: Cell::new(0),
            format,
            extent,
        })
    }

    /// Moves on to the next back buffer and returns its index.
    pub fn present(&self) -> u32 {
        let next = (self.index.get() + 1) % self.back_buffer_count();
        self.index.set(next);
        next
    }

    /// Destroys the back buffers.
    pub fn destroy(self, device: &mut dyn Device) {
        for buffer in self.buffers {
            device.destroy_resource(buffer);
        }
    }
}

impl SwapChain for TextureSwapChain {
    fn back_buffer_count(&self) -> u32 {
        self.buffers.len() as u32
    }

    fn current_back_buffer_index(&self) -> u32 {
        self.index.get()
    }

    fn back_buffer(&self, index: u32) -> ResourceId {
        self.buffers[index as usize]
    }

    fn format(&self) -> Format {
        self.format
    }

    fn extent(&self) -> Extent<u32, Px> {
        self.extent
    }
}
