use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use geometry::{Extent, Px};
use log::debug;
use raw_window_handle::Win32WindowHandle;
use windows::{
    core::Interface,
    Win32::{
        Foundation::{CloseHandle, HANDLE, HWND},
        Graphics::{
            Direct3D12::ID3D12Resource,
            Dxgi::{Common::*, *},
        },
        System::Threading::WaitForSingleObject,
    },
};

use super::{dx, queue::Queue, Registry, Resource};
use crate::{backend::SwapChain, Format, GraphicsConfig, ResourceId, Result};

/// A flip-discard swap chain attached to a Win32 window.
///
/// The back buffers are registered with the backend so that they can be
/// targeted by views and barriers like any other texture.
pub struct WindowSwapChain {
    swap_chain: IDXGISwapChain3,
    registry: Rc<RefCell<Registry>>,
    buffers: Vec<ResourceId>,
    index: Cell<u32>,
    format: Format,
    extent: Extent<u32, Px>,
    waitable_object: HANDLE,
}

impl WindowSwapChain {
    pub(super) fn new(
        dx: Rc<dx::Interfaces>,
        registry: Rc<RefCell<Registry>>,
        queue: Rc<RefCell<Queue>>,
        window: Win32WindowHandle,
        config: &GraphicsConfig,
    ) -> Result<Self> {
        let window = HWND(window.hwnd);

        // Limits the number of queued frames; present blocks until the
        // display catches up.
        let flags = DXGI_SWAP_CHAIN_FLAG_FRAME_LATENCY_WAITABLE_OBJECT;

        let swap_chain: IDXGISwapChain3 = unsafe {
            dx.gi.CreateSwapChainForHwnd(
                &queue.borrow().queue,
                window,
                &DXGI_SWAP_CHAIN_DESC1 {
                    Width: config.extent.width,
                    Height: config.extent.height,
                    Format: config.back_buffer_format.into(),
                    Stereo: false.into(),
                    SampleDesc: DXGI_SAMPLE_DESC {
                        Count: 1,
                        Quality: 0,
                    },
                    BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
                    BufferCount: config.back_buffer_count,
                    Scaling: DXGI_SCALING_STRETCH,
                    SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
                    AlphaMode: DXGI_ALPHA_MODE_IGNORE,
                    Flags: flags.0 as u32,
                },
                None,
                None,
            )
        }?
        .cast()?;

        // Disable fullscreen transitions
        unsafe { dx.gi.MakeWindowAssociation(window, DXGI_MWA_NO_ALT_ENTER) }?;

        let waitable_object = unsafe { swap_chain.GetFrameLatencyWaitableObject() };

        let buffers = {
            let mut registry = registry.borrow_mut();
            let mut buffers = Vec::with_capacity(config.back_buffer_count as usize);
            for i in 0..config.back_buffer_count {
                let resource: ID3D12Resource = unsafe { swap_chain.GetBuffer(i) }?;
                buffers.push(registry.insert_resource(Resource {
                    resource,
                    mapped: std::ptr::null_mut(),
                    size: 0,
                }));
            }
            buffers
        };

        let index = unsafe { swap_chain.GetCurrentBackBufferIndex() };

        debug!(
            "created window swap chain with {} {}x{} back buffers",
            config.back_buffer_count, config.extent.width, config.extent.height
        );

        Ok(Self {
            swap_chain,
            registry,
            buffers,
            index: Cell::new(index),
            format: config.back_buffer_format,
            extent: config.extent,
            waitable_object,
        })
    }

    /// Presents the current back buffer with vsync, then waits until the
    /// next one can be drawn to.
    pub fn present(&self) -> Result<u32> {
        unsafe { self.swap_chain.Present(1, DXGI_PRESENT(0)) }.ok()?;
        unsafe { WaitForSingleObject(self.waitable_object, 1000) };

        let index = unsafe { self.swap_chain.GetCurrentBackBufferIndex() };
        self.index.set(index);
        Ok(index)
    }
}

impl SwapChain for WindowSwapChain {
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

impl Drop for WindowSwapChain {
    fn drop(&mut self) {
        let mut registry = self.registry.borrow_mut();
        for buffer in self.buffers.drain(..) {
            registry.retire_resource(buffer);
        }

        if let Err(e) = unsafe { CloseHandle(self.waitable_object) } {
            log::warn!("could not close frame latency object: {e}");
        }
    }
}
