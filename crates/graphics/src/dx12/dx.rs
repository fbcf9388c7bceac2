use log::{debug, error, info, warn};
use windows::{
    core::{Interface, PCSTR},
    Win32::Graphics::{Direct3D::D3D_FEATURE_LEVEL_11_0, Direct3D12::*, Dxgi::*},
};

use crate::{GraphicsConfig, PowerPreference, Result};

pub struct Interfaces {
    pub is_debug: bool,
    pub gi: IDXGIFactory6,
    pub device: ID3D12Device,
}

impl Interfaces {
    pub fn new(config: &GraphicsConfig) -> Result<Self> {
        // Use IDXGIFactory6 for power preferece selection
        let gi: IDXGIFactory6 = {
            let flags = if config.debug_mode {
                DXGI_CREATE_FACTORY_DEBUG
            } else {
                DXGI_CREATE_FACTORY_FLAGS(0)
            };

            unsafe { CreateDXGIFactory2(flags) }?
        };

        let power_preference = match config.power_preference {
            PowerPreference::DontCare => DXGI_GPU_PREFERENCE_UNSPECIFIED,
            PowerPreference::LowPower => DXGI_GPU_PREFERENCE_MINIMUM_POWER,
            PowerPreference::HiPower => DXGI_GPU_PREFERENCE_HIGH_PERFORMANCE,
        };

        let adapter: IDXGIAdapter = unsafe { gi.EnumAdapterByGpuPreference(0, power_preference) }
            .or_else(|_| {
                warn!("no hardware adapter, falling back to WARP");
                unsafe { gi.EnumWarpAdapter() }
            })?;

        if config.debug_mode {
            let mut dx_debug: Option<ID3D12Debug> = None;
            unsafe { D3D12GetDebugInterface(&mut dx_debug) }?;
            if let Some(dx_debug) = dx_debug {
                unsafe { dx_debug.EnableDebugLayer() };
            }
        }

        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device) }?;
        let device = device
            .ok_or_else(|| crate::Error::Device("D3D12CreateDevice returned no device".to_owned()))?;

        if config.debug_mode {
            // The callback interface is missing before Windows 11; the debug
            // layer still prints to the debugger there.
            match device.cast::<ID3D12InfoQueue1>() {
                Ok(queue) => {
                    let mut cookie = 0;
                    unsafe {
                        queue.RegisterMessageCallback(
                            Some(Self::d3d12_debug_callback),
                            D3D12_MESSAGE_CALLBACK_IGNORE_FILTERS,
                            std::ptr::null(),
                            &mut cookie,
                        )
                    }?;
                }
                Err(e) => warn!("D3D12 debug messages will not be logged: {e}"),
            }
        }

        let desc = unsafe { adapter.GetDesc() }?;
        let name_len = desc
            .Description
            .iter()
            .position(|c| *c == 0)
            .unwrap_or(desc.Description.len());
        info!(
            "using adapter {}",
            String::from_utf16_lossy(&desc.Description[..name_len])
        );

        Ok(Self {
            is_debug: config.debug_mode,
            gi,
            device,
        })
    }

    extern "system" fn d3d12_debug_callback(
        _category: D3D12_MESSAGE_CATEGORY,
        severity: D3D12_MESSAGE_SEVERITY,
        id: D3D12_MESSAGE_ID,
        description: PCSTR,
        _context: *mut std::ffi::c_void,
    ) {
        let description = unsafe { description.display() };
        match severity {
            D3D12_MESSAGE_SEVERITY_CORRUPTION | D3D12_MESSAGE_SEVERITY_ERROR => {
                error!("D3D12 {id:?}: {description}");
            }
            D3D12_MESSAGE_SEVERITY_WARNING => warn!("D3D12 {id:?}: {description}"),
            D3D12_MESSAGE_SEVERITY_INFO => info!("D3D12 {id:?}: {description}"),
            _ => debug!("D3D12 {id:?}: {description}"),
        }
    }
}

impl Drop for Interfaces {
    fn drop(&mut self) {
        if self.is_debug {
            let report = unsafe { DXGIGetDebugInterface1::<IDXGIDebug1>(0) }.and_then(|debug| {
                unsafe {
                    debug.ReportLiveObjects(
                        DXGI_DEBUG_ALL,
                        DXGI_DEBUG_RLO_SUMMARY | DXGI_DEBUG_RLO_IGNORE_INTERNAL,
                    )
                }
            });

            if let Err(e) = report {
                warn!("could not report live DXGI objects: {e}");
            }
        }
    }
}
