//! The Direct3D 12 backend.
//!
//! [`Dx12Backend`] owns the DXGI factory, the device and the direct queue,
//! and hands out the [`Device`], [`ShaderCompiler`], [`SwapChain`] and
//! [`CommandList`] implementations the rest of the crate is written against.
//! Resources and pipelines live in a registry shared by all of them, keyed by
//! the same generational ids the headless backend uses.
//!
//! [`Device`]: crate::backend::Device
//! [`ShaderCompiler`]: crate::backend::ShaderCompiler
//! [`SwapChain`]: crate::backend::SwapChain
//! [`CommandList`]: crate::backend::CommandList

mod commands;
mod device;
mod dx;
mod queue;
mod shader;
mod swap_chain;

use std::{cell::RefCell, mem::ManuallyDrop, rc::Rc};

use log::info;
use raw_window_handle::RawWindowHandle;
use structures::slot_table::{Key, SlotTable};
use windows::Win32::Graphics::{Direct3D12::*, Dxgi::Common::*};

pub use commands::Dx12CommandList;
pub use device::Dx12Device;
pub use shader::FxcCompiler;
pub use swap_chain::WindowSwapChain;

use crate::{
    DescriptorHeapKind, Error, Format, GraphicsConfig, PipelineId, ResourceId, ResourceState,
    Result,
};

pub struct Dx12Backend {
    dx: Rc<dx::Interfaces>,
    registry: Rc<RefCell<Registry>>,
    queue: Rc<RefCell<queue::Queue>>,
}

impl Dx12Backend {
    pub fn new(config: &GraphicsConfig) -> Result<Self> {
        let dx = dx::Interfaces::new(config)?;
        let queue = queue::Queue::new(&dx)?;

        info!("Direct3D 12 backend ready");

        Ok(Self {
            dx: Rc::new(dx),
            registry: Rc::default(),
            queue: Rc::new(RefCell::new(queue)),
        })
    }

    #[must_use]
    pub fn device(&self) -> Dx12Device {
        Dx12Device::new(self.dx.clone(), self.registry.clone())
    }

    #[must_use]
    pub fn shader_compiler(&self) -> FxcCompiler {
        FxcCompiler::new(self.dx.is_debug)
    }

    /// Creates a swap chain for `window`, which must be a Win32 window.
    pub fn create_swap_chain(
        &self,
        window: RawWindowHandle,
        config: &GraphicsConfig,
    ) -> Result<WindowSwapChain> {
        match window {
            RawWindowHandle::Win32(handle) => WindowSwapChain::new(
                self.dx.clone(),
                self.registry.clone(),
                self.queue.clone(),
                handle,
                config,
            ),
            _ => Err(Error::Device(
                "the Direct3D 12 backend only supports Win32 windows".to_owned(),
            )),
        }
    }

    /// Waits for the previous frame and opens a command list for the next.
    /// Resources destroyed before this call are released here.
    pub fn begin_commands(&self) -> Result<Dx12CommandList> {
        let commands = self.queue.borrow_mut().begin()?;
        self.registry.borrow_mut().release_retired();
        Ok(Dx12CommandList::new(commands, self.registry.clone()))
    }

    /// Closes and executes `commands`.
    pub fn submit(&self, commands: Dx12CommandList) -> Result<u64> {
        drop(commands);
        self.queue.borrow_mut().submit()
    }

    /// Blocks until the GPU is idle.
    pub fn flush(&self) -> Result<()> {
        self.queue.borrow_mut().flush()?;
        self.registry.borrow_mut().release_retired();
        Ok(())
    }
}

impl Drop for Dx12Backend {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("could not flush the graphics queue: {e}");
        }
    }
}

pub(crate) struct Resource {
    pub resource: ID3D12Resource,
    /// Start of the persistent mapping for upload buffers, null otherwise.
    pub mapped: *mut u8,
    pub size: u64,
}

pub(crate) struct Pipeline {
    pub root_signature: ID3D12RootSignature,
    pub state: ID3D12PipelineState,
}

/// Everything the backend has created, addressable by id.
#[derive(Default)]
pub(crate) struct Registry {
    resources: SlotTable<Resource>,
    pipelines: SlotTable<Pipeline>,
    heaps: Vec<ID3D12DescriptorHeap>,
    shader_visible_heap: Option<ID3D12DescriptorHeap>,
    // Objects destroyed while the GPU may still use them.
    retired_resources: Vec<ID3D12Resource>,
    retired_pipelines: Vec<Pipeline>,
}

impl Registry {
    pub fn insert_resource(&mut self, resource: Resource) -> ResourceId {
        ResourceId::new(self.resources.insert(resource).to_bits())
    }

    pub fn resource(&self, id: ResourceId) -> Result<&Resource> {
        self.resources
            .get(Key::from_bits(id.raw()))
            .ok_or(Error::UnknownResource(id))
    }

    pub fn retire_resource(&mut self, id: ResourceId) {
        if let Some(resource) = self.resources.remove(Key::from_bits(id.raw())) {
            self.retired_resources.push(resource.resource);
        }
    }

    pub fn insert_pipeline(&mut self, pipeline: Pipeline) -> PipelineId {
        PipelineId::new(self.pipelines.insert(pipeline).to_bits())
    }

    pub fn pipeline(&self, id: PipelineId) -> Result<&Pipeline> {
        self.pipelines
            .get(Key::from_bits(id.raw()))
            .ok_or(Error::UnknownPipeline(id))
    }

    pub fn retire_pipeline(&mut self, id: PipelineId) {
        if let Some(pipeline) = self.pipelines.remove(Key::from_bits(id.raw())) {
            self.retired_pipelines.push(pipeline);
        }
    }

    pub fn add_heap(&mut self, heap: ID3D12DescriptorHeap, shader_visible: bool) {
        if shader_visible {
            self.shader_visible_heap = Some(heap.clone());
        }
        self.heaps.push(heap);
    }

    pub fn shader_visible_heap(&self) -> Option<&ID3D12DescriptorHeap> {
        self.shader_visible_heap.as_ref()
    }

    fn release_retired(&mut self) {
        self.retired_resources.clear();
        self.retired_pipelines.clear();
    }
}

impl From<Format> for DXGI_FORMAT {
    fn from(format: Format) -> Self {
        match format {
            Format::Unknown => DXGI_FORMAT_UNKNOWN,
            Format::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
            Format::Rgba8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
            Format::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
            Format::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
            Format::Rg32Float => DXGI_FORMAT_R32G32_FLOAT,
            Format::R32Float => DXGI_FORMAT_R32_FLOAT,
            Format::R32Typeless => DXGI_FORMAT_R32_TYPELESS,
            Format::R24G8Typeless => DXGI_FORMAT_R24G8_TYPELESS,
            Format::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
            Format::R24UnormX8Typeless => DXGI_FORMAT_R24_UNORM_X8_TYPELESS,
            Format::D32Float => DXGI_FORMAT_D32_FLOAT,
        }
    }
}

impl From<ResourceState> for D3D12_RESOURCE_STATES {
    fn from(state: ResourceState) -> Self {
        match state {
            ResourceState::Common | ResourceState::Present => D3D12_RESOURCE_STATE_COMMON,
            ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
            ResourceState::PixelShaderResource => D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
            ResourceState::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
            ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
            ResourceState::CopyDest => D3D12_RESOURCE_STATE_COPY_DEST,
        }
    }
}

impl From<DescriptorHeapKind> for D3D12_DESCRIPTOR_HEAP_TYPE {
    fn from(kind: DescriptorHeapKind) -> Self {
        match kind {
            DescriptorHeapKind::Rtv => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
            DescriptorHeapKind::Dsv => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
            DescriptorHeapKind::Srv => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        }
    }
}

fn transition_barrier(
    resource: &ID3D12Resource,
    state_before: D3D12_RESOURCE_STATES,
    state_after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: ManuallyDrop::new(Some(resource.clone())),
                StateBefore: state_before,
                StateAfter: state_after,
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
            }),
        },
    }
}

/// Releases the resource reference held by a barrier built with
/// [`transition_barrier`].
fn release_barrier(barrier: D3D12_RESOURCE_BARRIER) {
    let transition = ManuallyDrop::into_inner(unsafe { barrier.Anonymous.Transition });
    drop(ManuallyDrop::into_inner(transition.pResource));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats() {
        assert_eq!(
            DXGI_FORMAT::from(Format::R24G8Typeless),
            DXGI_FORMAT_R24G8_TYPELESS
        );
        assert_eq!(
            DXGI_FORMAT::from(Format::D24UnormS8Uint),
            DXGI_FORMAT_D24_UNORM_S8_UINT
        );
        assert_eq!(
            DXGI_FORMAT::from(Format::R24UnormX8Typeless),
            DXGI_FORMAT_R24_UNORM_X8_TYPELESS
        );
    }

    #[test]
    fn present_is_common() {
        assert_eq!(
            D3D12_RESOURCE_STATES::from(ResourceState::Present),
            D3D12_RESOURCE_STATE_COMMON
        );
        assert_eq!(
            D3D12_RESOURCE_STATES::from(ResourceState::PixelShaderResource),
            D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE
        );
    }

    #[test]
    fn only_srv_heap_is_shader_visible() {
        for kind in DescriptorHeapKind::ALL {
            let ty = D3D12_DESCRIPTOR_HEAP_TYPE::from(kind);
            assert_eq!(
                kind.is_shader_visible(),
                ty == D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV
            );
        }
    }
}
