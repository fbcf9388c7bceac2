use std::{cell::RefCell, rc::Rc};

use geometry::{Px, Rect, Viewport};
use log::warn;
use smallvec::SmallVec;
use windows::Win32::{
    Foundation::RECT,
    Graphics::{Direct3D::D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST, Direct3D12::*},
};

use super::{release_barrier, transition_barrier, Registry};
use crate::{
    backend::{CommandList, GpuAddress, VertexBufferView},
    resource::Barrier,
    Color, CpuHandle, GpuHandle, PipelineId,
};

/// An open command list on the direct queue.
///
/// Unknown resource and pipeline ids are logged and skipped; recording never
/// fails.
pub struct Dx12CommandList {
    commands: ID3D12GraphicsCommandList,
    registry: Rc<RefCell<Registry>>,
}

impl Dx12CommandList {
    pub(super) fn new(
        commands: ID3D12GraphicsCommandList,
        registry: Rc<RefCell<Registry>>,
    ) -> Self {
        Self { commands, registry }
    }
}

fn cpu_handle(handle: CpuHandle) -> D3D12_CPU_DESCRIPTOR_HANDLE {
    D3D12_CPU_DESCRIPTOR_HANDLE {
        ptr: handle.0 as usize,
    }
}

impl CommandList for Dx12CommandList {
    fn resource_barrier(&mut self, barriers: &[Barrier]) {
        let registry = self.registry.borrow();

        let native = barriers
            .iter()
            .filter_map(|barrier| match registry.resource(barrier.resource) {
                Ok(resource) => Some(transition_barrier(
                    &resource.resource,
                    barrier.before.into(),
                    barrier.after.into(),
                )),
                Err(e) => {
                    warn!("barrier skipped: {e}");
                    None
                }
            })
            .collect::<SmallVec<[_; 4]>>();

        if native.is_empty() {
            return;
        }

        unsafe { self.commands.ResourceBarrier(&native) };

        for barrier in native {
            release_barrier(barrier);
        }
    }

    fn set_render_targets(&mut self, render_targets: &[CpuHandle], depth_stencil: Option<CpuHandle>) {
        let render_targets = render_targets
            .iter()
            .copied()
            .map(cpu_handle)
            .collect::<SmallVec<[_; 8]>>();
        let depth_stencil = depth_stencil.map(cpu_handle);

        unsafe {
            self.commands.OMSetRenderTargets(
                render_targets.len() as u32,
                Some(render_targets.as_ptr()),
                false,
                depth_stencil.as_ref().map(|handle| handle as *const _),
            );
        }
    }

    fn clear_render_target(&mut self, render_target: CpuHandle, color: Color) {
        unsafe {
            self.commands
                .ClearRenderTargetView(cpu_handle(render_target), &color.to_array(), None);
        }
    }

    fn clear_depth_stencil(&mut self, depth_stencil: CpuHandle, depth: f32, stencil: u8) {
        unsafe {
            self.commands.ClearDepthStencilView(
                cpu_handle(depth_stencil),
                D3D12_CLEAR_FLAG_DEPTH | D3D12_CLEAR_FLAG_STENCIL,
                depth,
                stencil,
                &[],
            );
        }
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        unsafe {
            self.commands.RSSetViewports(&[D3D12_VIEWPORT {
                TopLeftX: viewport.x,
                TopLeftY: viewport.y,
                Width: viewport.width,
                Height: viewport.height,
                MinDepth: viewport.min_depth,
                MaxDepth: viewport.max_depth,
            }]);
        }
    }

    fn set_scissor_rect(&mut self, rect: &Rect<u32, Px>) {
        let top_left = rect.top_left();
        let bottom_right = rect.bottom_right();

        unsafe {
            self.commands.RSSetScissorRects(&[RECT {
                left: top_left.x as i32,
                top: top_left.y as i32,
                right: bottom_right.x as i32,
                bottom: bottom_right.y as i32,
            }]);
        }
    }

    fn set_pipeline(&mut self, pipeline: PipelineId) {
        let registry = self.registry.borrow();
        match registry.pipeline(pipeline) {
            Ok(pipeline) => unsafe {
                self.commands
                    .SetGraphicsRootSignature(&pipeline.root_signature);
                self.commands.SetPipelineState(&pipeline.state);
                self.commands
                    .IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            },
            Err(e) => warn!("pipeline not bound: {e}"),
        };
    }

    fn set_descriptor_heaps(&mut self) {
        let registry = self.registry.borrow();
        if let Some(heap) = registry.shader_visible_heap() {
            unsafe { self.commands.SetDescriptorHeaps(&[Some(heap.clone())]) };
        };
    }

    fn set_descriptor_table(&mut self, root_index: u32, base: GpuHandle) {
        unsafe {
            self.commands.SetGraphicsRootDescriptorTable(
                root_index,
                D3D12_GPU_DESCRIPTOR_HANDLE { ptr: base.0 },
            );
        }
    }

    fn set_constant_buffer(&mut self, root_index: u32, address: GpuAddress) {
        unsafe {
            self.commands
                .SetGraphicsRootConstantBufferView(root_index, address.0);
        }
    }

    fn set_vertex_buffer(&mut self, view: &VertexBufferView) {
        unsafe {
            self.commands.IASetVertexBuffers(
                0,
                Some(&[D3D12_VERTEX_BUFFER_VIEW {
                    BufferLocation: view.address.0,
                    SizeInBytes: view.size,
                    StrideInBytes: view.stride,
                }]),
            );
        }
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        unsafe {
            self.commands
                .DrawInstanced(vertex_count, instance_count, 0, 0);
        }
    }
}
