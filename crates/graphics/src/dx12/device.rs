use std::{cell::RefCell, ffi::CString, rc::Rc};

use windows::{
    core::{PCSTR, PCWSTR},
    Win32::Graphics::{Direct3D12::*, Dxgi::Common::*},
};

use super::{dx, Pipeline, Registry, Resource};
use crate::{
    backend::{Device, GpuAddress, PipelineDesc},
    descriptor::DescriptorHeapStart,
    resource::{BufferDesc, ClearValue, MemoryKind, TextureDesc, TextureDimension, TextureUsage},
    view::ViewDesc,
    CpuHandle, DescriptorHeapKind, Error, GpuHandle, PipelineId, ResourceId, Result,
};

pub struct Dx12Device {
    dx: Rc<dx::Interfaces>,
    registry: Rc<RefCell<Registry>>,
}

impl Dx12Device {
    pub(super) fn new(dx: Rc<dx::Interfaces>, registry: Rc<RefCell<Registry>>) -> Self {
        Self { dx, registry }
    }

    fn resource(&self, id: ResourceId) -> Result<ID3D12Resource> {
        Ok(self.registry.borrow().resource(id)?.resource.clone())
    }

    fn create_committed(
        &self,
        label: &'static str,
        heap_type: D3D12_HEAP_TYPE,
        desc: &D3D12_RESOURCE_DESC,
        state: D3D12_RESOURCE_STATES,
        clear_value: Option<&D3D12_CLEAR_VALUE>,
    ) -> Result<ID3D12Resource> {
        let heap_properties = D3D12_HEAP_PROPERTIES {
            Type: heap_type,
            ..Default::default()
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.dx.device.CreateCommittedResource(
                &heap_properties,
                D3D12_HEAP_FLAG_NONE,
                desc,
                state,
                clear_value.map(|value| value as *const _),
                &mut resource,
            )
        }?;

        let resource =
            resource.ok_or_else(|| Error::Device(format!("could not create `{label}`")))?;

        if self.dx.is_debug {
            let name: Vec<u16> = label.encode_utf16().chain(Some(0)).collect();
            unsafe { resource.SetName(PCWSTR(name.as_ptr())) }?;
        }

        Ok(resource)
    }
}

impl Device for Dx12Device {
    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorHeapKind,
        capacity: u32,
    ) -> Result<DescriptorHeapStart> {
        let shader_visible = kind.is_shader_visible();
        let ty = D3D12_DESCRIPTOR_HEAP_TYPE::from(kind);

        let heap: ID3D12DescriptorHeap = unsafe {
            self.dx
                .device
                .CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                    Type: ty,
                    NumDescriptors: capacity,
                    Flags: if shader_visible {
                        D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
                    } else {
                        D3D12_DESCRIPTOR_HEAP_FLAG_NONE
                    },
                    NodeMask: 0,
                })
        }?;

        let cpu = unsafe { heap.GetCPUDescriptorHandleForHeapStart() };
        let gpu = if shader_visible {
            GpuHandle(unsafe { heap.GetGPUDescriptorHandleForHeapStart() }.ptr)
        } else {
            GpuHandle::NULL
        };
        let stride = unsafe { self.dx.device.GetDescriptorHandleIncrementSize(ty) };

        self.registry.borrow_mut().add_heap(heap, shader_visible);

        Ok(DescriptorHeapStart {
            cpu: CpuHandle(cpu.ptr as u64),
            gpu,
            stride,
        })
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<ResourceId> {
        let mut flags = D3D12_RESOURCE_FLAG_NONE;
        if desc.usage.contains(TextureUsage::RENDER_TARGET) {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
        }
        if desc.usage.contains(TextureUsage::DEPTH_STENCIL) {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
            if !desc.usage.contains(TextureUsage::SHADER_RESOURCE) {
                flags |= D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE;
            }
        }
        if desc.usage.contains(TextureUsage::UNORDERED_ACCESS) {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
        }

        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: match desc.dimension {
                TextureDimension::D2 => D3D12_RESOURCE_DIMENSION_TEXTURE2D,
                TextureDimension::D3 => D3D12_RESOURCE_DIMENSION_TEXTURE3D,
            },
            Alignment: 0,
            Width: u64::from(desc.extent.width),
            Height: desc.extent.height,
            DepthOrArraySize: desc.depth_or_layers,
            MipLevels: desc.mip_levels,
            Format: desc.format.into(),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: flags,
        };

        // Typeless depth textures are cleared through their depth view, so
        // the clear value names that format instead.
        let clear_format = match desc.format {
            crate::Format::R24G8Typeless => DXGI_FORMAT_D24_UNORM_S8_UINT,
            crate::Format::R32Typeless => DXGI_FORMAT_D32_FLOAT,
            format => format.into(),
        };

        let clear_value = desc.clear_value.map(|value| match value {
            ClearValue::Color(color) => D3D12_CLEAR_VALUE {
                Format: clear_format,
                Anonymous: D3D12_CLEAR_VALUE_0 {
                    Color: color.to_array(),
                },
            },
            ClearValue::DepthStencil { depth, stencil } => D3D12_CLEAR_VALUE {
                Format: clear_format,
                Anonymous: D3D12_CLEAR_VALUE_0 {
                    DepthStencil: D3D12_DEPTH_STENCIL_VALUE {
                        Depth: depth,
                        Stencil: stencil,
                    },
                },
            },
        });

        let resource = self.create_committed(
            desc.label,
            D3D12_HEAP_TYPE_DEFAULT,
            &resource_desc,
            desc.initial_state.into(),
            clear_value.as_ref(),
        )?;

        Ok(self.registry.borrow_mut().insert_resource(Resource {
            resource,
            mapped: std::ptr::null_mut(),
            size: 0,
        }))
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<ResourceId> {
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Alignment: 0,
            Width: desc.size,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: D3D12_RESOURCE_FLAG_NONE,
        };

        let heap_type = match desc.memory {
            MemoryKind::Default => D3D12_HEAP_TYPE_DEFAULT,
            MemoryKind::Upload => D3D12_HEAP_TYPE_UPLOAD,
        };

        let resource = self.create_committed(
            desc.label,
            heap_type,
            &resource_desc,
            desc.initial_state.into(),
            None,
        )?;

        let mapped = if desc.memory == MemoryKind::Upload {
            let mut ptr = std::ptr::null_mut();
            unsafe { resource.Map(0, None, Some(&mut ptr)) }?;
            ptr.cast()
        } else {
            std::ptr::null_mut()
        };

        Ok(self.registry.borrow_mut().insert_resource(Resource {
            resource,
            mapped,
            size: desc.size,
        }))
    }

    fn write_buffer(&mut self, buffer: ResourceId, offset: u64, data: &[u8]) -> Result<()> {
        let registry = self.registry.borrow();
        let resource = registry.resource(buffer)?;

        if resource.mapped.is_null() {
            return Err(Error::Device(format!("{buffer:?} is not CPU writable")));
        }

        let end = offset + data.len() as u64;
        if end > resource.size {
            return Err(Error::Device(format!(
                "write of {} bytes at {offset} overflows {buffer:?} ({} bytes)",
                data.len(),
                resource.size
            )));
        }

        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                resource.mapped.add(offset as usize),
                data.len(),
            );
        }

        Ok(())
    }

    fn gpu_address(&self, buffer: ResourceId) -> Result<GpuAddress> {
        let registry = self.registry.borrow();
        let resource = registry.resource(buffer)?;
        Ok(GpuAddress(unsafe { resource.resource.GetGPUVirtualAddress() }))
    }

    fn destroy_resource(&mut self, resource: ResourceId) {
        self.registry.borrow_mut().retire_resource(resource);
    }

    fn create_view(
        &mut self,
        resource: ResourceId,
        desc: &ViewDesc,
        destination: CpuHandle,
    ) -> Result<()> {
        let resource = self.resource(resource)?;
        let destination = D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: destination.0 as usize,
        };
        let device = &self.dx.device;

        match *desc {
            ViewDesc::Texture2dSrv { format, mip_levels } => {
                let view = srv_desc(
                    format.into(),
                    D3D12_SRV_DIMENSION_TEXTURE2D,
                    D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        Texture2D: D3D12_TEX2D_SRV {
                            MipLevels: u32::from(mip_levels),
                            ..Default::default()
                        },
                    },
                );
                unsafe { device.CreateShaderResourceView(&resource, Some(&view), destination) };
            }
            ViewDesc::Texture3dSrv { format, mip_levels } => {
                let view = srv_desc(
                    format.into(),
                    D3D12_SRV_DIMENSION_TEXTURE3D,
                    D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        Texture3D: D3D12_TEX3D_SRV {
                            MipLevels: u32::from(mip_levels),
                            ..Default::default()
                        },
                    },
                );
                unsafe { device.CreateShaderResourceView(&resource, Some(&view), destination) };
            }
            ViewDesc::TextureCubeSrv { format, mip_levels } => {
                let view = srv_desc(
                    format.into(),
                    D3D12_SRV_DIMENSION_TEXTURECUBE,
                    D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        TextureCube: D3D12_TEXCUBE_SRV {
                            MipLevels: u32::from(mip_levels),
                            ..Default::default()
                        },
                    },
                );
                unsafe { device.CreateShaderResourceView(&resource, Some(&view), destination) };
            }
            ViewDesc::StructuredBufferSrv {
                first_element,
                element_count,
                stride,
            } => {
                let view = srv_desc(
                    DXGI_FORMAT_UNKNOWN,
                    D3D12_SRV_DIMENSION_BUFFER,
                    D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        Buffer: D3D12_BUFFER_SRV {
                            FirstElement: first_element,
                            NumElements: element_count,
                            StructureByteStride: stride,
                            Flags: D3D12_BUFFER_SRV_FLAG_NONE,
                        },
                    },
                );
                unsafe { device.CreateShaderResourceView(&resource, Some(&view), destination) };
            }
            ViewDesc::RawBufferSrv {
                first_element,
                element_count,
            } => {
                let view = srv_desc(
                    DXGI_FORMAT_R32_TYPELESS,
                    D3D12_SRV_DIMENSION_BUFFER,
                    D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        Buffer: D3D12_BUFFER_SRV {
                            FirstElement: first_element,
                            NumElements: element_count,
                            StructureByteStride: 0,
                            Flags: D3D12_BUFFER_SRV_FLAG_RAW,
                        },
                    },
                );
                unsafe { device.CreateShaderResourceView(&resource, Some(&view), destination) };
            }
            ViewDesc::TypedBufferSrv {
                format,
                first_element,
                element_count,
            } => {
                let view = srv_desc(
                    format.into(),
                    D3D12_SRV_DIMENSION_BUFFER,
                    D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                        Buffer: D3D12_BUFFER_SRV {
                            FirstElement: first_element,
                            NumElements: element_count,
                            StructureByteStride: 0,
                            Flags: D3D12_BUFFER_SRV_FLAG_NONE,
                        },
                    },
                );
                unsafe { device.CreateShaderResourceView(&resource, Some(&view), destination) };
            }
            ViewDesc::Texture2dRtv { format } => {
                let view = D3D12_RENDER_TARGET_VIEW_DESC {
                    Format: format.into(),
                    ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
                    Anonymous: D3D12_RENDER_TARGET_VIEW_DESC_0 {
                        Texture2D: D3D12_TEX2D_RTV::default(),
                    },
                };
                unsafe { device.CreateRenderTargetView(&resource, Some(&view), destination) };
            }
            ViewDesc::Texture2dDsv { format } => {
                let view = D3D12_DEPTH_STENCIL_VIEW_DESC {
                    Format: format.into(),
                    ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
                    Flags: D3D12_DSV_FLAG_NONE,
                    Anonymous: D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                        Texture2D: D3D12_TEX2D_DSV::default(),
                    },
                };
                unsafe { device.CreateDepthStencilView(&resource, Some(&view), destination) };
            }
            ViewDesc::Texture2dUav { format } => {
                let view = D3D12_UNORDERED_ACCESS_VIEW_DESC {
                    Format: format.into(),
                    ViewDimension: D3D12_UAV_DIMENSION_TEXTURE2D,
                    Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                        Texture2D: D3D12_TEX2D_UAV::default(),
                    },
                };
                unsafe {
                    device.CreateUnorderedAccessView(&resource, None, Some(&view), destination);
                };
            }
            ViewDesc::StructuredBufferUav {
                first_element,
                element_count,
                stride,
            } => {
                let view = D3D12_UNORDERED_ACCESS_VIEW_DESC {
                    Format: DXGI_FORMAT_UNKNOWN,
                    ViewDimension: D3D12_UAV_DIMENSION_BUFFER,
                    Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                        Buffer: D3D12_BUFFER_UAV {
                            FirstElement: first_element,
                            NumElements: element_count,
                            StructureByteStride: stride,
                            CounterOffsetInBytes: 0,
                            Flags: D3D12_BUFFER_UAV_FLAG_NONE,
                        },
                    },
                };
                unsafe {
                    device.CreateUnorderedAccessView(&resource, None, Some(&view), destination);
                };
            }
        }

        Ok(())
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineId> {
        let vertex_shader = desc.vertex_shader.0.as_slice();
        let pixel_shader = desc.pixel_shader.0.as_slice();

        let root_signature: ID3D12RootSignature =
            unsafe { self.dx.device.CreateRootSignature(0, vertex_shader) }?;

        let semantics = desc
            .input_layout
            .iter()
            .map(|attribute| {
                CString::new(attribute.semantic)
                    .map_err(|_| Error::Device(format!("bad semantic `{}`", attribute.semantic)))
            })
            .collect::<Result<Vec<_>>>()?;

        let input_elements = desc
            .input_layout
            .iter()
            .zip(&semantics)
            .map(|(attribute, semantic)| D3D12_INPUT_ELEMENT_DESC {
                SemanticName: PCSTR(semantic.as_ptr().cast()),
                SemanticIndex: 0,
                Format: attribute.format.into(),
                InputSlot: 0,
                AlignedByteOffset: attribute.offset,
                InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            })
            .collect::<Vec<_>>();

        let mut blend_targets = [D3D12_RENDER_TARGET_BLEND_DESC::default(); 8];
        blend_targets[0] = D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: false.into(),
            LogicOpEnable: false.into(),
            SrcBlend: D3D12_BLEND_ONE,
            DestBlend: D3D12_BLEND_ZERO,
            BlendOp: D3D12_BLEND_OP_ADD,
            SrcBlendAlpha: D3D12_BLEND_ONE,
            DestBlendAlpha: D3D12_BLEND_ZERO,
            BlendOpAlpha: D3D12_BLEND_OP_ADD,
            LogicOp: D3D12_LOGIC_OP_NOOP,
            RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
        };

        let mut render_target_formats = [DXGI_FORMAT_UNKNOWN; 8];
        render_target_formats[0] = desc.render_target_format.into();

        let stencil_op = D3D12_DEPTH_STENCILOP_DESC {
            StencilFailOp: D3D12_STENCIL_OP_KEEP,
            StencilDepthFailOp: D3D12_STENCIL_OP_KEEP,
            StencilPassOp: D3D12_STENCIL_OP_KEEP,
            StencilFunc: D3D12_COMPARISON_FUNC_ALWAYS,
        };

        let pipeline_info = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            pRootSignature: unsafe { std::mem::transmute_copy(&root_signature) },
            VS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: vertex_shader.as_ptr().cast(),
                BytecodeLength: vertex_shader.len(),
            },
            PS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: pixel_shader.as_ptr().cast(),
                BytecodeLength: pixel_shader.len(),
            },
            BlendState: D3D12_BLEND_DESC {
                AlphaToCoverageEnable: false.into(),
                IndependentBlendEnable: false.into(),
                RenderTarget: blend_targets,
            },
            SampleMask: u32::MAX,
            RasterizerState: D3D12_RASTERIZER_DESC {
                FillMode: D3D12_FILL_MODE_SOLID,
                CullMode: D3D12_CULL_MODE_NONE,
                FrontCounterClockwise: false.into(),
                DepthBias: 0,
                DepthBiasClamp: 0.0,
                SlopeScaledDepthBias: 0.0,
                DepthClipEnable: true.into(),
                MultisampleEnable: false.into(),
                AntialiasedLineEnable: false.into(),
                ForcedSampleCount: 0,
                ConservativeRaster: D3D12_CONSERVATIVE_RASTERIZATION_MODE_OFF,
            },
            // The depth buffer may be bound, but full-screen passes neither
            // test nor write it.
            DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
                DepthEnable: false.into(),
                DepthWriteMask: D3D12_DEPTH_WRITE_MASK_ZERO,
                DepthFunc: D3D12_COMPARISON_FUNC_ALWAYS,
                StencilEnable: false.into(),
                StencilReadMask: D3D12_DEFAULT_STENCIL_READ_MASK as u8,
                StencilWriteMask: D3D12_DEFAULT_STENCIL_WRITE_MASK as u8,
                FrontFace: stencil_op,
                BackFace: stencil_op,
            },
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: input_elements.as_ptr(),
                NumElements: input_elements.len() as _,
            },
            PrimitiveTopologyType: D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
            NumRenderTargets: 1,
            RTVFormats: render_target_formats,
            DSVFormat: desc
                .depth_stencil_format
                .map_or(DXGI_FORMAT_UNKNOWN, Into::into),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            NodeMask: 0,
            Flags: D3D12_PIPELINE_STATE_FLAG_NONE,
            ..Default::default()
        };

        let state: ID3D12PipelineState =
            unsafe { self.dx.device.CreateGraphicsPipelineState(&pipeline_info) }?;

        if self.dx.is_debug {
            let name: Vec<u16> = desc.label.encode_utf16().chain(Some(0)).collect();
            unsafe { state.SetName(PCWSTR(name.as_ptr())) }?;
        }

        Ok(self.registry.borrow_mut().insert_pipeline(Pipeline {
            root_signature,
            state,
        }))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineId) {
        self.registry.borrow_mut().retire_pipeline(pipeline);
    }
}

fn srv_desc(
    format: DXGI_FORMAT,
    dimension: D3D12_SRV_DIMENSION,
    view: D3D12_SHADER_RESOURCE_VIEW_DESC_0,
) -> D3D12_SHADER_RESOURCE_VIEW_DESC {
    D3D12_SHADER_RESOURCE_VIEW_DESC {
        Format: format,
        ViewDimension: dimension,
        Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
        Anonymous: view,
    }
}
