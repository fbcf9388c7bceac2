//! Typed views written into descriptor slots.

use crate::{
    backend::Device, descriptor::DescriptorSlot, DescriptorHeapKind, Format, ResourceId, Result,
};

/// Everything the device needs to know to write one view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewDesc {
    Texture2dSrv {
        format: Format,
        mip_levels: u16,
    },
    Texture3dSrv {
        format: Format,
        mip_levels: u16,
    },
    TextureCubeSrv {
        format: Format,
        mip_levels: u16,
    },
    StructuredBufferSrv {
        first_element: u64,
        element_count: u32,
        stride: u32,
    },
    RawBufferSrv {
        first_element: u64,
        element_count: u32,
    },
    TypedBufferSrv {
        format: Format,
        first_element: u64,
        element_count: u32,
    },
    Texture2dRtv {
        format: Format,
    },
    Texture2dDsv {
        format: Format,
    },
    Texture2dUav {
        format: Format,
    },
    StructuredBufferUav {
        first_element: u64,
        element_count: u32,
        stride: u32,
    },
}

impl ViewDesc {
    /// The heap a descriptor of this kind lives in.
    #[must_use]
    pub fn heap_kind(&self) -> DescriptorHeapKind {
        match self {
            Self::Texture2dRtv { .. } => DescriptorHeapKind::Rtv,
            Self::Texture2dDsv { .. } => DescriptorHeapKind::Dsv,
            _ => DescriptorHeapKind::Srv,
        }
    }
}

/// Writes views for resources into caller-supplied slots.
///
/// The factory holds nothing but the device. Writing a view into a slot that
/// already has one replaces it. Resources must have been created with a usage
/// that permits the view; that is not checked here and shows up as a debug
/// layer error instead.
pub struct ViewFactory<'a> {
    device: &'a mut dyn Device,
}

impl<'a> ViewFactory<'a> {
    pub fn new(device: &'a mut dyn Device) -> Self {
        Self { device }
    }

    /// Writes `desc` for `resource` into `slot`.
    ///
    /// ## Errors
    ///
    /// Returns [`Error::UnknownResource`] if the device has no such resource.
    ///
    /// [`Error::UnknownResource`]: crate::Error::UnknownResource
    pub fn create(
        &mut self,
        resource: ResourceId,
        slot: &DescriptorSlot,
        desc: &ViewDesc,
    ) -> Result<()> {
        debug_assert_eq!(
            slot.kind,
            desc.heap_kind(),
            "{desc:?} cannot be written to a {} slot",
            slot.kind
        );
        self.device.create_view(resource, desc, slot.cpu)
    }

    pub fn texture_2d_srv(
        &mut self,
        resource: ResourceId,
        slot: &DescriptorSlot,
        format: Format,
        mip_levels: u16,
    ) -> Result<()> {
        self.create(resource, slot, &ViewDesc::Texture2dSrv { format, mip_levels })
    }

    pub fn texture_3d_srv(
        &mut self,
        resource: ResourceId,
        slot: &DescriptorSlot,
        format: Format,
        mip_levels: u16,
    ) -> Result<()> {
        self.create(resource, slot, &ViewDesc::Texture3dSrv { format, mip_levels })
    }

    pub fn texture_cube_srv(
        &mut self,
        resource: ResourceId,
        slot: &DescriptorSlot,
        format: Format,
        mip_levels: u16,
    ) -> Result<()> {
        self.create(resource, slot, &ViewDesc::TextureCubeSrv { format, mip_levels })
    }

    pub fn structured_buffer_srv(
        &mut self,
        resource: ResourceId,
        slot: &DescriptorSlot,
        element_count: u32,
        stride: u32,
    ) -> Result<()> {
        self.create(
            resource,
            slot,
            &ViewDesc::StructuredBufferSrv {
                first_element: 0,
                element_count,
                stride,
            },
        )
    }

    /// A byte-address view. `element_count` is in 32-bit words.
    pub fn raw_buffer_srv(
        &mut self,
        resource: ResourceId,
        slot: &DescriptorSlot,
        element_count: u32,
    ) -> Result<()> {
        self.create(
            resource,
            slot,
            &ViewDesc::RawBufferSrv {
                first_element: 0,
                element_count,
            },
        )
    }

    pub fn typed_buffer_srv(
        &mut self,
        resource: ResourceId,
        slot: &DescriptorSlot,
        format: Format,
        element_count: u32,
    ) -> Result<()> {
        self.create(
            resource,
            slot,
            &ViewDesc::TypedBufferSrv {
                format,
                first_element: 0,
                element_count,
            },
        )
    }

    pub fn texture_2d_rtv(
        &mut self,
        resource: ResourceId,
        slot: &DescriptorSlot,
        format: Format,
    ) -> Result<()> {
        self.create(resource, slot, &ViewDesc::Texture2dRtv { format })
    }

    pub fn texture_2d_dsv(
        &mut self,
        resource: ResourceId,
        slot: &DescriptorSlot,
        format: Format,
    ) -> Result<()> {
        self.create(resource, slot, &ViewDesc::Texture2dDsv { format })
    }

    pub fn texture_2d_uav(
        &mut self,
        resource: ResourceId,
        slot: &DescriptorSlot,
        format: Format,
    ) -> Result<()> {
        self.create(resource, slot, &ViewDesc::Texture2dUav { format })
    }

    pub fn structured_buffer_uav(
        &mut self,
        resource: ResourceId,
        slot: &DescriptorSlot,
        element_count: u32,
        stride: u32,
    ) -> Result<()> {
        self.create(
            resource,
            slot,
            &ViewDesc::StructuredBufferUav {
                first_element: 0,
                element_count,
                stride,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use geometry::Extent;

    use super::*;
    use crate::{
        descriptor::DescriptorHeaps,
        headless::HeadlessDevice,
        resource::{BufferDesc, TextureDesc, TextureUsage},
        DescriptorHeapConfig, ResourceState,
    };

    #[test]
    fn views_land_in_their_slots() {
        let mut device = HeadlessDevice::new();
        let mut heaps = DescriptorHeaps::new(&mut device, &DescriptorHeapConfig::default()).unwrap();

        let texture = device
            .create_texture(&TextureDesc::texture_2d(
                "view test",
                Extent::new(64, 64),
                Format::Rgba8Unorm,
                TextureUsage::SHADER_RESOURCE | TextureUsage::RENDER_TARGET,
                ResourceState::PixelShaderResource,
            ))
            .unwrap();
        let buffer = device
            .create_buffer(&BufferDesc::upload("view test buffer", 1024))
            .unwrap();

        let srv = heaps.allocate(DescriptorHeapKind::Srv).unwrap();
        let rtv = heaps.allocate(DescriptorHeapKind::Rtv).unwrap();
        let structured = heaps.allocate(DescriptorHeapKind::Srv).unwrap();

        let mut views = ViewFactory::new(&mut device);
        views
            .texture_2d_srv(texture, &srv, Format::Rgba8Unorm, 1)
            .unwrap();
        views
            .texture_2d_rtv(texture, &rtv, Format::Rgba8Unorm)
            .unwrap();
        views
            .structured_buffer_srv(buffer, &structured, 16, 64)
            .unwrap();

        assert_eq!(
            device.view_at(srv.cpu),
            Some((
                texture,
                ViewDesc::Texture2dSrv {
                    format: Format::Rgba8Unorm,
                    mip_levels: 1
                }
            ))
        );
        assert_eq!(
            device.view_at(rtv.cpu).map(|(_, desc)| desc.heap_kind()),
            Some(DescriptorHeapKind::Rtv)
        );
        assert_eq!(
            device.view_at(structured.cpu),
            Some((
                buffer,
                ViewDesc::StructuredBufferSrv {
                    first_element: 0,
                    element_count: 16,
                    stride: 64
                }
            ))
        );
    }

    #[test]
    fn rewriting_a_slot_replaces_the_view() {
        let mut device = HeadlessDevice::new();
        let mut heaps = DescriptorHeaps::new(&mut device, &DescriptorHeapConfig::default()).unwrap();
        let slot = heaps.allocate(DescriptorHeapKind::Srv).unwrap();

        let a = device
            .create_buffer(&BufferDesc::upload("a", 256))
            .unwrap();
        let b = device
            .create_buffer(&BufferDesc::upload("b", 256))
            .unwrap();

        let mut views = ViewFactory::new(&mut device);
        views.raw_buffer_srv(a, &slot, 64).unwrap();
        views.raw_buffer_srv(b, &slot, 64).unwrap();

        assert_eq!(device.view_at(slot.cpu).map(|(id, _)| id), Some(b));
    }

    #[test]
    fn unknown_resource() {
        let mut device = HeadlessDevice::new();
        let mut heaps = DescriptorHeaps::new(&mut device, &DescriptorHeapConfig::default()).unwrap();
        let slot = heaps.allocate(DescriptorHeapKind::Srv).unwrap();

        let buffer = device
            .create_buffer(&BufferDesc::upload("gone", 256))
            .unwrap();
        device.destroy_resource(buffer);

        let mut views = ViewFactory::new(&mut device);
        assert!(views.raw_buffer_srv(buffer, &slot, 64).is_err());
    }
}
