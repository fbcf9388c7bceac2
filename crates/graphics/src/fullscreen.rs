use std::rc::Rc;

use bytemuck::{Pod, Zeroable};

use crate::{
    backend::{CommandList, VertexAttribute, VertexBufferView},
    context::DeviceContext,
    resource::BufferDesc,
    Format, ResourceId, Result,
};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct FullscreenVertex {
    pub position: [f32; 4],
    pub uv: [f32; 2],
}

impl FullscreenVertex {
    pub const LAYOUT: &'static [VertexAttribute] = &[
        VertexAttribute {
            semantic: "POSITION",
            format: Format::Rgba32Float,
            offset: 0,
        },
        VertexAttribute {
            semantic: "TEXCOORD",
            format: Format::Rg32Float,
            offset: 16,
        },
    ];
}

/// One triangle that covers all of clip space.
///
/// The corners at `(-1, 3)` and `(3, -1)` lie outside the viewport, so the
/// visible `[-1, 1]` square is fully covered and the UVs interpolate to
/// `[0, 1]` across it. There is no index buffer and no diagonal seam.
pub const FULLSCREEN_TRIANGLE: [FullscreenVertex; 3] = [
    FullscreenVertex {
        position: [-1.0, -1.0, 0.0, 1.0],
        uv: [0.0, 1.0],
    },
    FullscreenVertex {
        position: [-1.0, 3.0, 0.0, 1.0],
        uv: [0.0, -1.0],
    },
    FullscreenVertex {
        position: [3.0, -1.0, 0.0, 1.0],
        uv: [2.0, 1.0],
    },
];

/// The vertex buffer every full-screen pass draws with.
pub struct FullscreenTriangle {
    context: Rc<DeviceContext>,
    buffer: ResourceId,
    view: VertexBufferView,
}

impl FullscreenTriangle {
    pub fn new(context: &Rc<DeviceContext>) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(&FULLSCREEN_TRIANGLE);

        let mut device = context.device();
        let buffer = device.create_buffer(&BufferDesc::upload(
            "Fullscreen Triangle",
            bytes.len() as u64,
        ))?;

        let address = device
            .write_buffer(buffer, 0, bytes)
            .and_then(|()| device.gpu_address(buffer));

        let address = match address {
            Ok(address) => address,
            Err(e) => {
                device.destroy_resource(buffer);
                return Err(e);
            }
        };

        Ok(Self {
            context: context.clone(),
            buffer,
            view: VertexBufferView {
                address,
                size: bytes.len() as u32,
                stride: std::mem::size_of::<FullscreenVertex>() as u32,
            },
        })
    }

    #[must_use]
    pub fn view(&self) -> &VertexBufferView {
        &self.view
    }

    /// Binds the vertex buffer and draws the three vertices.
    pub fn draw(&self, command_list: &mut dyn CommandList) {
        command_list.set_vertex_buffer(&self.view);
        command_list.draw(3, 1);
    }
}

impl Drop for FullscreenTriangle {
    fn drop(&mut self) {
        self.context.device().destroy_resource(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        headless::Command,
        testing::{commands, device_context},
    };

    #[test]
    fn covers_the_viewport() {
        // Every corner of the [-1, 1] square must be inside the triangle, and
        // UVs must map the square onto [0, 1].
        let [a, b, c] = FULLSCREEN_TRIANGLE;
        let corners = [(-1.0, -1.0), (-1.0, 1.0), (1.0, -1.0), (1.0, 1.0)];

        for (x, y) in corners {
            let area = |p: [f32; 4], q: [f32; 4]| {
                (q[0] - p[0]) * (y - p[1]) - (q[1] - p[1]) * (x - p[0])
            };
            let signs = [
                area(a.position, b.position),
                area(b.position, c.position),
                area(c.position, a.position),
            ];
            assert!(
                signs.iter().all(|s| *s <= 0.0) || signs.iter().all(|s| *s >= 0.0),
                "({x}, {y}) is outside the triangle"
            );
        }

        for vertex in FULLSCREEN_TRIANGLE {
            let [x, y, ..] = vertex.position;
            assert_eq!(vertex.uv, [(x + 1.0) / 2.0, (1.0 - y) / 2.0]);
        }
    }

    #[test]
    fn uploads_and_draws_three_vertices() {
        let (device, context) = device_context();
        let triangle = FullscreenTriangle::new(&context).unwrap();

        let buffer = device.buffer_at(triangle.view().address).unwrap();
        assert_eq!(
            device.buffer_contents(buffer).unwrap(),
            bytemuck::cast_slice::<_, u8>(&FULLSCREEN_TRIANGLE)
        );
        assert_eq!(triangle.view().stride, 24);
        assert_eq!(triangle.view().size, 72);

        let mut cmd = commands();
        triangle.draw(&mut cmd);
        assert_eq!(
            cmd.commands(),
            &[
                Command::SetVertexBuffer(*triangle.view()),
                Command::Draw {
                    vertex_count: 3,
                    instance_count: 1
                }
            ]
        );

        drop(triangle);
        assert!(!device.is_live(buffer));
    }
}
