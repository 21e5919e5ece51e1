//! Vertex layouts shared by the layer and blit shaders. `bytemuck` lets
//! these be reinterpreted as raw bytes for `glBufferData` without any
//! per-field packing code.

use bytemuck::{Pod, Zeroable};

use crate::layer::display_properties::{CornerOffsets, UvRect};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

/// Builds the 4-vertex, 6-index unit quad for a layer, applying corner
/// deformation offsets when present.
pub fn layer_quad(width: f32, height: f32, uv: UvRect, corners: Option<CornerOffsets>) -> [Vertex; 4] {
    let offsets = corners.unwrap_or_default();
    [
        Vertex {
            position: [offsets.top_left.0, offsets.top_left.1],
            uv: [uv.u0, uv.v0],
        },
        Vertex {
            position: [width + offsets.top_right.0, offsets.top_right.1],
            uv: [uv.u1, uv.v0],
        },
        Vertex {
            position: [width + offsets.bottom_right.0, height + offsets.bottom_right.1],
            uv: [uv.u1, uv.v1],
        },
        Vertex {
            position: [offsets.bottom_left.0, height + offsets.bottom_left.1],
            uv: [uv.u0, uv.v1],
        },
    ]
}

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

pub fn vertices_as_bytes(vertices: &[Vertex]) -> &[u8] {
    bytemuck::cast_slice(vertices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undeformed_quad_matches_width_and_height() {
        let quad = layer_quad(100.0, 50.0, UvRect::default(), None);
        assert_eq!(quad[0].position, [0.0, 0.0]);
        assert_eq!(quad[2].position, [100.0, 50.0]);
    }

    #[test]
    fn corner_deform_offsets_each_vertex_independently() {
        let mut corners = CornerOffsets::default();
        corners.top_left = (5.0, 5.0);
        let quad = layer_quad(100.0, 50.0, UvRect::default(), Some(corners));
        assert_eq!(quad[0].position, [5.0, 5.0]);
        assert_eq!(quad[2].position, [100.0, 50.0]);
    }

    #[test]
    fn vertex_bytes_length_matches_pod_size() {
        let quad = layer_quad(1.0, 1.0, UvRect::default(), None);
        let bytes = vertices_as_bytes(&quad);
        assert_eq!(bytes.len(), 4 * std::mem::size_of::<Vertex>());
    }
}
