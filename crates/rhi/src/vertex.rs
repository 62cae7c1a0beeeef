//! Vertex format and input-assembler descriptions.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Position-plus-color vertex, the only format this renderer draws.
///
/// `#[repr(C)]` pins the layout the attribute descriptions below assume:
/// position at offset 0, color at offset 12, 24 bytes per vertex.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ColorVertex {
    pub position: Vec3,
    pub color: Vec3,
}

impl ColorVertex {
    #[inline]
    pub const fn new(position: Vec3, color: Vec3) -> Self {
        Self { position, color }
    }

    /// Vertex input binding; the stride must exactly match the struct the
    /// buffer was filled from.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Attribute descriptions for position (location 0) and color
    /// (location 1).
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::size_of::<Vec3>() as u32,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_matches_struct_size() {
        assert_eq!(
            ColorVertex::binding_description().stride as usize,
            std::mem::size_of::<ColorVertex>()
        );
        assert_eq!(std::mem::size_of::<ColorVertex>(), 24);
    }

    #[test]
    fn attribute_offsets_match_layout() {
        let attributes = ColorVertex::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[0].location, 0);
        assert_eq!(attributes[1].location, 1);
    }

    #[test]
    fn vertex_casts_to_bytes() {
        let vertices = [
            ColorVertex::new(Vec3::new(0.0, -0.5, 0.0), Vec3::new(1.0, 0.0, 0.0)),
            ColorVertex::new(Vec3::new(0.5, 0.5, 0.0), Vec3::new(0.0, 1.0, 0.0)),
        ];
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        assert_eq!(bytes.len(), 2 * std::mem::size_of::<ColorVertex>());
    }
}
