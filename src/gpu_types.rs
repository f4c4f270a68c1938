use bytemuck::{Pod, Zeroable};

use crate::processing::tone_mapping::ToneMapParams;

/// Uniform block for the tone-map fragment shader (16 bytes, std140-compatible).
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct ToneMapUniforms {
    pub exposure: f32,
    pub white_point: f32,
    pub gamma: f32,
    pub _pad0: f32,
}

impl ToneMapUniforms {
    pub fn new(params: &ToneMapParams, gamma: f32) -> Self {
        Self {
            exposure: params.exposure,
            white_point: params.white_point,
            gamma,
            _pad0: 0.0,
        }
    }
}

/// Fullscreen-quad vertex: clip-space position + uv.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

/// Two triangles covering the viewport. uv (0,0) is the top-left texel,
/// matching wgpu's top-left framebuffer origin, so no row flip on readback.
pub const FULLSCREEN_QUAD: [QuadVertex; 6] = [
    QuadVertex { position: [-1.0, 1.0], uv: [0.0, 0.0] },
    QuadVertex { position: [-1.0, -1.0], uv: [0.0, 1.0] },
    QuadVertex { position: [1.0, -1.0], uv: [1.0, 1.0] },
    QuadVertex { position: [-1.0, 1.0], uv: [0.0, 0.0] },
    QuadVertex { position: [1.0, -1.0], uv: [1.0, 1.0] },
    QuadVertex { position: [1.0, 1.0], uv: [1.0, 0.0] },
];

impl QuadVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_size_is_16_bytes() {
        assert_eq!(std::mem::size_of::<ToneMapUniforms>(), 16);
    }

    #[test]
    fn test_uniform_from_params() {
        let u = ToneMapUniforms::new(&ToneMapParams::new(2.0, 6.0), 2.2);
        assert_eq!((u.exposure, u.white_point, u.gamma), (2.0, 6.0, 2.2));
    }

    #[test]
    fn test_quad_layout() {
        assert_eq!(FULLSCREEN_QUAD.len(), 6);
        assert_eq!(QuadVertex::layout().array_stride, 16);
        let bytes: &[u8] = bytemuck::cast_slice(&FULLSCREEN_QUAD);
        assert_eq!(bytes.len(), 6 * 16);
    }
}
