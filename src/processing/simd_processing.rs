use anyhow::Result;
use glam::Vec3;
use rayon::prelude::*;
use wide::f32x8;

use crate::processing::layout::{split_channels_mut, Layout, RgbBuffer};
use crate::processing::tone_mapping::{tone_map_pixel_with, tone_map_x8, LaneConstants, ToneMapParams};

/// Pixels processed together in one vector iteration.
pub const LANE_WIDTH: usize = 8;

/// Pixels per rayon task in the parallel kernel. Multiple of `LANE_WIDTH`.
pub const PARALLEL_CHUNK_PIXELS: usize = LANE_WIDTH * 2048;

/// Tone maps a planar buffer (`[R..][G..][B..]`, length `3n`) in place.
///
/// Full groups of `LANE_WIDTH` pixels go through the vector path, the remaining
/// `< LANE_WIDTH` pixels through a scalar loop with the identical formula.
///
/// No validation: `n > 0`, `exposure > 0` and `white_point > 0` are the caller's
/// responsibility; other values give meaningless numbers, not an error.
pub fn tone_map_planar(planar: &mut [f32], params: &ToneMapParams) {
    let (r, g, b) = split_channels_mut(planar);
    tone_map_channels(r, g, b, params);
}

/// Same as [`tone_map_planar`], but lane-aligned chunks of the three channel
/// blocks are processed on the rayon pool.
pub fn tone_map_planar_parallel(planar: &mut [f32], params: &ToneMapParams) {
    let (r, g, b) = split_channels_mut(planar);
    r.par_chunks_mut(PARALLEL_CHUNK_PIXELS)
        .zip(g.par_chunks_mut(PARALLEL_CHUNK_PIXELS))
        .zip(b.par_chunks_mut(PARALLEL_CHUNK_PIXELS))
        .for_each(|((rc, gc), bc)| tone_map_channels(rc, gc, bc, params));
}

/// Typed entry point: refuses a buffer that is not planar, then runs the
/// sequential or the rayon kernel in place.
pub fn tone_map_buffer(buffer: &mut RgbBuffer, params: &ToneMapParams, parallel: bool) -> Result<()> {
    let planar = buffer.as_layout_mut(Layout::Planar)?;
    if parallel {
        tone_map_planar_parallel(planar, params);
    } else {
        tone_map_planar(planar, params);
    }
    Ok(())
}

/// Kernel over three equally long channel slices.
/// The slices are distinct `&mut` borrows, so they cannot alias.
pub fn tone_map_channels(r: &mut [f32], g: &mut [f32], b: &mut [f32], params: &ToneMapParams) {
    debug_assert!(
        r.len() == g.len() && g.len() == b.len(),
        "channel lengths differ: {} / {} / {}",
        r.len(), g.len(), b.len()
    );

    let pixel_count = r.len().min(g.len()).min(b.len());
    let simd_pixels = (pixel_count / LANE_WIDTH) * LANE_WIDTH;

    if simd_pixels > 0 {
        let k = LaneConstants::new(params);
        let r_lanes: &mut [[f32; LANE_WIDTH]] = bytemuck::cast_slice_mut(&mut r[..simd_pixels]);
        let g_lanes: &mut [[f32; LANE_WIDTH]] = bytemuck::cast_slice_mut(&mut g[..simd_pixels]);
        let b_lanes: &mut [[f32; LANE_WIDTH]] = bytemuck::cast_slice_mut(&mut b[..simd_pixels]);

        for ((rl, gl), bl) in r_lanes.iter_mut().zip(g_lanes.iter_mut()).zip(b_lanes.iter_mut()) {
            let (tr, tg, tb) = tone_map_x8(f32x8::from(*rl), f32x8::from(*gl), f32x8::from(*bl), &k);
            *rl = tr.to_array();
            *gl = tg.to_array();
            *bl = tb.to_array();
        }
    }

    // Scalar tail
    if simd_pixels < pixel_count {
        let exposure = params.exposure;
        let white_point_sq = params.white_point_sq();
        for i in simd_pixels..pixel_count {
            let out = tone_map_pixel_with(Vec3::new(r[i], g[i], b[i]), exposure, white_point_sq);
            r[i] = out.x;
            g[i] = out.y;
            b[i] = out.z;
        }
    }
}
