use anyhow::{ensure, Result};
use glam::Vec3;
use wide::f32x8;

/// Rec.709 luminance weights (sum to exactly 1.0 in f32).
pub const REC709_LUMA: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Floor used for the white point, the luminance divisor and every output channel.
pub const EPSILON: f32 = 1e-4;

/// Per-invocation tone-map parameters. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneMapParams {
    /// Multiplicative pre-scale, > 0.
    pub exposure: f32,
    /// Luminance mapped to near-maximum output, > 0.
    pub white_point: f32,
}

impl Default for ToneMapParams {
    fn default() -> Self {
        Self { exposure: 1.0, white_point: 4.0 }
    }
}

impl ToneMapParams {
    pub fn new(exposure: f32, white_point: f32) -> Self {
        Self { exposure, white_point }
    }

    /// `max(whitePoint, eps)^2`
    #[inline]
    pub fn white_point_sq(&self) -> f32 {
        let wp = self.white_point.max(EPSILON);
        wp * wp
    }

    /// Range check for callers. The kernels themselves never validate.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.exposure.is_finite() && self.exposure > 0.0,
            "exposure must be a positive finite number, got {}",
            self.exposure
        );
        ensure!(
            self.white_point.is_finite() && self.white_point > 0.0,
            "white point must be a positive finite number, got {}",
            self.white_point
        );
        Ok(())
    }
}

#[inline]
pub fn luminance(rgb: Vec3) -> f32 {
    rgb.dot(REC709_LUMA)
}

/// Extended Reinhard curve on luminance: `L * (1 + L / wp^2) / (1 + L)`.
#[inline]
pub fn reinhard_extended(l: f32, white_point_sq: f32) -> f32 {
    (l * (1.0 + l / white_point_sq)) / (1.0 + l)
}

/// Scalar operator: exposure -> luminance -> Extended Reinhard -> chroma-preserving rescale.
#[inline]
pub fn tone_map_pixel(rgb: Vec3, params: &ToneMapParams) -> Vec3 {
    tone_map_pixel_with(rgb, params.exposure, params.white_point_sq())
}

#[inline]
pub(crate) fn tone_map_pixel_with(rgb: Vec3, exposure: f32, white_point_sq: f32) -> Vec3 {
    let exposed = rgb * exposure;
    let l = luminance(exposed);
    let mapped = reinhard_extended(l, white_point_sq);
    let scale = mapped / l.max(EPSILON);
    (exposed * scale).max(Vec3::splat(EPSILON))
}

/// Splatted constants for the 8-lane realisation, built once per kernel call.
#[derive(Clone, Copy)]
pub struct LaneConstants {
    exposure: f32x8,
    white_point_sq: f32x8,
    wr: f32x8,
    wg: f32x8,
    wb: f32x8,
    one: f32x8,
    epsilon: f32x8,
}

impl LaneConstants {
    pub fn new(params: &ToneMapParams) -> Self {
        Self {
            exposure: f32x8::splat(params.exposure),
            white_point_sq: f32x8::splat(params.white_point_sq()),
            wr: f32x8::splat(REC709_LUMA.x),
            wg: f32x8::splat(REC709_LUMA.y),
            wb: f32x8::splat(REC709_LUMA.z),
            one: f32x8::splat(1.0),
            epsilon: f32x8::splat(EPSILON),
        }
    }
}

/// Vector operator over 8 pixels. Same operation order as `tone_map_pixel`,
/// so lanes and scalar tail produce the same bits for the same input.
#[inline]
pub fn tone_map_x8(r: f32x8, g: f32x8, b: f32x8, k: &LaneConstants) -> (f32x8, f32x8, f32x8) {
    let r = r * k.exposure;
    let g = g * k.exposure;
    let b = b * k.exposure;

    let l = r * k.wr + g * k.wg + b * k.wb;
    let mapped = (l * (k.one + l / k.white_point_sq)) / (k.one + l);
    let scale = mapped / l.max(k.epsilon);

    (
        (r * scale).max(k.epsilon),
        (g * scale).max(k.epsilon),
        (b * scale).max(k.epsilon),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_luma_weights_sum_to_one() {
        assert_eq!(REC709_LUMA.x + REC709_LUMA.y + REC709_LUMA.z, 1.0);
    }

    #[test]
    fn test_achromatic_luminance_equals_exposed_value() {
        for (v, exposure) in [(0.5f32, 1.0f32), (2.0, 0.5), (0.1, 3.0), (7.0, 1.25)] {
            let l = luminance(Vec3::splat(v) * exposure);
            assert!(approx(l, v * exposure, 1e-6 * v * exposure), "L={} for v={} e={}", l, v, exposure);
        }
    }

    #[test]
    fn test_reference_scenario_white_point_four() {
        let out = tone_map_pixel(Vec3::ONE, &ToneMapParams::new(1.0, 4.0));
        for c in out.to_array() {
            assert!(approx(c, 0.53125, 1e-6), "got {}", c);
        }
        let encoded = 0.53125f32.powf(1.0 / 2.2);
        assert!(approx(encoded, 0.750, 1e-3));
    }

    #[test]
    fn test_black_pixel_is_floored_not_zero() {
        let out = tone_map_pixel(Vec3::ZERO, &ToneMapParams::default());
        assert_eq!(out, Vec3::splat(EPSILON));
    }

    #[test]
    fn test_mapped_luminance_is_strictly_increasing() {
        let wp2 = ToneMapParams::new(1.0, 4.0).white_point_sq();
        let mut prev = reinhard_extended(0.0, wp2);
        let mut l = 0.001f32;
        while l < 1000.0 {
            let cur = reinhard_extended(l, wp2);
            assert!(cur > prev, "not increasing at L={}", l);
            prev = cur;
            l *= 1.1;
        }
    }

    #[test]
    fn test_white_point_maps_to_one() {
        // L == wp gives exactly wp*(1+1/wp)/(1+wp) = 1
        let wp = 4.0f32;
        assert!(approx(reinhard_extended(wp, wp * wp), 1.0, 1e-6));
    }

    #[test]
    fn test_chroma_is_preserved() {
        let params = ToneMapParams::new(1.5, 6.0);
        let rgb = Vec3::new(3.0, 1.5, 0.75);
        let out = tone_map_pixel(rgb, &params);
        assert!(approx(out.x / out.y, 2.0, 1e-5));
        assert!(approx(out.y / out.z, 2.0, 1e-5));
    }

    #[test]
    fn test_white_point_floor() {
        assert_eq!(ToneMapParams::new(1.0, 0.0).white_point_sq(), EPSILON * EPSILON);
    }

    #[test]
    fn test_params_validation() {
        assert!(ToneMapParams::new(1.0, 4.0).validate().is_ok());
        assert!(ToneMapParams::new(0.0, 4.0).validate().is_err());
        assert!(ToneMapParams::new(1.0, -1.0).validate().is_err());
        assert!(ToneMapParams::new(f32::NAN, 1.0).validate().is_err());
    }

    #[test]
    fn test_lanes_match_scalar() {
        let params = ToneMapParams::new(0.8, 3.0);
        let k = LaneConstants::new(&params);
        let r = [0.0, 0.01, 0.5, 1.0, 2.0, 8.0, 100.0, 0.3];
        let g = [0.0, 0.02, 0.25, 1.0, 0.5, 4.0, 50.0, 7.0];
        let b = [0.0, 0.03, 0.1, 1.0, 3.0, 2.0, 25.0, 0.0];

        let (vr, vg, vb) = tone_map_x8(f32x8::from(r), f32x8::from(g), f32x8::from(b), &k);
        let (vr, vg, vb) = (vr.to_array(), vg.to_array(), vb.to_array());

        for i in 0..8 {
            let s = tone_map_pixel(Vec3::new(r[i], g[i], b[i]), &params);
            assert!(approx(vr[i], s.x, 1e-6), "lane {} r: {} vs {}", i, vr[i], s.x);
            assert!(approx(vg[i], s.y, 1e-6), "lane {} g: {} vs {}", i, vg[i], s.y);
            assert!(approx(vb[i], s.z, 1e-6), "lane {} b: {} vs {}", i, vb[i], s.z);
        }
    }
}
