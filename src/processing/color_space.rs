use std::sync::LazyLock;

/// Display gamma used on both backends.
pub const DISPLAY_GAMMA: f32 = 2.2;

// Precomputed decode table, 8-bit input has only 256 possible values
static LINEAR_LUT: LazyLock<[f32; 256]> = LazyLock::new(|| {
    let mut lut = [0.0f32; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = (i as f32 / 255.0).powf(DISPLAY_GAMMA);
    }
    lut
});

/// 8-bit gamma-encoded value -> linear light, `(v / 255)^2.2`.
#[inline]
pub fn to_linear(value: u8) -> f32 {
    LINEAR_LUT[value as usize]
}

/// Normalised gamma-encoded value in `[0, 1]` -> linear light.
/// For deep formats where a lookup table would be too large.
#[inline]
pub fn unorm_to_linear(encoded: f32) -> f32 {
    encoded.clamp(0.0, 1.0).powf(DISPLAY_GAMMA)
}

/// Linear light -> 8-bit display value.
/// Clamp happens before the power so negative inputs never reach `powf`.
#[inline]
pub fn to_display(linear: f32) -> u8 {
    let clamped = linear.clamp(0.0, 1.0);
    (clamped.powf(1.0 / DISPLAY_GAMMA) * 255.0) as u8
}

/// Decodes interleaved 8-bit RGB into interleaved linear floats.
pub fn rgb8_to_linear(rgb: &[u8]) -> Vec<f32> {
    rgb.iter().map(|&v| to_linear(v)).collect()
}

/// Packs interleaved linear RGB into BGRA8 with opaque alpha.
pub fn pack_bgra8(interleaved: &[f32]) -> Vec<u8> {
    debug_assert!(interleaved.len() % 3 == 0, "interleaved RGB length must be a multiple of 3");
    let mut out = Vec::with_capacity(interleaved.len() / 3 * 4);
    for rgb in interleaved.chunks_exact(3) {
        out.push(to_display(rgb[2]));
        out.push(to_display(rgb[1]));
        out.push(to_display(rgb[0]));
        out.push(255);
    }
    out
}

/// BGRA8 -> RGBA8, used when handing the display buffer to `image` for saving.
pub fn bgra8_to_rgba8(bgra: &[u8]) -> Vec<u8> {
    let mut out = bgra.to_vec();
    for px in out.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_linear_endpoints() {
        assert_eq!(to_linear(0), 0.0);
        assert!((to_linear(255) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_to_linear_matches_power_curve() {
        for v in [1u8, 17, 64, 128, 200, 254] {
            let expected = (v as f32 / 255.0).powf(2.2);
            assert!((to_linear(v) - expected).abs() < 1e-6, "mismatch for {}", v);
        }
    }

    #[test]
    fn test_to_display_clamps() {
        assert_eq!(to_display(-3.0), 0);
        assert_eq!(to_display(0.0), 0);
        assert_eq!(to_display(1.0), 255);
        assert_eq!(to_display(42.0), 255);
        assert_eq!(to_display(f32::NEG_INFINITY), 0);
    }

    #[test]
    fn test_to_display_truncates() {
        // 0.53125^(1/2.2) * 255 = 191.28...
        assert_eq!(to_display(0.53125), 191);
    }

    #[test]
    fn test_display_roundtrip_is_close() {
        for v in 0..=255u8 {
            let back = to_display(to_linear(v));
            assert!((back as i32 - v as i32).abs() <= 1, "{} -> {}", v, back);
        }
    }

    #[test]
    fn test_pack_bgra8_order_and_alpha() {
        let px = pack_bgra8(&[1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(px, vec![0, 0, 255, 255, 255, 0, 0, 255]);
    }

    #[test]
    fn test_bgra_to_rgba_swizzle() {
        assert_eq!(bgra8_to_rgba8(&[1, 2, 3, 4]), vec![3, 2, 1, 4]);
    }
}
