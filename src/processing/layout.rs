//! Interleaved <-> planar reshaping of RGB float buffers.
//!
//! Interleaved: `R0,G0,B0,R1,G1,B1,...`
//! Planar:      `[R0..Rn-1][G0..Gn-1][B0..Bn-1]`
//!
//! Both layouts hold `3 * n` floats for `n` pixels and the conversions are exact
//! bijections, nothing is rounded or reordered within a channel.

use anyhow::{ensure, Result};

/// Which physical ordering a float buffer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Interleaved,
    Planar,
}

/// Interleaved linear RGB image. Values are linear light, unbounded above.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl LinearImage {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        ensure!(width > 0 && height > 0, "image dimensions must be positive, got {}x{}", width, height);
        let expected = width as usize * height as usize * 3;
        ensure!(
            data.len() == expected,
            "interleaved RGB buffer for {}x{} must hold {} floats, got {}",
            width, height, expected, data.len()
        );
        Ok(Self { width, height, data })
    }

    /// Uniform-colour image, mostly useful for tests and backend comparisons.
    pub fn filled(width: u32, height: u32, rgb: [f32; 3]) -> Self {
        let pixel_count = width as usize * height as usize;
        let data = rgb.iter().copied().cycle().take(pixel_count * 3).collect();
        Self { width, height, data }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Returns a fresh copy with every channel multiplied by `factor`.
    /// The original stays untouched so it can be reused with other parameters.
    pub fn boosted(&self, factor: f32) -> Self {
        Self {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|v| v * factor).collect(),
        }
    }
}

/// Owned RGB float buffer tagged with its physical layout.
///
/// Length is always `3 * pixel_count`, checked on construction and re-asserted
/// in debug builds whenever the raw floats are handed out.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbBuffer {
    data: Vec<f32>,
    pixel_count: usize,
    layout: Layout,
}

impl RgbBuffer {
    pub fn from_interleaved(interleaved: &[f32], pixel_count: usize) -> Result<Self> {
        Self::new(interleaved.to_vec(), pixel_count, Layout::Interleaved)
    }

    pub fn new(data: Vec<f32>, pixel_count: usize, layout: Layout) -> Result<Self> {
        ensure!(
            data.len() == pixel_count * 3,
            "{:?} buffer holds {} floats, expected {} for {} pixels",
            layout, data.len(), pixel_count * 3, pixel_count
        );
        Ok(Self { data, pixel_count, layout })
    }

    pub fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn into_planar(self) -> Result<Self> {
        match self.layout {
            Layout::Planar => Ok(self),
            Layout::Interleaved => {
                Self::new(interleaved_to_planar(&self.data, self.pixel_count)?, self.pixel_count, Layout::Planar)
            }
        }
    }

    pub fn into_interleaved(self) -> Result<Self> {
        match self.layout {
            Layout::Interleaved => Ok(self),
            Layout::Planar => Self::new(planar_to_interleaved(&self.data)?, self.pixel_count, Layout::Interleaved),
        }
    }

    /// Raw floats, provided the buffer is in `layout`.
    pub fn as_layout(&self, layout: Layout) -> Result<&[f32]> {
        self.check_layout(layout)?;
        Ok(&self.data)
    }

    pub fn as_layout_mut(&mut self, layout: Layout) -> Result<&mut [f32]> {
        self.check_layout(layout)?;
        Ok(&mut self.data)
    }

    /// Disjoint R, G and B blocks of a planar buffer.
    pub fn planar_channels_mut(&mut self) -> Result<(&mut [f32], &mut [f32], &mut [f32])> {
        Ok(split_channels_mut(self.as_layout_mut(Layout::Planar)?))
    }

    fn check_layout(&self, expected: Layout) -> Result<()> {
        debug_assert_eq!(self.data.len(), self.pixel_count * 3);
        ensure!(
            self.layout == expected,
            "buffer is {:?}, {:?} required",
            self.layout, expected
        );
        Ok(())
    }
}

/// Splits a planar buffer into its R, G and B blocks.
pub fn split_channels_mut(planar: &mut [f32]) -> (&mut [f32], &mut [f32], &mut [f32]) {
    debug_assert!(planar.len() % 3 == 0, "planar length {} is not a multiple of 3", planar.len());
    let n = planar.len() / 3;
    let (r, rest) = planar.split_at_mut(n);
    let (g, b) = rest.split_at_mut(n);
    (r, g, &mut b[..n])
}

pub fn interleaved_to_planar(interleaved: &[f32], pixel_count: usize) -> Result<Vec<f32>> {
    ensure!(
        interleaved.len() == pixel_count * 3,
        "interleaved buffer holds {} floats, expected {} for {} pixels",
        interleaved.len(), pixel_count * 3, pixel_count
    );

    let mut planar = vec![0.0f32; pixel_count * 3];
    let (r, g, b) = split_channels_mut(&mut planar);
    for (i, rgb) in interleaved.chunks_exact(3).enumerate() {
        r[i] = rgb[0];
        g[i] = rgb[1];
        b[i] = rgb[2];
    }
    Ok(planar)
}

pub fn planar_to_interleaved(planar: &[f32]) -> Result<Vec<f32>> {
    ensure!(
        planar.len() % 3 == 0,
        "planar buffer length {} is not divisible by 3",
        planar.len()
    );

    let n = planar.len() / 3;
    let (r, rest) = planar.split_at(n);
    let (g, b) = rest.split_at(n);
    let mut interleaved = Vec::with_capacity(planar.len());
    for i in 0..n {
        interleaved.push(r[i]);
        interleaved.push(g[i]);
        interleaved.push(b[i]);
    }
    Ok(interleaved)
}

/// Pads interleaved RGB to RGBA with alpha = 1.0 (GPU upload format).
pub fn rgb_to_rgba_padded(interleaved: &[f32]) -> Vec<f32> {
    debug_assert!(interleaved.len() % 3 == 0);
    let mut rgba = Vec::with_capacity(interleaved.len() / 3 * 4);
    for rgb in interleaved.chunks_exact(3) {
        rgba.extend_from_slice(rgb);
        rgba.push(1.0);
    }
    rgba
}
