// src/motion.rs
//
// Scene motion energy: variance of the absolute per-pixel difference
// between consecutive grayscale frames. Near zero while the subject
// stands still, large while they move. Used to keep the vision fallback
// quiet on idle scenes.

use tracing::debug;

/// Row-major 8-bit grayscale frame: pixel (x, y) = data[y * width + x]
#[derive(Clone)]
pub struct GrayFrame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl GrayFrame {
    pub fn new(data: Vec<u8>, width: usize, height: usize) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self {
            data,
            width,
            height,
        }
    }

    /// Decode a JPEG (or any format the image crate knows) into luma.
    pub fn from_encoded(bytes: &[u8]) -> Option<Self> {
        let luma = image::load_from_memory(bytes).ok()?.to_luma8();
        let (w, h) = luma.dimensions();
        Some(Self::new(luma.into_raw(), w as usize, h as usize))
    }
}

pub struct MotionEnergyMeter {
    previous: Option<GrayFrame>,
}

impl MotionEnergyMeter {
    pub fn new() -> Self {
        Self { previous: None }
    }

    /// Motion energy against the previous frame. `None` on the first frame
    /// and whenever the resolution changes.
    pub fn update(&mut self, frame: &GrayFrame) -> Option<f32> {
        let energy = match &self.previous {
            Some(prev)
                if prev.width == frame.width
                    && prev.height == frame.height
                    && !frame.data.is_empty() =>
            {
                Some(diff_variance(&prev.data, &frame.data))
            }
            Some(_) => {
                debug!("Frame size changed, motion baseline reset");
                None
            }
            None => None,
        };
        self.previous = Some(frame.clone());
        energy
    }
}

impl Default for MotionEnergyMeter {
    fn default() -> Self {
        Self::new()
    }
}

fn diff_variance(a: &[u8], b: &[u8]) -> f32 {
    let n = a.len().min(b.len()) as f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let d = (*x as f64 - *y as f64).abs();
        sum += d;
        sum_sq += d * d;
    }
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0) as f32
}
