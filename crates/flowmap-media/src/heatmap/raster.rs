//! The accumulation raster: a floating-point canvas summing detection
//! presence before colorization.

use ndarray::Array2;

/// Per-pixel accumulation of detection presence.
///
/// Values are non-negative; overlapping stamps sum, so dense overlap yields
/// higher accumulated value ("more visits here"). The raster is working
/// state only; it is discarded once the blended image is produced.
#[derive(Debug, Clone)]
pub struct AccumulationRaster {
    values: Array2<f32>,
}

impl AccumulationRaster {
    /// Zero-filled raster sized `(height, width)` like the reference image.
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            values: Array2::zeros((height, width)),
        }
    }

    pub fn width(&self) -> usize {
        self.values.ncols()
    }

    pub fn height(&self) -> usize {
        self.values.nrows()
    }

    /// Value at `(x, y)`, or 0.0 outside the raster.
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.values.get((y, x)).copied().unwrap_or(0.0)
    }

    /// Stamp a filled disk of the given radius and value, accumulating by
    /// summation where disks overlap. Out-of-bounds centers are clipped.
    pub fn stamp_disk(&mut self, cx: i64, cy: i64, radius: u32, value: f32) {
        let r = radius as i64;
        let (h, w) = (self.height() as i64, self.width() as i64);

        let y_lo = (cy - r).max(0);
        let y_hi = (cy + r).min(h - 1);
        let x_lo = (cx - r).max(0);
        let x_hi = (cx + r).min(w - 1);

        for y in y_lo..=y_hi {
            for x in x_lo..=x_hi {
                let dx = x - cx;
                let dy = y - cy;
                if dx * dx + dy * dy <= r * r {
                    self.values[(y as usize, x as usize)] += value;
                }
            }
        }
    }

    /// Apply a gamma curve in place (brightens sparse regions when the
    /// exponent is below 1).
    pub fn apply_gamma(&mut self, exponent: f32) {
        self.values.mapv_inplace(|v| v.powf(exponent));
    }

    /// Min-max normalize into `[0, hi]`, like `cv2.normalize(NORM_MINMAX)`.
    /// A constant raster maps to all zeros.
    pub fn normalized(&self, hi: f32) -> Array2<f32> {
        let min = self.values.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = self
            .values
            .iter()
            .cloned()
            .fold(f32::NEG_INFINITY, f32::max);

        if !(max > min) {
            return Array2::zeros(self.values.raw_dim());
        }

        let scale = hi / (max - min);
        self.values.mapv(|v| (v - min) * scale)
    }

    /// Borrow the raw values.
    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }
}
