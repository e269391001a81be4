//! Separable Gaussian blur over the float raster.
//!
//! Operates in the float domain before the u8 conversion so the smoothing
//! does not quantize away low-density gradients. Edges use reflect
//! sampling.

use ndarray::Array2;

/// Blur `input` with a Gaussian of the given sigma.
///
/// The kernel is truncated at 4 sigma on each side.
pub fn gaussian_blur(input: &Array2<f32>, sigma: f32) -> Array2<f32> {
    if sigma <= 0.0 {
        return input.clone();
    }

    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as i64;
    let (h, w) = input.dim();

    // Horizontal pass
    let mut horizontal = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = reflect(x as i64 + k as i64 - radius, w as i64);
                acc += input[(y, sx)] * weight;
            }
            horizontal[(y, x)] = acc;
        }
    }

    // Vertical pass
    let mut output = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = reflect(y as i64 + k as i64 - radius, h as i64);
                acc += horizontal[(sy, x)] * weight;
            }
            output[(y, x)] = acc;
        }
    }

    output
}

/// Normalized 1-D Gaussian kernel truncated at 4 sigma.
fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (4.0 * sigma).round().max(1.0) as i64;
    let two_sigma_sq = 2.0 * sigma * sigma;

    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-(i * i) as f32 / two_sigma_sq).exp())
        .collect();

    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Reflect an index into `[0, len)`.
fn reflect(i: i64, len: i64) -> usize {
    let mut i = i;
    if i < 0 {
        i = -i - 1;
    }
    if i >= len {
        i = 2 * len - i - 1;
    }
    i.clamp(0, len - 1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_sums_to_one() {
        let kernel = gaussian_kernel(10.0);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        // Truncated at 4 sigma on each side
        assert_eq!(kernel.len(), 81);
    }

    #[test]
    fn test_blur_preserves_mass() {
        let mut input = Array2::<f32>::zeros((64, 64));
        input[(32, 32)] = 100.0;

        let blurred = gaussian_blur(&input, 3.0);
        let total: f32 = blurred.iter().sum();
        assert!((total - 100.0).abs() < 0.5);
        // Peak spreads out
        assert!(blurred[(32, 32)] < 100.0);
        assert!(blurred[(32, 32)] > blurred[(32, 40)]);
    }

    #[test]
    fn test_blur_of_constant_is_constant() {
        let input = Array2::<f32>::from_elem((16, 16), 5.0);
        let blurred = gaussian_blur(&input, 2.0);
        for v in blurred.iter() {
            assert!((v - 5.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_zero_sigma_is_identity() {
        let mut input = Array2::<f32>::zeros((8, 8));
        input[(4, 4)] = 1.0;
        let out = gaussian_blur(&input, 0.0);
        assert_eq!(out, input);
    }

    #[test]
    fn test_reflect_indexing() {
        assert_eq!(reflect(-1, 10), 0);
        assert_eq!(reflect(-2, 10), 1);
        assert_eq!(reflect(10, 10), 9);
        assert_eq!(reflect(11, 10), 8);
        assert_eq!(reflect(5, 10), 5);
    }
}
