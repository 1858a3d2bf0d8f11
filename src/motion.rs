//! Motion magnitude between consecutive frames.
//!
//! Mirrors the classic frame-differencing chain: absolute difference over
//! the grayscale ROI crops, Gaussian blur to suppress sensor noise,
//! binarize, dilate to close small gaps, then take the pixel area of the
//! largest 8-connected changed region. Stateless between calls and no error
//! path. A frame pair with no changed regions yields magnitude 0.

use std::collections::HashMap;

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use imageproc::region_labelling::{connected_components, Connectivity};

/// Sigma of a 5x5 binomial kernel ([1, 4, 6, 4, 1] / 16).
const BLUR_SIGMA: f32 = 1.0;

/// Tuning for the differencing chain.
#[derive(Clone, Copy, Debug)]
pub struct MotionConfig {
    /// Intensity cutoff for binarizing the blurred difference image.
    pub pixel_threshold: u8,
    /// Dilation radius of the binary mask; each unit is one pass with a 3x3
    /// structuring element.
    pub dilate_iterations: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            pixel_threshold: 75,
            dilate_iterations: 3,
        }
    }
}

/// Stateless motion detector over grayscale buffers.
#[derive(Clone, Copy, Debug, Default)]
pub struct MotionDetector {
    config: MotionConfig,
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        Self { config }
    }

    /// Motion magnitude between two grayscale buffers of identical shape.
    ///
    /// Returns the pixel area of the largest changed region, or 0.
    pub fn magnitude(&self, prev: &[u8], curr: &[u8], width: usize, height: usize) -> u64 {
        debug_assert_eq!(prev.len(), width * height);
        debug_assert_eq!(curr.len(), width * height);
        if width == 0 || height == 0 || prev.len() != curr.len() {
            return 0;
        }

        let diff: Vec<u8> = prev
            .iter()
            .zip(curr.iter())
            .map(|(a, b)| a.abs_diff(*b))
            .collect();
        let Some(diff) = GrayImage::from_raw(width as u32, height as u32, diff) else {
            return 0;
        };

        let mut mask = gaussian_blur_f32(&diff, BLUR_SIGMA);
        let cutoff = self.config.pixel_threshold;
        for pixel in mask.pixels_mut() {
            pixel.0 = if pixel.0[0] > cutoff { [255] } else { [0] };
        }

        if self.config.dilate_iterations > 0 {
            let radius = self.config.dilate_iterations.min(u8::MAX as u32) as u8;
            mask = dilate(&mask, Norm::LInf, radius);
        }

        let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));
        let mut areas: HashMap<u32, u64> = HashMap::new();
        for pixel in labels.pixels() {
            let label = pixel.0[0];
            if label != 0 {
                *areas.entry(label).or_insert(0) += 1;
            }
        }
        areas.into_values().max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(width: usize, height: usize) -> Vec<u8> {
        vec![0u8; width * height]
    }

    fn with_square(width: usize, height: usize, x0: usize, y0: usize, side: usize) -> Vec<u8> {
        let mut buf = blank(width, height);
        for y in y0..(y0 + side) {
            for x in x0..(x0 + side) {
                buf[y * width + x] = 255;
            }
        }
        buf
    }

    #[test]
    fn identical_frames_have_zero_magnitude() {
        let detector = MotionDetector::default();
        let frame = with_square(64, 64, 10, 10, 12);
        assert_eq!(detector.magnitude(&frame, &frame, 64, 64), 0);
    }

    #[test]
    fn appearing_square_yields_positive_magnitude() {
        let detector = MotionDetector::default();
        let prev = blank(64, 64);
        let curr = with_square(64, 64, 20, 20, 12);
        let mag = detector.magnitude(&prev, &curr, 64, 64);
        // 12x12 object, grown by blur spill and the dilation radius.
        assert!(mag >= 144, "magnitude {} below raw square area", mag);
        assert!(mag <= 24 * 24, "magnitude {} implausibly large", mag);
    }

    #[test]
    fn larger_change_means_larger_magnitude() {
        let detector = MotionDetector::default();
        let prev = blank(96, 96);
        let small = detector.magnitude(&prev, &with_square(96, 96, 10, 10, 8), 96, 96);
        let large = detector.magnitude(&prev, &with_square(96, 96, 10, 10, 24), 96, 96);
        assert!(large > small);
    }

    #[test]
    fn disjoint_blobs_report_largest_only() {
        let detector = MotionDetector::new(MotionConfig {
            pixel_threshold: 75,
            dilate_iterations: 0,
        });
        let prev = blank(64, 64);
        let mut curr = with_square(64, 64, 4, 4, 16);
        // A second, far smaller blob well away from the first.
        for y in 50..54 {
            for x in 50..54 {
                curr[y * 64 + x] = 255;
            }
        }
        let both = detector.magnitude(&prev, &curr, 64, 64);
        let large_only = detector.magnitude(&prev, &with_square(64, 64, 4, 4, 16), 64, 64);
        // The 16x16 blob dominates; the 4x4 blob must not be summed in.
        assert_eq!(both, large_only);
        assert!(both > 100);
    }

    #[test]
    fn subthreshold_noise_is_ignored() {
        let detector = MotionDetector::default();
        let prev = blank(32, 32);
        let curr = vec![40u8; 32 * 32]; // uniform change below the cutoff
        assert_eq!(detector.magnitude(&prev, &curr, 32, 32), 0);
    }
}
