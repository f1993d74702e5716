use crate::frame::Frame;
use anyhow::{bail, Context, Result};
use image::{imageops, GrayImage, RgbImage};
use ndarray::Array4;
use std::sync::Arc;

/// ImageNet statistics the U²-Net weights were trained with
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Preprocessor for converting RGB frames to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Preprocess a batch of RGB frames into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize each frame to target dimensions
    /// 2. Scale to [0, 1] and normalize with the ImageNet mean/std
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [batch, 3, height, width]
    pub fn preprocess_batch(&self, frames: &[Arc<Frame>]) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess", frames = frames.len()).entered();

        let (width, height) = (self.target_width, self.target_height);
        let mut tensor =
            Array4::<f32>::zeros((frames.len(), 3, height as usize, width as usize));

        for (n, frame) in frames.iter().enumerate() {
            let resized = self.resize(frame)?;
            for (x, y, pixel) in resized.enumerate_pixels() {
                for c in 0..3 {
                    let value = pixel[c] as f32 / 255.0;
                    tensor[[n, c, y as usize, x as usize]] = (value - MEAN[c]) / STD[c];
                }
            }
        }

        Ok(tensor)
    }

    fn resize(&self, frame: &Frame) -> Result<RgbImage> {
        let shape = frame.shape();
        if shape.channels != 3 {
            bail!(
                "Frame {} has {} channels, expected RGB",
                frame.index(),
                shape.channels
            );
        }

        let image = RgbImage::from_raw(shape.width, shape.height, frame.as_bytes().to_vec())
            .with_context(|| format!("Frame {} does not fit {}", frame.index(), shape))?;

        if image.dimensions() == (self.target_width, self.target_height) {
            return Ok(image);
        }

        Ok(imageops::resize(
            &image,
            self.target_width,
            self.target_height,
            imageops::FilterType::Lanczos3,
        ))
    }

    /// Postprocess one raw model output plane into an 8-bit matte
    ///
    /// The plane is stretched to the full 0..255 range (min-max), then
    /// resized to the requested matte dimensions.
    ///
    /// Returns: matte bytes flattened in row-major order
    pub fn postprocess_matte(
        plane: &[f32],
        plane_width: u32,
        plane_height: u32,
        target_width: u32,
        target_height: u32,
    ) -> Result<Vec<u8>> {
        let _span = tracing::debug_span!("postprocess").entered();

        let expected = plane_width as usize * plane_height as usize;
        if plane.len() != expected {
            bail!(
                "Matte plane has {} values, expected {}x{}",
                plane.len(),
                plane_width,
                plane_height
            );
        }

        let (min, max) = plane
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;

        let bytes: Vec<u8> = plane
            .iter()
            .map(|&v| {
                let scaled = if range > f32::EPSILON {
                    (v - min) / range
                } else {
                    0.0
                };
                (scaled * 255.0).round().clamp(0.0, 255.0) as u8
            })
            .collect();

        // If dimensions match, no resize needed
        if plane_width == target_width && plane_height == target_height {
            return Ok(bytes);
        }

        let gray = GrayImage::from_raw(plane_width, plane_height, bytes)
            .context("Matte plane does not fit its dimensions")?;

        Ok(imageops::resize(
            &gray,
            target_width,
            target_height,
            imageops::FilterType::Lanczos3,
        )
        .into_raw())
    }
}
