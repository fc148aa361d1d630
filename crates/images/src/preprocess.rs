use crate::{
	consts::{CLIP_MEAN, CLIP_STD},
	error::{Error, Result},
};

use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;

/// How an RGB image is turned into a normalized `[1, 3, size, size]` model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageTransform {
	pub size: u32,
	/// Resize the shortest side to `size` and center crop, instead of squashing to a square
	pub center_crop: bool,
	pub mean: [f32; 3],
	pub std: [f32; 3],
}

impl ImageTransform {
	/// CLIP preprocessing, used for the point cloud generator's image conditioning.
	#[must_use]
	pub const fn clip(size: u32) -> Self {
		Self {
			size,
			center_crop: true,
			mean: CLIP_MEAN,
			std: CLIP_STD,
		}
	}

	/// BLIP preprocessing, a plain resize with the CLIP statistics.
	#[must_use]
	pub const fn blip(size: u32) -> Self {
		Self {
			size,
			center_crop: false,
			mean: CLIP_MEAN,
			std: CLIP_STD,
		}
	}

	pub fn apply(&self, image: &RgbImage) -> Result<Array4<f32>> {
		let (width, height) = image.dimensions();
		if width == 0 || height == 0 || self.size == 0 {
			return Err(Error::InvalidDimensions { width, height });
		}

		let resized = if self.center_crop {
			let scale = f64::from(self.size) / f64::from(width.min(height));
			#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
			let (scaled_w, scaled_h) = (
				((f64::from(width) * scale).round() as u32).max(self.size),
				((f64::from(height) * scale).round() as u32).max(self.size),
			);
			let scaled = image::imageops::resize(image, scaled_w, scaled_h, FilterType::CatmullRom);
			let (left, top) = ((scaled_w - self.size) / 2, (scaled_h - self.size) / 2);
			image::imageops::crop_imm(&scaled, left, top, self.size, self.size).to_image()
		} else {
			image::imageops::resize(image, self.size, self.size, FilterType::CatmullRom)
		};

		let side = self.size as usize;
		let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
		for (x, y, pixel) in resized.enumerate_pixels() {
			for channel in 0..3 {
				tensor[[0, channel, y as usize, x as usize]] =
					(f32::from(pixel[channel]) / 255.0 - self.mean[channel]) / self.std[channel];
			}
		}

		Ok(tensor)
	}
}
