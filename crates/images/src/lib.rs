#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	clippy::expect_used,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::dbg_macro
)]
#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod consts;
mod error;
mod generic;
mod handler;
mod preprocess;

pub use consts::{ALLOWED_EXTENSIONS, CLIP_MEAN, CLIP_STD};
pub use error::{Error, Result};
pub use handler::{decode_upload, is_allowed_file};
pub use image::{DynamicImage, RgbImage};
pub use preprocess::ImageTransform;

/// Decoding rules for one family of image formats.
pub trait ImageHandler {
	/// Largest encoded size accepted, in bytes
	fn maximum_size(&self) -> u64;

	fn validate_image(&self, width: u32, height: u32) -> Result<()>;

	fn decode(&self, data: &[u8]) -> Result<DynamicImage>;
}
