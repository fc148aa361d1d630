pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("error while loading the image (via the `image` crate): {0}")]
	Image(#[from] image::ImageError),
	#[error("the image provided is unsupported")]
	Unsupported,
	#[error("the image provided is too large (over 24MiB)")]
	TooLarge,
	#[error("the image provided is empty")]
	Empty,
	#[error("the image has invalid dimensions: {width}x{height}")]
	InvalidDimensions { width: u32, height: u32 },
	#[error("the file name has no extension")]
	NoExtension,
}
