use crate::{
	consts::GENERIC_MAXIMUM_FILE_SIZE,
	error::{Error, Result},
	ImageHandler,
};
use image::DynamicImage;
use tracing::trace;

pub struct GenericHandler {}

impl ImageHandler for GenericHandler {
	fn maximum_size(&self) -> u64 {
		GENERIC_MAXIMUM_FILE_SIZE
	}

	fn validate_image(&self, width: u32, height: u32) -> Result<()> {
		if width == 0 || height == 0 {
			return Err(Error::InvalidDimensions { width, height });
		}

		Ok(())
	}

	fn decode(&self, data: &[u8]) -> Result<DynamicImage> {
		if data.is_empty() {
			return Err(Error::Empty);
		}

		if u64::try_from(data.len()).map_or(true, |len| len > self.maximum_size()) {
			return Err(Error::TooLarge);
		}

		// Content sniffing rather than trusting the extension, a renamed file is still rejected
		let image = image::load_from_memory(data)?;
		self.validate_image(image.width(), image.height())?;

		trace!(
			width = image.width(),
			height = image.height(),
			color = ?image.color(),
			"Decoded image"
		);

		Ok(image)
	}
}
