use crate::{
	consts,
	error::{Error, Result},
	generic::GenericHandler,
	ImageHandler,
};
use image::RgbImage;

/// Whether an uploaded file name carries one of the accepted image extensions.
#[must_use]
pub fn is_allowed_file(filename: &str) -> bool {
	filename
		.rsplit_once('.')
		.is_some_and(|(_, ext)| match_to_handler(&ext.to_ascii_lowercase()).is_ok())
}

/// Decode an in-memory upload and convert it to 8-bit RGB.
pub fn decode_upload(filename: &str, data: &[u8]) -> Result<RgbImage> {
	let (_, ext) = filename.rsplit_once('.').ok_or(Error::NoExtension)?;

	Ok(match_to_handler(&ext.to_ascii_lowercase())?
		.decode(data)?
		.into_rgb8())
}

fn match_to_handler(ext: &str) -> Result<Box<dyn ImageHandler>> {
	if consts::ALLOWED_EXTENSIONS.contains(&ext) {
		Ok(Box::new(GenericHandler {}))
	} else {
		Err(Error::Unsupported)
	}
}
