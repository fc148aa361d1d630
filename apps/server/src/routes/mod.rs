use crate::error::ApiError;

use axum::{body::Bytes, extract::Multipart};

pub mod caption;
pub mod download;
pub mod mesh;

/// Form field carrying the uploaded image
const IMAGE_FIELD: &str = "image";

struct ImageField {
	/// Name as sent by the client, not yet sanitized
	filename: String,
	data: Bytes,
}

/// First `image` field of the form, other fields are skipped.
async fn read_image_field(multipart: &mut Multipart) -> Result<Option<ImageField>, ApiError> {
	while let Some(field) = multipart.next_field().await? {
		if field.name() != Some(IMAGE_FIELD) {
			continue;
		}

		let filename = field.file_name().unwrap_or_default().to_string();
		let data = field.bytes().await?;

		return Ok(Some(ImageField { filename, data }));
	}

	Ok(None)
}
