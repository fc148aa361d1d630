use super::{read_image_field, ImageField};
use crate::{error::ApiError, AppState};

use pf_images::{DynamicImage, RgbImage};

use std::sync::Arc;

use axum::{
	extract::{Multipart, State},
	Json,
};
use serde::Serialize;
use tokio::task::spawn_blocking;
use tracing::debug;

#[derive(Serialize)]
pub struct CaptionResponse {
	caption: String,
}

/// Describe the uploaded image in a sentence.
pub async fn get_caption(
	State(state): State<AppState>,
	mut multipart: Multipart,
) -> Result<Json<CaptionResponse>, ApiError> {
	let ImageField { filename, data } = read_image_field(&mut multipart)
		.await?
		.filter(|field| !field.data.is_empty())
		.ok_or(ApiError::MissingCaptionImage)?;

	let _device = state.device_lock.lock().await;

	let caption = spawn_blocking({
		let captioner = Arc::clone(&state.captioner);
		move || {
			let image = decode(&filename, &data)?;
			captioner
				.caption(&image)
				.map_err(|e| ApiError::Caption(e.to_string()))
		}
	})
	.await??;

	debug!(%caption, "Captioned upload");

	Ok(Json(CaptionResponse { caption }))
}

/// Decode by file name when it names a known format, by sniffing the contents otherwise
fn decode(filename: &str, data: &[u8]) -> Result<RgbImage, ApiError> {
	let decoded = if pf_images::is_allowed_file(filename) {
		pf_images::decode_upload(filename, data)
	} else {
		image::load_from_memory(data)
			.map(DynamicImage::into_rgb8)
			.map_err(pf_images::Error::from)
	};

	decoded.map_err(|e| ApiError::Caption(e.to_string()))
}
