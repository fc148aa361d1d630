use crate::{error::ApiError, AppState};

use pf_utils::path::is_safe_path_segment;

use axum::{
	body::Body,
	extract::{Path as UrlPath, Request, State},
	http::{header, HeaderValue, StatusCode},
	response::Response,
};
use tower::ServiceExt;
use tower_http::services::ServeFile;

/// Send a generated mesh back as an attachment.
pub async fn download(
	State(state): State<AppState>,
	UrlPath(filename): UrlPath<String>,
	request: Request,
) -> Result<Response, ApiError> {
	if !is_safe_path_segment(&filename) {
		return Err(ApiError::InvalidFilename);
	}

	let path = state.output_dir.join(&filename);

	let mut response = ServeFile::new(&path)
		.oneshot(request)
		.await
		.unwrap_or_else(|never| match never {});

	if response.status() == StatusCode::NOT_FOUND {
		return Err(ApiError::NotFound);
	}

	let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
		.map_err(|_| ApiError::InvalidFilename)?;
	response
		.headers_mut()
		.insert(header::CONTENT_DISPOSITION, disposition);

	Ok(response.map(Body::new))
}
