use super::{read_image_field, ImageField};
use crate::{
	error::ApiError,
	jobs::{JobRequest, JobStatus},
	AppState,
};

use pf_images::{decode_upload, is_allowed_file};
use pf_utils::{error::FileIOError, path::secure_filename};

use std::path::Path;

use axum::{
	extract::{Multipart, Path as UrlPath, State},
	http::StatusCode,
	Json,
};
use serde::Serialize;
use tokio::{fs, task::spawn_blocking};
use tracing::debug;
use uuid::Uuid;

#[derive(Serialize)]
pub struct UploadResponse {
	filename: String,
}

#[derive(Serialize)]
pub struct JobCreated {
	job_id: Uuid,
}

/// Generate a mesh from the uploaded image and wait for it.
pub async fn upload(
	State(state): State<AppState>,
	mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
	let request = accept_upload(&state, &mut multipart).await?;
	let ticket = state.jobs.submit(request).await?;

	let filename = ticket.wait().await?;

	Ok(Json(UploadResponse { filename }))
}

/// Same as [`upload`] but answers as soon as the job is queued.
pub async fn submit_job(
	State(state): State<AppState>,
	mut multipart: Multipart,
) -> Result<(StatusCode, Json<JobCreated>), ApiError> {
	let request = accept_upload(&state, &mut multipart).await?;
	let ticket = state.jobs.submit(request).await?;

	Ok((StatusCode::ACCEPTED, Json(JobCreated { job_id: ticket.id })))
}

pub async fn job_status(
	State(state): State<AppState>,
	UrlPath(id): UrlPath<Uuid>,
) -> Result<Json<JobStatus>, ApiError> {
	state
		.jobs
		.status(id)
		.await
		.map(Json)
		.ok_or(ApiError::JobNotFound(id))
}

/// Validate the upload, keep a copy of it and turn it into a job request.
///
/// Nothing is written unless the file is an image we can decode.
async fn accept_upload(state: &AppState, multipart: &mut Multipart) -> Result<JobRequest, ApiError> {
	let ImageField { filename, data } = read_image_field(multipart)
		.await?
		.ok_or(ApiError::MissingFile)?;

	if filename.is_empty() {
		return Err(ApiError::EmptyFilename);
	}

	if !is_allowed_file(&filename) {
		return Err(ApiError::UnsupportedType);
	}

	let filename = secure_filename(&filename);
	let Some(stem) = Path::new(&filename)
		.file_stem()
		.and_then(|stem| stem.to_str())
		.filter(|stem| !stem.is_empty() && is_allowed_file(&filename))
		.map(str::to_string)
	else {
		return Err(ApiError::InvalidFilename);
	};

	let image = spawn_blocking({
		let filename = filename.clone();
		let data = data.clone();
		move || decode_upload(&filename, &data)
	})
	.await?
	.map_err(ApiError::InvalidImage)?;

	let path = state.uploads_dir.join(&filename);
	fs::write(&path, &data)
		.await
		.map_err(|e| FileIOError::from((&path, e, "Failed to save upload")))?;

	debug!(
		path = %path.display(),
		width = image.width(),
		height = image.height(),
		"Saved upload"
	);

	Ok(JobRequest {
		image,
		output_name: format!("{stem}.obj"),
	})
}
