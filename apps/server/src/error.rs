use pf_utils::error::FileIOError;

use axum::{
	extract::multipart::MultipartError,
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{error, warn};
use uuid::Uuid;

const INTERNAL_ERROR: &str = "Internal server error";

/// Everything a handler can fail with. Responses always carry a JSON `{"error": "..."}` body.
#[derive(Error, Debug)]
pub enum ApiError {
	#[error("No file part")]
	MissingFile,
	#[error("No file selected")]
	EmptyFilename,
	#[error("No image file found")]
	MissingCaptionImage,
	#[error("Unsupported file type")]
	UnsupportedType,
	#[error("Invalid file name")]
	InvalidFilename,
	#[error("Invalid image: {0}")]
	InvalidImage(#[source] pf_images::Error),
	#[error("Invalid multipart body: {0}")]
	Multipart(#[from] MultipartError),
	#[error("File not found")]
	NotFound,
	#[error("Job {0} not found")]
	JobNotFound(Uuid),

	#[error("Point cloud color channels not found")]
	MissingColors,
	#[error("Mesh generation failed: {0}")]
	Generation(#[source] pf_ai::Error),
	#[error("{0}")]
	Caption(String),
	#[error("Mesh generation timed out")]
	Timeout,
	#[error("Server is busy, try again later")]
	QueueFull,
	#[error("Server is shutting down")]
	ShuttingDown,

	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("background task failed: {0}")]
	Join(#[from] JoinError),
}

impl ApiError {
	#[must_use]
	pub const fn status(&self) -> StatusCode {
		match self {
			Self::MissingFile
			| Self::EmptyFilename
			| Self::MissingCaptionImage
			| Self::UnsupportedType
			| Self::InvalidFilename
			| Self::InvalidImage(_)
			| Self::Multipart(_) => StatusCode::BAD_REQUEST,
			Self::NotFound | Self::JobNotFound(_) => StatusCode::NOT_FOUND,
			Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
			Self::QueueFull | Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
			Self::MissingColors
			| Self::Generation(_)
			| Self::Caption(_)
			| Self::FileIO(_)
			| Self::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// Text sent back to the client. Local failures are logged in full and only reported
	/// generically.
	#[must_use]
	pub fn public_message(&self) -> String {
		match self {
			Self::Generation(_) => "Mesh generation failed".to_string(),
			Self::FileIO(_) | Self::Join(_) => INTERNAL_ERROR.to_string(),
			other => other.to_string(),
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status();

		if status.is_server_error() {
			error!(%status, "{self:#?}");
		} else {
			warn!(%status, "{self}");
		}

		(status, Json(json!({ "error": self.public_message() }))).into_response()
	}
}
