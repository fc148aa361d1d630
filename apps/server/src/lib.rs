//!
//! # PointForge Server
//!
//! HTTP front end over the PointForge models: captions uploaded images and turns them into
//! vertex colored OBJ meshes, served back for download.
//!

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
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::dbg_macro
)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use pf_ai::{Captioner, ImageToMesh};

use std::{path::PathBuf, sync::Arc};

use axum::{
	extract::DefaultBodyLimit,
	routing::{get, post},
	Router,
};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

pub mod config;
pub mod error;
pub mod jobs;
mod routes;

pub use config::Config;
pub use error::ApiError;
pub use jobs::{JobQueue, JobStatus};

#[derive(Clone)]
pub struct AppState {
	pub jobs: Arc<JobQueue>,
	pub captioner: Arc<dyn Captioner>,
	/// Serializes every use of the models
	pub device_lock: Arc<Mutex<()>>,
	pub uploads_dir: Arc<PathBuf>,
	pub output_dir: Arc<PathBuf>,
}

impl AppState {
	/// Wire the models into the job queue. Must be called from within the tokio runtime, it
	/// starts the job worker.
	#[must_use]
	pub fn new(pipeline: ImageToMesh, captioner: Arc<dyn Captioner>, config: &Config) -> Self {
		let device_lock = Arc::new(Mutex::new(()));

		let jobs = JobQueue::new(
			Arc::new(pipeline),
			config.output_dir(),
			Arc::clone(&device_lock),
			config.queue_capacity,
			config.job_timeout(),
			config.job_history,
		);

		Self {
			jobs: Arc::new(jobs),
			captioner,
			device_lock,
			uploads_dir: Arc::new(config.uploads_dir()),
			output_dir: Arc::new(config.output_dir()),
		}
	}
}

#[must_use]
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
	Router::new()
		.route("/health", get(|| async { "OK" }))
		.route("/upload", post(routes::mesh::upload))
		.route("/jobs", post(routes::mesh::submit_job))
		.route("/jobs/:id", get(routes::mesh::job_status))
		.route("/download/:filename", get(routes::download::download))
		.route("/get-caption", post(routes::caption::get_caption))
		.layer(DefaultBodyLimit::max(max_upload_bytes))
		.layer(CorsLayer::permissive())
		.with_state(state)
}
