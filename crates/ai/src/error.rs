use pf_utils::error::FileIOError;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
	#[error("failed to initialize AI environment: {0}")]
	Init(#[source] ort::Error),
	#[error("onnx runtime error: {0}")]
	Ort(#[from] ort::Error),
	#[error("model '{model}' produced no output named '{output}'")]
	MissingOutput {
		model: &'static str,
		output: &'static str,
	},
	#[error("model '{name}' is not in the cache at '{}' and no remote model source is configured", path.display())]
	ModelNotFound { name: String, path: PathBuf },
	#[error("failed to download model: {0}")]
	Download(#[from] reqwest::Error),
	#[error("invalid model url: {0}")]
	Url(#[from] url::ParseError),
	#[error("invalid stage plan: {0}")]
	InvalidStagePlan(String),
	#[error("invalid model input: {0}")]
	InvalidInput(String),
	#[error("tokenizer error: {0}")]
	Tokenizer(String),
	#[error("generation was cancelled")]
	Cancelled,

	#[error(transparent)]
	Diffusion(#[from] DiffusionError),
	#[error(transparent)]
	Image(#[from] pf_images::Error),
	#[error(transparent)]
	Mesh(#[from] pf_mesh::Error),
	#[error(transparent)]
	Shape(#[from] ndarray::ShapeError),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

impl Error {
	/// The point cloud came out without one of its color channels
	#[must_use]
	pub const fn is_missing_colors(&self) -> bool {
		matches!(self, Self::Mesh(pf_mesh::Error::MissingColorChannel(_)))
	}
}

#[derive(Error, Debug)]
pub enum DiffusionError {
	#[error("timestep {timestep} is out of range for a {len} step schedule")]
	TimestepOutOfRange { timestep: i64, len: usize },
	#[error("cannot broadcast shape {from:?} to {to:?}")]
	Broadcast { from: Vec<usize>, to: Vec<usize> },
	#[error("expected {expected} channels, got {actual}")]
	ChannelMismatch { expected: usize, actual: usize },
	#[error("invalid noise schedule: {0}")]
	InvalidSchedule(&'static str),
	#[error("non-finite values in stage {stage} at step {step}")]
	NonFinite { stage: usize, step: usize },
}
