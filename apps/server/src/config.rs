use pf_ai::DevicePreference;
use pf_utils::error::FileIOError;

use std::{
	net::{IpAddr, Ipv6Addr},
	path::PathBuf,
	time::Duration,
};

use clap::Parser;
use tokio::fs;
use url::Url;

const UPLOADS_DIR: &str = "uploads";
const OUTPUT_DIR: &str = "generated_models";
const MODELS_DIR: &str = "models";

#[derive(Parser, Debug, Clone)]
#[command(name = "pointforge", version, about = "Image captioning and image to colored mesh service")]
pub struct Config {
	/// Address to listen on, `::` accepts both IPv6 and IPv4
	#[arg(long, env = "PF_HOST", default_value_t = IpAddr::V6(Ipv6Addr::UNSPECIFIED))]
	pub host: IpAddr,

	#[arg(long, env = "PF_PORT", default_value_t = 5000)]
	pub port: u16,

	/// Root for uploads and generated meshes
	#[arg(long, env = "PF_DATA_DIR", default_value = "data")]
	pub data_dir: PathBuf,

	/// Model cache, `<data dir>/models` when unset
	#[arg(long, env = "PF_MODEL_DIR")]
	pub model_dir: Option<PathBuf>,

	/// Remote directory to fetch missing model files from
	#[arg(long, env = "PF_MODEL_BASE_URL")]
	pub model_base_url: Option<Url>,

	/// `auto` picks the first available accelerator, `cpu` forces the CPU
	#[arg(long, env = "PF_DEVICE", default_value = "auto")]
	pub device: DevicePreference,

	/// Voxels per axis of the SDF grid
	#[arg(long, env = "PF_GRID_SIZE", default_value_t = 128)]
	pub grid_size: usize,

	#[arg(long, env = "PF_JOB_TIMEOUT_SECS", default_value_t = 300)]
	pub job_timeout_secs: u64,

	/// Mesh jobs allowed to wait for the worker before new ones are turned away
	#[arg(long, env = "PF_QUEUE_CAPACITY", default_value_t = 16)]
	pub queue_capacity: usize,

	/// Finished jobs whose status stays available to `GET /jobs/{id}`
	#[arg(long, env = "PF_JOB_HISTORY", default_value_t = 1024)]
	pub job_history: usize,

	#[arg(long, env = "PF_MAX_UPLOAD_BYTES", default_value_t = 24 * 1024 * 1024)]
	pub max_upload_bytes: usize,

	/// Fixed sampling seed, for reproducible meshes
	#[arg(long, env = "PF_SEED")]
	pub seed: Option<u64>,
}

impl Config {
	#[must_use]
	pub fn uploads_dir(&self) -> PathBuf {
		self.data_dir.join(UPLOADS_DIR)
	}

	#[must_use]
	pub fn output_dir(&self) -> PathBuf {
		self.data_dir.join(OUTPUT_DIR)
	}

	#[must_use]
	pub fn model_dir(&self) -> PathBuf {
		self.model_dir
			.clone()
			.unwrap_or_else(|| self.data_dir.join(MODELS_DIR))
	}

	#[must_use]
	pub const fn job_timeout(&self) -> Duration {
		Duration::from_secs(self.job_timeout_secs)
	}

	/// Create the upload and output directories if they are missing
	pub async fn create_dirs(&self) -> Result<(), FileIOError> {
		for dir in [self.uploads_dir(), self.output_dir()] {
			fs::create_dir_all(&dir)
				.await
				.map_err(|e| FileIOError::from((&dir, e, "Failed to create data directory")))?;
		}

		Ok(())
	}
}
