use crate::{
	caption::{BlipCaptioner, Captioner},
	denoiser::{Denoiser, OnnxDenoiser},
	device::Device,
	diffusion::{CoefficientGather, Float32Gather},
	download::ensure_model,
	error::Error,
	pipeline::ImageToMesh,
	sampler::{PointCloudGenerator, ProgressiveSampler},
	sdf::{OnnxSdfModel, SdfModel},
	stage::StagePlan,
};

use pf_mesh::VoxelGrid;

use std::{fmt, path::PathBuf, sync::Arc};

use reqwest::Client;
use tracing::info;
use url::Url;

const BASE_MODEL: &str = "base40M.onnx";
const UPSAMPLE_MODEL: &str = "upsample.onnx";
const SDF_ENCODER: &str = "sdf_encoder.onnx";
const SDF_DECODER: &str = "sdf_decoder.onnx";
const CAPTION_VISION: &str = "blip_vision.onnx";
const CAPTION_DECODER: &str = "blip_text_decoder.onnx";
const CAPTION_TOKENIZER: &str = "blip_tokenizer.json";

#[derive(Debug, Clone)]
pub struct ModelBankConfig {
	/// Where model files are looked up and downloaded to
	pub cache_dir: PathBuf,
	/// Remote directory holding the same files, used to fill the cache
	pub base_url: Option<Url>,
	/// Fixed sampling seed, random per request when unset
	pub seed: Option<u64>,
}

/// Every pretrained network the service needs, loaded once on the selected device and shared
/// read only afterwards.
#[derive(Clone)]
pub struct ModelBank {
	device: Device,
	generator: Arc<dyn PointCloudGenerator>,
	sdf: Arc<dyn SdfModel>,
	captioner: Arc<dyn Captioner>,
}

impl ModelBank {
	/// Fetch whatever is missing from the cache and create every session.
	///
	/// [`crate::init`] must have committed the runtime environment for `device` beforehand.
	pub async fn load(config: &ModelBankConfig, device: Device) -> Result<Self, Error> {
		let client = &Client::new();
		let base_url = config.base_url.as_ref();
		let cache_dir = config.cache_dir.as_path();
		let fetch = move |file_name| ensure_model(client, cache_dir, file_name, base_url);

		let base = fetch(BASE_MODEL).await?;
		let upsample = fetch(UPSAMPLE_MODEL).await?;
		let sdf_encoder = fetch(SDF_ENCODER).await?;
		let sdf_decoder = fetch(SDF_DECODER).await?;
		let vision = fetch(CAPTION_VISION).await?;
		let text_decoder = fetch(CAPTION_DECODER).await?;
		let tokenizer = fetch(CAPTION_TOKENIZER).await?;

		let gather: Arc<dyn CoefficientGather> = Arc::new(Float32Gather);
		let models: Vec<Arc<dyn Denoiser>> = vec![
			Arc::new(OnnxDenoiser::load("base40M", base)?),
			Arc::new(OnnxDenoiser::load("upsample", upsample)?),
		];

		let mut sampler = ProgressiveSampler::new(StagePlan::image_to_point_cloud()?, models, &gather)?;
		if let Some(seed) = config.seed {
			sampler = sampler.with_seed(seed);
		}

		let bank = Self {
			device,
			generator: Arc::new(sampler),
			sdf: Arc::new(OnnxSdfModel::load(sdf_encoder, sdf_decoder)?),
			captioner: Arc::new(BlipCaptioner::load(vision, text_decoder, tokenizer)?),
		};

		info!(%device, cache_dir = %cache_dir.display(), "Model bank ready");

		Ok(bank)
	}

	/// Assemble a bank from already constructed parts
	#[must_use]
	pub fn from_parts(
		device: Device,
		generator: Arc<dyn PointCloudGenerator>,
		sdf: Arc<dyn SdfModel>,
		captioner: Arc<dyn Captioner>,
	) -> Self {
		Self {
			device,
			generator,
			sdf,
			captioner,
		}
	}

	#[must_use]
	pub const fn device(&self) -> Device {
		self.device
	}

	#[must_use]
	pub fn generator(&self) -> Arc<dyn PointCloudGenerator> {
		Arc::clone(&self.generator)
	}

	#[must_use]
	pub fn sdf(&self) -> Arc<dyn SdfModel> {
		Arc::clone(&self.sdf)
	}

	#[must_use]
	pub fn captioner(&self) -> Arc<dyn Captioner> {
		Arc::clone(&self.captioner)
	}

	/// The image to mesh pipeline over this bank's models
	#[must_use]
	pub fn image_to_mesh(&self, grid: VoxelGrid) -> ImageToMesh {
		ImageToMesh::new(self.generator(), self.sdf(), grid)
	}
}

impl fmt::Debug for ModelBank {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ModelBank")
			.field("device", &self.device)
			.finish_non_exhaustive()
	}
}
