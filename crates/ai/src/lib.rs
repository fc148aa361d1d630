//!
//! # PointForge AI
//!
//! Drives the pretrained networks behind PointForge: an image conditioned point cloud diffusion
//! model, a point cloud upsampler, a point cloud to signed distance field model and an image
//! captioner. The networks themselves are opaque ONNX graphs run through ONNX Runtime, this crate
//! owns everything around them: device selection, weight fetching, the Gaussian diffusion math,
//! progressive multi-stage sampling and turning the final point cloud into a colored mesh file.
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
#![allow(
	clippy::missing_errors_doc,
	clippy::module_name_repetitions,
	clippy::cast_possible_truncation,
	clippy::cast_precision_loss
)]


use tracing::debug;

mod caption;
mod denoiser;
pub mod device;
pub mod diffusion;
mod download;
mod error;
mod model_bank;
mod onnx;
mod pipeline;
mod sampler;
mod sdf;
mod stage;
mod utils;

pub use caption::{BlipCaptioner, Captioner};
pub use denoiser::{Denoiser, OnnxDenoiser};
pub use device::{Device, DevicePreference};
pub use error::{DiffusionError, Error};
pub use model_bank::{ModelBank, ModelBankConfig};
pub use pipeline::ImageToMesh;
pub use sampler::{PointCloudGenerator, Progress, ProgressiveSampler, SamplerStage};
pub use sdf::{OnnxSdfModel, SdfModel};
pub use stage::{KeyFilter, ModelKwargs, StageConfig, StagePlan, IMAGES_KEY, LOW_RES_KEY};

// This path must be relative to the running binary
#[cfg(target_os = "windows")]
const BINDING_LOCATION: &str = ".";

#[cfg(any(target_os = "macos", target_os = "ios"))]
const BINDING_LOCATION: &str = "../Frameworks";

#[cfg(target_os = "windows")]
const LIB_NAME: &str = "onnxruntime.dll";

#[cfg(any(target_os = "macos", target_os = "ios"))]
const LIB_NAME: &str = "libonnxruntime.dylib";

/// Commit the process wide ONNX Runtime environment with the execution providers for `device`.
///
/// Must run once, before the [`ModelBank`] creates any session.
pub fn init(device: Device) -> Result<(), Error> {
	#[cfg(any(target_os = "macos", target_os = "ios", target_os = "windows"))]
	{
		use std::path::Path;
		if std::env::var_os("ORT_DYLIB_PATH").is_none() {
			let path = utils::get_path_relative_to_exe(Path::new(BINDING_LOCATION).join(LIB_NAME));
			std::env::set_var("ORT_DYLIB_PATH", path);
		}
	}

	ort::init()
		.with_name("pointforge")
		.with_execution_providers(device.execution_providers())
		.commit()
		.map_err(Error::Init)?;

	debug!(%device, "Initialized AI environment");

	Ok(())
}
