use super::gather::CoefficientGather;
use crate::error::DiffusionError;

use std::{f64::consts::FRAC_PI_2, sync::Arc};

use ndarray::{Array3, ArrayView1, ArrayView3, Axis, Ix3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseSchedule {
	Linear,
	Cosine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffusionConfig {
	pub timesteps: usize,
	pub schedule: NoiseSchedule,
	/// Maps world space channels to model space: `x * scale + bias`
	pub channel_scales: Vec<f32>,
	pub channel_biases: Vec<f32>,
}

impl DiffusionConfig {
	/// xyz in roughly `[-0.5, 0.5]` and 8-bit RGB, both mapped onto `[-1, 1]`
	#[must_use]
	pub fn point_cloud_rgb() -> Self {
		Self {
			timesteps: 1024,
			schedule: NoiseSchedule::Cosine,
			channel_scales: vec![2.0, 2.0, 2.0, 2.0 / 255.0, 2.0 / 255.0, 2.0 / 255.0],
			channel_biases: vec![0.0, 0.0, 0.0, -1.0, -1.0, -1.0],
		}
	}
}

/// Coefficient tables of a discrete Gaussian diffusion process plus the gather strategy used to
/// apply them to batches.
#[derive(Debug)]
pub struct GaussianDiffusion {
	alphas_cumprod: Vec<f64>,
	sqrt_recip_alphas_cumprod: Vec<f64>,
	sqrt_recipm1_alphas_cumprod: Vec<f64>,
	channel_scales: Vec<f32>,
	channel_biases: Vec<f32>,
	gather: Arc<dyn CoefficientGather>,
}

impl GaussianDiffusion {
	pub fn new(
		config: &DiffusionConfig,
		gather: Arc<dyn CoefficientGather>,
	) -> Result<Self, DiffusionError> {
		if config.timesteps == 0 {
			return Err(DiffusionError::InvalidSchedule("at least one timestep is required"));
		}

		if config.channel_scales.len() != config.channel_biases.len() {
			return Err(DiffusionError::ChannelMismatch {
				expected: config.channel_scales.len(),
				actual: config.channel_biases.len(),
			});
		}

		let betas = match config.schedule {
			NoiseSchedule::Linear => linear_betas(config.timesteps),
			NoiseSchedule::Cosine => cosine_betas(config.timesteps),
		};

		let alphas_cumprod = betas
			.iter()
			.scan(1.0, |product, beta| {
				*product *= 1.0 - beta;
				Some(*product)
			})
			.collect::<Vec<f64>>();

		Ok(Self {
			sqrt_recip_alphas_cumprod: alphas_cumprod.iter().map(|a| (1.0 / a).sqrt()).collect(),
			sqrt_recipm1_alphas_cumprod: alphas_cumprod
				.iter()
				.map(|a| (1.0 / a - 1.0).sqrt())
				.collect(),
			alphas_cumprod,
			channel_scales: config.channel_scales.clone(),
			channel_biases: config.channel_biases.clone(),
			gather,
		})
	}

	#[must_use]
	pub fn num_timesteps(&self) -> usize {
		self.alphas_cumprod.len()
	}

	#[must_use]
	pub fn num_channels(&self) -> usize {
		self.channel_scales.len()
	}

	/// `alpha_bar` of every discrete timestep, decreasing with `t`
	#[must_use]
	pub fn alphas_cumprod(&self) -> &[f64] {
		&self.alphas_cumprod
	}

	/// Noise level of every discrete timestep, `sqrt(1 / alpha_bar - 1)`, increasing with `t`
	#[must_use]
	pub fn sigmas(&self) -> &[f64] {
		&self.sqrt_recipm1_alphas_cumprod
	}

	/// Recover `x_0` from a noisy `x_t` and the predicted noise, clipped to `[-1, 1]`.
	pub fn predict_xstart_from_eps(
		&self,
		x_t: ArrayView3<'_, f32>,
		timesteps: ArrayView1<'_, i64>,
		eps: ArrayView3<'_, f32>,
	) -> Result<Array3<f32>, DiffusionError> {
		if x_t.shape() != eps.shape() {
			return Err(DiffusionError::Broadcast {
				from: eps.shape().to_vec(),
				to: x_t.shape().to_vec(),
			});
		}

		let shape = x_t.shape();
		let recip = self
			.gather
			.gather(&self.sqrt_recip_alphas_cumprod, timesteps, shape)?;
		let recipm1 = self
			.gather
			.gather(&self.sqrt_recipm1_alphas_cumprod, timesteps, shape)?;

		let pred = recip * &x_t.into_dyn() - recipm1 * &eps.into_dyn();

		pred.mapv(|v| v.clamp(-1.0, 1.0))
			.into_dimensionality::<Ix3>()
			.map_err(|_| DiffusionError::Broadcast {
				from: shape.to_vec(),
				to: shape.to_vec(),
			})
	}

	/// World space to model space, in place
	pub fn scale_channels(&self, x: &mut Array3<f32>) -> Result<(), DiffusionError> {
		self.check_channels(x.len_of(Axis(1)))?;
		for (channel, mut values) in x.axis_iter_mut(Axis(1)).enumerate() {
			let (scale, bias) = (self.channel_scales[channel], self.channel_biases[channel]);
			values.mapv_inplace(|v| v.mul_add(scale, bias));
		}
		Ok(())
	}

	/// Model space back to world space, in place
	pub fn unscale_channels(&self, x: &mut Array3<f32>) -> Result<(), DiffusionError> {
		self.check_channels(x.len_of(Axis(1)))?;
		for (channel, mut values) in x.axis_iter_mut(Axis(1)).enumerate() {
			let (scale, bias) = (self.channel_scales[channel], self.channel_biases[channel]);
			values.mapv_inplace(|v| (v - bias) / scale);
		}
		Ok(())
	}

	fn check_channels(&self, actual: usize) -> Result<(), DiffusionError> {
		if actual == self.num_channels() {
			Ok(())
		} else {
			Err(DiffusionError::ChannelMismatch {
				expected: self.num_channels(),
				actual,
			})
		}
	}
}

/// Linear schedule, rescaled so any number of steps spans the same noise range as 1000.
fn linear_betas(timesteps: usize) -> Vec<f64> {
	let scale = 1000.0 / timesteps as f64;
	let (start, end) = (scale * 0.0001, scale * 0.02);

	if timesteps == 1 {
		return vec![start];
	}

	(0..timesteps)
		.map(|i| start + (end - start) * i as f64 / (timesteps - 1) as f64)
		.collect()
}

/// Cosine schedule from "Improved Denoising Diffusion Probabilistic Models".
fn cosine_betas(timesteps: usize) -> Vec<f64> {
	const MAX_BETA: f64 = 0.999;

	let alpha_bar = |t: f64| ((t + 0.008) / 1.008 * FRAC_PI_2).cos().powi(2);

	(0..timesteps)
		.map(|i| {
			let (t1, t2) = (
				i as f64 / timesteps as f64,
				(i + 1) as f64 / timesteps as f64,
			);
			(1.0 - alpha_bar(t2) / alpha_bar(t1)).min(MAX_BETA)
		})
		.collect()
}
