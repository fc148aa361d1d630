use super::schedule::GaussianDiffusion;
use crate::{
	denoiser::Denoiser,
	error::{DiffusionError, Error},
	stage::ModelKwargs,
};

use std::f64::consts::SQRT_2;

use ndarray::{concatenate, s, Array1, Array3, ArrayView3, Axis};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Noise levels and churn of a Karras et al. (2022) sampling run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KarrasConfig {
	pub steps: usize,
	pub sigma_min: f64,
	pub sigma_max: f64,
	pub rho: f64,
	pub s_churn: f64,
}

impl KarrasConfig {
	#[must_use]
	pub fn sigmas(&self) -> Vec<f64> {
		karras_sigmas(self.steps, self.sigma_min, self.sigma_max, self.rho)
	}
}

/// `steps` noise levels from `sigma_max` down to `sigma_min`, evenly spaced in `sigma^(1/rho)`,
/// followed by a final `0.0`.
#[must_use]
pub fn karras_sigmas(steps: usize, sigma_min: f64, sigma_max: f64, rho: f64) -> Vec<f64> {
	let (min_inv_rho, max_inv_rho) = (sigma_min.powf(rho.recip()), sigma_max.powf(rho.recip()));

	let mut sigmas = (0..steps)
		.map(|i| {
			let ramp = if steps > 1 {
				i as f64 / (steps - 1) as f64
			} else {
				0.0
			};
			ramp.mul_add(min_inv_rho - max_inv_rho, max_inv_rho).powf(rho)
		})
		.collect::<Vec<_>>();

	sigmas.push(0.0);
	sigmas
}

/// Wraps an epsilon predicting network so it can be driven by continuous noise levels.
///
/// Every call maps `sigma` back onto the nearest discrete timestep of the diffusion schedule,
/// scales the input by `1 / sqrt(sigma² + 1)` and turns the predicted noise into a clipped
/// `x_0` estimate. When the guidance scale is neither `0` nor `1`, the batch is evaluated twice,
/// once with the real conditioning and once with all of it zeroed, and the two estimates are
/// blended.
pub struct KarrasDenoiser<'a> {
	diffusion: &'a GaussianDiffusion,
	model: &'a dyn Denoiser,
	kwargs: ModelKwargs,
	guidance_scale: f32,
}

impl<'a> KarrasDenoiser<'a> {
	pub fn new(
		diffusion: &'a GaussianDiffusion,
		model: &'a dyn Denoiser,
		kwargs: ModelKwargs,
		guidance_scale: f32,
	) -> Result<Self, Error> {
		let guided = is_guided(guidance_scale);

		Ok(Self {
			diffusion,
			model,
			kwargs: if guided {
				kwargs.with_unconditional()?
			} else {
				kwargs
			},
			guidance_scale,
		})
	}

	/// Discrete timestep for a continuous noise level: `1 / (sigma² + 1)` linearly
	/// interpolated over the `alpha_bar` table, truncated towards zero.
	#[must_use]
	pub fn sigma_to_t(&self, sigma: f64) -> i64 {
		let alpha_bar = sigma.mul_add(sigma, 1.0).recip();
		let table = self.diffusion.alphas_cumprod();

		let (Some(&first), Some(&last)) = (table.first(), table.last()) else {
			return 0;
		};

		if alpha_bar.is_nan() || alpha_bar >= first {
			return 0;
		}
		if alpha_bar <= last {
			return (table.len() - 1) as i64;
		}

		// Decreasing table, `upper` is the first entry below `alpha_bar`
		let upper = table.partition_point(|&value| value >= alpha_bar);
		let lower = upper - 1;
		let fraction = (table[lower] - alpha_bar) / (table[lower] - table[upper]);

		(lower as f64 + fraction) as i64
	}

	pub fn denoise(&self, x_t: ArrayView3<'_, f32>, sigma: f64) -> Result<Array3<f32>, Error> {
		if !is_guided(self.guidance_scale) {
			return self.denoise_batch(x_t, sigma);
		}

		let batch = x_t.len_of(Axis(0));
		let doubled = concatenate(Axis(0), &[x_t, x_t])?;
		let x_0 = self.denoise_batch(doubled.view(), sigma)?;
		let (cond, uncond) = x_0.view().split_at(Axis(0), batch);

		Ok(&uncond + &((&cond - &uncond) * self.guidance_scale))
	}

	fn denoise_batch(&self, x_t: ArrayView3<'_, f32>, sigma: f64) -> Result<Array3<f32>, Error> {
		let channels = self.diffusion.num_channels();
		if x_t.len_of(Axis(1)) != channels {
			return Err(DiffusionError::ChannelMismatch {
				expected: channels,
				actual: x_t.len_of(Axis(1)),
			}
			.into());
		}

		let t = Array1::from_elem(x_t.len_of(Axis(0)), self.sigma_to_t(sigma));
		let c_in = sigma.mul_add(sigma, 1.0).sqrt().recip() as f32;
		let x_in = &x_t * c_in;

		let output = self.model.forward(x_in.view(), t.view(), &self.kwargs)?;

		// Learned variance, when present, fills the second half of the channels
		let out_channels = output.len_of(Axis(1));
		if out_channels != channels && out_channels != 2 * channels {
			return Err(DiffusionError::ChannelMismatch {
				expected: channels,
				actual: out_channels,
			}
			.into());
		}

		let eps = output.slice(s![.., ..channels, ..]);
		Ok(self
			.diffusion
			.predict_xstart_from_eps(x_in.view(), t.view(), eps)?)
	}
}

fn is_guided(guidance_scale: f32) -> bool {
	guidance_scale.abs() > f32::EPSILON && (guidance_scale - 1.0).abs() > f32::EPSILON
}

/// State handed out once per sampling step.
#[derive(Debug)]
pub struct HeunStep<'a> {
	pub index: usize,
	pub sigma: f64,
	pub pred_xstart: ArrayView3<'a, f32>,
}

/// Heun's second order sampler (Karras et al. 2022, algorithm 2) over a decreasing `sigmas`
/// sequence ending in `0.0`.
///
/// `denoise` maps `(x, sigma)` to an `x_0` estimate, `on_step` sees every intermediate
/// estimate and aborts sampling by returning an error. Returns the final sample.
pub fn sample_heun<R, D, S>(
	mut denoise: D,
	mut x: Array3<f32>,
	sigmas: &[f64],
	s_churn: f64,
	rng: &mut R,
	mut on_step: S,
) -> Result<Array3<f32>, Error>
where
	R: Rng + ?Sized,
	D: FnMut(ArrayView3<'_, f32>, f64) -> Result<Array3<f32>, Error>,
	S: FnMut(HeunStep<'_>) -> Result<(), Error>,
{
	let steps = sigmas.len().saturating_sub(1);
	let gamma = if steps == 0 {
		0.0
	} else {
		(s_churn / steps as f64).min(SQRT_2 - 1.0)
	};

	for (index, window) in sigmas.windows(2).enumerate() {
		let (sigma, next) = (window[0], window[1]);
		let sigma_hat = sigma * (gamma + 1.0);

		if gamma > 0.0 {
			let churn = sigma_hat.mul_add(sigma_hat, -(sigma * sigma)).sqrt() as f32;
			x.mapv_inplace(|v| rng.sample::<f32, _>(StandardNormal).mul_add(churn, v));
		}

		let denoised = denoise(x.view(), sigma_hat)?;
		on_step(HeunStep {
			index,
			sigma,
			pred_xstart: denoised.view(),
		})?;

		let d = (&x - &denoised) / sigma_hat as f32;
		let dt = (next - sigma_hat) as f32;

		if next <= 0.0 {
			x.scaled_add(dt, &d);
		} else {
			let x_2 = &x + &(&d * dt);
			let denoised_2 = denoise(x_2.view(), next)?;
			let d_2 = (&x_2 - &denoised_2) / next as f32;
			x.scaled_add(dt, &((&d + &d_2) * 0.5));
		}
	}

	Ok(x)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::diffusion::{DiffusionConfig, Float32Gather};

	use std::sync::{Arc, Mutex};

	use ndarray::{ArrayD, ArrayView1, IxDyn};
	use rand::{rngs::StdRng, SeedableRng};

	#[derive(Default)]
	struct RecordingDenoiser {
		calls: Mutex<Vec<(usize, Vec<i64>, Option<ArrayD<f32>>)>>,
	}

	impl Denoiser for RecordingDenoiser {
		fn forward(
			&self,
			x: ArrayView3<'_, f32>,
			t: ArrayView1<'_, i64>,
			kwargs: &ModelKwargs,
		) -> Result<Array3<f32>, Error> {
			self.calls.lock().unwrap().push((
				x.len_of(Axis(0)),
				t.to_vec(),
				kwargs.get("images").cloned(),
			));
			Ok(Array3::zeros(x.raw_dim()))
		}
	}

	fn diffusion() -> GaussianDiffusion {
		GaussianDiffusion::new(&DiffusionConfig::point_cloud_rgb(), Arc::new(Float32Gather)).unwrap()
	}

	#[test]
	fn sigmas_run_from_max_to_min_then_zero() {
		let sigmas = karras_sigmas(64, 1e-3, 120.0, 7.0);

		assert_eq!(sigmas.len(), 65);
		assert!((sigmas[0] - 120.0).abs() < 1e-9);
		assert!((sigmas[63] - 1e-3).abs() < 1e-12);
		assert_eq!(sigmas[64], 0.0);
		assert!(sigmas.windows(2).all(|w| w[0] > w[1]));
	}

	#[test]
	fn sigma_to_t_interpolates_and_clamps() {
		let diffusion = diffusion();
		let model = RecordingDenoiser::default();
		let denoiser = KarrasDenoiser::new(&diffusion, &model, ModelKwargs::default(), 0.0).unwrap();

		assert_eq!(denoiser.sigma_to_t(1e-9), 0);
		assert_eq!(denoiser.sigma_to_t(1e9), 1023);

		let sigma_at = |alpha_bar: f64| (alpha_bar.recip() - 1.0).sqrt();
		let alphas = diffusion.alphas_cumprod();

		// Linear in alpha_bar, not in log sigma
		let quarter = 0.75f64.mul_add(alphas[500], 0.25 * alphas[501]);
		assert_eq!(denoiser.sigma_to_t(sigma_at(quarter)), 500);
		let nearly_next = 0.01f64.mul_add(alphas[700], 0.99 * alphas[701]);
		assert_eq!(denoiser.sigma_to_t(sigma_at(nearly_next)), 700);
		assert_eq!(denoiser.sigma_to_t(0.0), 0);
		assert_eq!(denoiser.sigma_to_t(f64::NAN), 0);
	}

	#[test]
	fn guidance_doubles_batch_with_zeroed_conditioning() {
		let diffusion = diffusion();
		let model = RecordingDenoiser::default();
		let mut kwargs = ModelKwargs::default();
		kwargs.insert("images", ArrayD::ones(IxDyn(&[1, 3, 2, 2])));

		let denoiser = KarrasDenoiser::new(&diffusion, &model, kwargs, 3.0).unwrap();
		let x_0 = denoiser
			.denoise(Array3::zeros((1, 6, 5)).view(), 10.0)
			.unwrap();
		assert_eq!(x_0.shape(), &[1, 6, 5]);

		let calls = model.calls.lock().unwrap();
		assert_eq!(calls.len(), 1);
		let (batch, t, images) = &calls[0];
		assert_eq!(*batch, 2);
		assert_eq!(t[0], t[1]);

		let images = images.as_ref().unwrap();
		assert_eq!(images.shape(), &[2, 3, 2, 2]);
		assert!(images.index_axis(Axis(0), 0).iter().all(|&v| v == 1.0));
		assert!(images.index_axis(Axis(0), 1).iter().all(|&v| v == 0.0));
	}

	#[test]
	fn unguided_runs_a_single_pass() {
		let diffusion = diffusion();
		let model = RecordingDenoiser::default();
		let denoiser = KarrasDenoiser::new(&diffusion, &model, ModelKwargs::default(), 0.0).unwrap();

		denoiser
			.denoise(Array3::zeros((1, 6, 5)).view(), 10.0)
			.unwrap();

		assert_eq!(model.calls.lock().unwrap()[0].0, 1);
	}

	#[test]
	fn heun_converges_on_a_perfect_denoiser() {
		let target = Array3::from_elem((1, 6, 8), 0.25_f32);
		let sigmas = karras_sigmas(16, 1e-3, 80.0, 7.0);
		let mut rng = StdRng::seed_from_u64(7);
		let x_t = Array3::from_elem((1, 6, 8), 80.0_f32);
		let mut steps = 0;

		let x = sample_heun(
			|_, _| Ok(target.clone()),
			x_t,
			&sigmas,
			3.0,
			&mut rng,
			|step| {
				assert_eq!(step.index, steps);
				steps += 1;
				Ok(())
			},
		)
		.unwrap();

		assert_eq!(steps, 16);
		assert!(x.iter().all(|v| (v - 0.25).abs() < 1e-4));
	}

	#[test]
	fn step_errors_abort_sampling() {
		let sigmas = karras_sigmas(8, 1e-3, 80.0, 7.0);
		let mut rng = StdRng::seed_from_u64(7);
		let mut denoise_calls = 0;

		let err = sample_heun(
			|x, _| {
				denoise_calls += 1;
				Ok(x.to_owned())
			},
			Array3::zeros((1, 6, 2)),
			&sigmas,
			0.0,
			&mut rng,
			|step| {
				if step.index == 2 {
					Err(Error::Cancelled)
				} else {
					Ok(())
				}
			},
		)
		.unwrap_err();

		assert!(matches!(err, Error::Cancelled));
		// Two full Heun steps, then the first evaluation of the third
		assert_eq!(denoise_calls, 5);
	}
}
