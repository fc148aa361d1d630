use crate::{
	denoiser::Denoiser,
	diffusion::{sample_heun, CoefficientGather, GaussianDiffusion, KarrasDenoiser},
	error::{DiffusionError, Error},
	stage::{ModelKwargs, StageConfig, StagePlan, IMAGES_KEY, LOW_RES_KEY},
};

use pf_images::ImageTransform;
use pf_mesh::PointCloud;

use std::{collections::BTreeMap, ops::ControlFlow, sync::Arc};

use image::RgbImage;
use ndarray::{concatenate, Array3, ArrayView3, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::{debug, info};

/// Snapshot handed to progress callbacks after every denoising step.
///
/// `pred_xstart` is the current estimate of the stage's final samples, in model space while a
/// stage is running and in world space for the final snapshot of a stage (`step == steps`).
#[derive(Debug)]
pub struct Progress<'a> {
	pub stage: usize,
	pub stages: usize,
	pub step: usize,
	pub steps: usize,
	pub sigma: f64,
	pub pred_xstart: ArrayView3<'a, f32>,
}

/// Anything that turns an image into a colored point cloud.
pub trait PointCloudGenerator: Send + Sync {
	/// `on_progress` runs after every step, returning [`ControlFlow::Break`] aborts generation
	/// with [`Error::Cancelled`].
	fn generate(
		&self,
		image: &RgbImage,
		on_progress: &mut dyn FnMut(Progress<'_>) -> ControlFlow<()>,
	) -> Result<PointCloud, Error>;
}

/// A stage's configuration, the network that runs it and its diffusion process.
pub struct SamplerStage {
	pub config: StageConfig,
	pub model: Arc<dyn Denoiser>,
	pub diffusion: GaussianDiffusion,
}

/// Runs every stage of a [`StagePlan`] in order, each one conditioned on everything the
/// previous stages produced.
pub struct ProgressiveSampler {
	plan: StagePlan,
	stages: Vec<SamplerStage>,
	transform: ImageTransform,
	seed: Option<u64>,
}

impl ProgressiveSampler {
	pub const IMAGE_SIZE: u32 = 224;

	/// One model per stage of `plan`, in the same order. Every stage's diffusion process uses
	/// `gather` for its coefficient lookups.
	pub fn new(
		plan: StagePlan,
		models: Vec<Arc<dyn Denoiser>>,
		gather: &Arc<dyn CoefficientGather>,
	) -> Result<Self, Error> {
		if models.len() != plan.stages().len() {
			return Err(Error::InvalidStagePlan(format!(
				"{} models for {} stages",
				models.len(),
				plan.stages().len()
			)));
		}

		let stages = plan
			.stages()
			.iter()
			.zip(models)
			.map(|(config, model)| {
				Ok(SamplerStage {
					diffusion: GaussianDiffusion::new(&config.diffusion, Arc::clone(gather))?,
					config: config.clone(),
					model,
				})
			})
			.collect::<Result<Vec<_>, Error>>()?;

		Ok(Self {
			plan,
			stages,
			transform: ImageTransform::clip(Self::IMAGE_SIZE),
			seed: None,
		})
	}

	/// Draw all noise from a generator seeded with `seed`, making runs reproducible.
	#[must_use]
	pub const fn with_seed(mut self, seed: u64) -> Self {
		self.seed = Some(seed);
		self
	}

	#[must_use]
	pub const fn plan(&self) -> &StagePlan {
		&self.plan
	}

	/// Conditioning for a single image, rejects degenerate images before any sampling
	pub fn image_kwargs(&self, image: &RgbImage) -> Result<ModelKwargs, Error> {
		let mut kwargs = ModelKwargs::default();
		kwargs.insert(IMAGES_KEY, self.transform.apply(image)?.into_dyn());
		Ok(kwargs)
	}

	/// Sample every stage, returning `[batch, channels, total_points]` in world space.
	///
	/// Each stage sees the subset of `kwargs` its key filter allows, plus the output of all
	/// previous stages under `low_res`. Its own points are appended after those.
	pub fn sample_batch_progressive(
		&self,
		kwargs: &ModelKwargs,
		batch_size: usize,
		rng: &mut (impl Rng + ?Sized),
		on_progress: &mut dyn FnMut(Progress<'_>) -> ControlFlow<()>,
	) -> Result<Array3<f32>, Error> {
		let channels = self.plan.num_channels();
		let stage_count = self.stages.len();
		let mut samples: Option<Array3<f32>> = None;

		for (index, stage) in self.stages.iter().enumerate() {
			let mut stage_kwargs = kwargs.filtered(&stage.config.key_filter);
			if let Some(low_res) = &samples {
				stage_kwargs.insert(LOW_RES_KEY, low_res.clone().into_dyn());
			}

			debug!(
				stage = %stage.config.name,
				points = stage.config.num_points,
				steps = stage.config.karras.steps,
				kwargs = ?stage_kwargs.keys().collect::<Vec<_>>(),
				"Sampling stage"
			);

			let denoiser = KarrasDenoiser::new(
				&stage.diffusion,
				stage.model.as_ref(),
				stage_kwargs,
				stage.config.guidance_scale,
			)?;

			let sigmas = stage.config.karras.sigmas();
			let steps = sigmas.len() - 1;
			let sigma_max = stage.config.karras.sigma_max as f32;
			let x_t = Array3::from_shape_simple_fn(
				(batch_size, channels, stage.config.num_points),
				|| rng.sample::<f32, _>(StandardNormal) * sigma_max,
			);

			let mut x = sample_heun(
				|x, sigma| denoiser.denoise(x, sigma),
				x_t,
				&sigmas,
				stage.config.karras.s_churn,
				rng,
				|step| {
					if step.pred_xstart.iter().any(|v| !v.is_finite()) {
						return Err(DiffusionError::NonFinite {
							stage: index,
							step: step.index,
						}
						.into());
					}

					match on_progress(Progress {
						stage: index,
						stages: stage_count,
						step: step.index,
						steps,
						sigma: step.sigma,
						pred_xstart: step.pred_xstart,
					}) {
						ControlFlow::Continue(()) => Ok(()),
						ControlFlow::Break(()) => Err(Error::Cancelled),
					}
				},
			)?;

			if x.iter().any(|v| !v.is_finite()) {
				return Err(DiffusionError::NonFinite { stage: index, step: steps }.into());
			}

			stage.diffusion.unscale_channels(&mut x)?;

			if on_progress(Progress {
				stage: index,
				stages: stage_count,
				step: steps,
				steps,
				sigma: 0.0,
				pred_xstart: x.view(),
			})
			.is_break()
			{
				return Err(Error::Cancelled);
			}

			samples = Some(match samples {
				Some(low_res) => concatenate(Axis(2), &[low_res.view(), x.view()])?,
				None => x,
			});
		}

		samples.ok_or_else(|| Error::InvalidStagePlan("no stages to sample".to_string()))
	}

	/// First cloud of a `[batch, channels, points]` sample: `xyz` then one channel per
	/// auxiliary channel of the plan.
	pub fn output_to_point_cloud(&self, samples: ArrayView3<'_, f32>) -> Result<PointCloud, Error> {
		let channels = self.plan.num_channels();
		if samples.shape()[0] == 0 || samples.shape()[1] != channels {
			return Err(Error::InvalidInput(format!(
				"expected samples shaped [batch >= 1, {channels}, points], got {:?}",
				samples.shape()
			)));
		}

		let cloud = samples.index_axis(Axis(0), 0);

		let coords = cloud
			.axis_iter(Axis(1))
			.map(|point| [point[0], point[1], point[2]])
			.collect();

		let aux = self
			.plan
			.aux_channels()
			.iter()
			.enumerate()
			.map(|(i, name)| (name.clone(), cloud.row(3 + i).to_vec()))
			.collect::<BTreeMap<_, _>>();

		Ok(PointCloud::new(coords, aux)?)
	}
}

impl PointCloudGenerator for ProgressiveSampler {
	fn generate(
		&self,
		image: &RgbImage,
		on_progress: &mut dyn FnMut(Progress<'_>) -> ControlFlow<()>,
	) -> Result<PointCloud, Error> {
		let kwargs = self.image_kwargs(image)?;

		let mut rng = self
			.seed
			.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);

		let samples = self.sample_batch_progressive(&kwargs, 1, &mut rng, on_progress)?;
		let cloud = self.output_to_point_cloud(samples.view())?;

		info!(points = cloud.len(), "Generated point cloud");

		Ok(cloud)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::diffusion::Float32Gather;

	use std::sync::Mutex;

	use image::Rgb;
	use ndarray::ArrayView1;

	/// Predicts zero noise and remembers what it was conditioned on
	#[derive(Default)]
	struct FakeDenoiser {
		calls: Mutex<Vec<(Vec<usize>, Vec<(String, Vec<usize>)>)>>,
		output: Option<f32>,
	}

	impl Denoiser for FakeDenoiser {
		fn forward(
			&self,
			x: ArrayView3<'_, f32>,
			_t: ArrayView1<'_, i64>,
			kwargs: &ModelKwargs,
		) -> Result<Array3<f32>, Error> {
			self.calls.lock().unwrap().push((
				x.shape().to_vec(),
				kwargs
					.iter()
					.map(|(key, value)| (key.to_string(), value.shape().to_vec()))
					.collect(),
			));
			Ok(Array3::from_elem(x.raw_dim(), self.output.unwrap_or(0.0)))
		}
	}

	fn small_plan() -> StagePlan {
		let mut base = StageConfig::base();
		base.num_points = 4;
		base.karras.steps = 3;

		let mut upsample = StageConfig::upsample();
		upsample.num_points = 4;
		upsample.karras.steps = 2;

		StagePlan::new(
			vec![base, upsample],
			["R", "G", "B"].map(ToString::to_string).to_vec(),
			8,
		)
		.unwrap()
	}

	fn sampler(base: &Arc<FakeDenoiser>, upsample: &Arc<FakeDenoiser>) -> ProgressiveSampler {
		let gather: Arc<dyn CoefficientGather> = Arc::new(Float32Gather);
		ProgressiveSampler::new(
			small_plan(),
			vec![
				Arc::clone(base) as Arc<dyn Denoiser>,
				Arc::clone(upsample) as Arc<dyn Denoiser>,
			],
			&gather,
		)
		.unwrap()
		.with_seed(42)
	}

	fn image() -> RgbImage {
		RgbImage::from_pixel(32, 24, Rgb([200, 30, 90]))
	}

	#[test]
	fn stages_are_conditioned_progressively() {
		let (base, upsample) = (Arc::new(FakeDenoiser::default()), Arc::new(FakeDenoiser::default()));
		let sampler = sampler(&base, &upsample);

		let mut snapshots = Vec::new();
		let cloud = sampler
			.generate(&image(), &mut |progress| {
				snapshots.push((progress.stage, progress.step, progress.pred_xstart.shape()[2]));
				ControlFlow::Continue(())
			})
			.unwrap();

		// Coarse stage only ever sees the image
		for (shape, kwargs) in base.calls.lock().unwrap().iter() {
			assert_eq!(shape, &vec![1, 6, 4]);
			assert_eq!(kwargs, &vec![(IMAGES_KEY.to_string(), vec![1, 3, 224, 224])]);
		}

		// The upsampler only ever sees the coarse cloud
		let upsample_calls = upsample.calls.lock().unwrap();
		assert!(!upsample_calls.is_empty());
		for (shape, kwargs) in upsample_calls.iter() {
			assert_eq!(shape, &vec![1, 6, 4]);
			assert_eq!(kwargs, &vec![(LOW_RES_KEY.to_string(), vec![1, 6, 4])]);
		}

		// Every step plus one final snapshot per stage
		assert_eq!(snapshots.len(), 3 + 1 + 2 + 1);
		assert_eq!(snapshots.last(), Some(&(1, 2, 4)));

		// Clipped predictions keep everything inside the unscaled model range
		assert_eq!(cloud.len(), 8);
		let colors = cloud.colors().unwrap();
		for (coords, color) in cloud.coords().iter().zip(colors) {
			assert!(coords.iter().all(|c| c.abs() <= 0.5 + 1e-4));
			assert!(color.iter().all(|c| (-1e-2..=255.01).contains(c)));
		}
	}

	#[test]
	fn non_finite_predictions_abort() {
		let base = Arc::new(FakeDenoiser {
			output: Some(f32::NAN),
			..Default::default()
		});
		let upsample = Arc::new(FakeDenoiser::default());

		let err = sampler(&base, &upsample)
			.generate(&image(), &mut |_| ControlFlow::Continue(()))
			.unwrap_err();

		assert!(matches!(
			err,
			Error::Diffusion(DiffusionError::NonFinite { stage: 0, step: 0 })
		));
		assert!(upsample.calls.lock().unwrap().is_empty());
	}

	#[test]
	fn breaking_from_progress_cancels() {
		let (base, upsample) = (Arc::new(FakeDenoiser::default()), Arc::new(FakeDenoiser::default()));

		let err = sampler(&base, &upsample)
			.generate(&image(), &mut |progress| {
				if progress.stage == 1 {
					ControlFlow::Break(())
				} else {
					ControlFlow::Continue(())
				}
			})
			.unwrap_err();

		assert!(matches!(err, Error::Cancelled));
	}

	#[test]
	fn degenerate_images_are_rejected_before_sampling() {
		let (base, upsample) = (Arc::new(FakeDenoiser::default()), Arc::new(FakeDenoiser::default()));

		let err = sampler(&base, &upsample)
			.generate(&RgbImage::new(0, 0), &mut |_| ControlFlow::Continue(()))
			.unwrap_err();

		assert!(matches!(err, Error::Image(_)));
		assert!(base.calls.lock().unwrap().is_empty());
	}

	#[test]
	fn seeded_runs_are_reproducible() {
		let noisy = || {
			Arc::new(FakeDenoiser {
				output: Some(0.3),
				..Default::default()
			})
		};

		let first = sampler(&noisy(), &noisy())
			.generate(&image(), &mut |_| ControlFlow::Continue(()))
			.unwrap();
		let second = sampler(&noisy(), &noisy())
			.generate(&image(), &mut |_| ControlFlow::Continue(()))
			.unwrap();

		assert_eq!(first, second);
	}
}
