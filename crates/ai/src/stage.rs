use crate::{
	diffusion::{DiffusionConfig, KarrasConfig},
	error::Error,
};

use std::{
	collections::{BTreeMap, BTreeSet},
	convert::Infallible,
	fmt,
	str::FromStr,
};

use ndarray::{concatenate, ArrayD, Axis};
use serde::{Deserialize, Serialize};

/// Conditioning key holding the preprocessed input image
pub const IMAGES_KEY: &str = "images";
/// Conditioning key holding the previous stage's samples
pub const LOW_RES_KEY: &str = "low_res";

/// Which conditioning keys a stage gets to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyFilter {
	All,
	Only(BTreeSet<String>),
}

impl KeyFilter {
	#[must_use]
	pub fn allows(&self, key: &str) -> bool {
		match self {
			Self::All => true,
			Self::Only(keys) => keys.contains(key),
		}
	}
}

/// `*` lets everything through, anything else is a comma separated list of keys. The empty
/// string lets nothing through.
impl FromStr for KeyFilter {
	type Err = Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s == "*" {
			return Ok(Self::All);
		}

		Ok(Self::Only(
			s.split(',')
				.map(str::trim)
				.filter(|key| !key.is_empty())
				.map(ToString::to_string)
				.collect(),
		))
	}
}

impl fmt::Display for KeyFilter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::All => f.write_str("*"),
			Self::Only(keys) => {
				f.write_str(&keys.iter().map(String::as_str).collect::<Vec<_>>().join(","))
			}
		}
	}
}

/// Named conditioning tensors, every one of them batch major.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelKwargs(BTreeMap<String, ArrayD<f32>>);

impl ModelKwargs {
	pub fn insert(&mut self, key: impl Into<String>, value: ArrayD<f32>) -> Option<ArrayD<f32>> {
		self.0.insert(key.into(), value)
	}

	#[must_use]
	pub fn get(&self, key: &str) -> Option<&ArrayD<f32>> {
		self.0.get(key)
	}

	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.0.keys().map(String::as_str)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f32>)> {
		self.0.iter().map(|(key, value)| (key.as_str(), value))
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Copy of the entries `filter` lets through
	#[must_use]
	pub fn filtered(&self, filter: &KeyFilter) -> Self {
		Self(
			self.0
				.iter()
				.filter(|(key, _)| filter.allows(key))
				.map(|(key, value)| (key.clone(), value.clone()))
				.collect(),
		)
	}

	/// Every entry followed by an all zero copy of itself along the batch axis, the second half
	/// of the batch is the unconditional one.
	pub fn with_unconditional(&self) -> Result<Self, Error> {
		self.0
			.iter()
			.map(|(key, value)| {
				let zeros = ArrayD::zeros(value.raw_dim());
				let doubled = concatenate(Axis(0), &[value.view(), zeros.view()])?;
				Ok::<_, Error>((key.clone(), doubled))
			})
			.collect::<Result<BTreeMap<_, _>, _>>()
			.map(Self)
	}
}

/// One diffusion pass of a progressive sampling run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
	pub name: String,
	/// Points this stage adds on top of all previous stages
	pub num_points: usize,
	pub guidance_scale: f32,
	pub key_filter: KeyFilter,
	pub karras: KarrasConfig,
	pub diffusion: DiffusionConfig,
}

impl StageConfig {
	/// Image conditioned coarse generator
	#[must_use]
	pub fn base() -> Self {
		Self {
			name: "base40M".to_string(),
			num_points: 1024,
			guidance_scale: 0.0,
			key_filter: KeyFilter::Only(BTreeSet::from([IMAGES_KEY.to_string()])),
			karras: KarrasConfig {
				steps: 64,
				sigma_min: 1e-3,
				sigma_max: 120.0,
				rho: 7.0,
				s_churn: 3.0,
			},
			diffusion: DiffusionConfig::point_cloud_rgb(),
		}
	}

	/// Upsampler, conditioned on the coarse cloud only
	#[must_use]
	pub fn upsample() -> Self {
		Self {
			name: "upsample".to_string(),
			num_points: 3072,
			guidance_scale: 0.0,
			key_filter: KeyFilter::Only(BTreeSet::new()),
			karras: KarrasConfig {
				steps: 64,
				sigma_min: 1e-3,
				sigma_max: 160.0,
				rho: 7.0,
				s_churn: 0.0,
			},
			diffusion: DiffusionConfig::point_cloud_rgb(),
		}
	}
}

/// Validated sequence of stages.
///
/// Point counts add up to the requested total, every stage works on `xyz` plus the same
/// auxiliary channels and only the first stage may see the input image.
#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
	stages: Vec<StageConfig>,
	aux_channels: Vec<String>,
}

impl StagePlan {
	pub fn new(
		stages: Vec<StageConfig>,
		aux_channels: Vec<String>,
		total_points: usize,
	) -> Result<Self, Error> {
		if stages.is_empty() {
			return Err(Error::InvalidStagePlan("at least one stage is required".to_string()));
		}

		for (index, stage) in stages.iter().enumerate() {
			if stage.num_points == 0 {
				return Err(Error::InvalidStagePlan(format!(
					"stage '{}' must produce at least one point",
					stage.name
				)));
			}

			if stage.karras.steps == 0 {
				return Err(Error::InvalidStagePlan(format!(
					"stage '{}' must run at least one step",
					stage.name
				)));
			}

			if !(stage.karras.sigma_min > 0.0 && stage.karras.sigma_min < stage.karras.sigma_max) {
				return Err(Error::InvalidStagePlan(format!(
					"stage '{}' needs 0 < sigma_min < sigma_max",
					stage.name
				)));
			}

			let channels = stage.diffusion.channel_scales.len();
			if channels != 3 + aux_channels.len() {
				return Err(Error::InvalidStagePlan(format!(
					"stage '{}' has {channels} channels, expected xyz plus {}",
					stage.name,
					aux_channels.len()
				)));
			}

			if index > 0 && stage.key_filter.allows(IMAGES_KEY) {
				return Err(Error::InvalidStagePlan(format!(
					"stage '{}' must not be conditioned on '{IMAGES_KEY}'",
					stage.name
				)));
			}
		}

		let sum = stages.iter().map(|stage| stage.num_points).sum::<usize>();
		if sum != total_points {
			return Err(Error::InvalidStagePlan(format!(
				"stage point counts add up to {sum}, expected {total_points}"
			)));
		}

		Ok(Self {
			stages,
			aux_channels,
		})
	}

	/// Coarse generator followed by the upsampler, colored points
	pub fn image_to_point_cloud() -> Result<Self, Error> {
		Self::new(
			vec![StageConfig::base(), StageConfig::upsample()],
			["R", "G", "B"].map(ToString::to_string).to_vec(),
			4096,
		)
	}

	#[must_use]
	pub fn stages(&self) -> &[StageConfig] {
		&self.stages
	}

	#[must_use]
	pub fn aux_channels(&self) -> &[String] {
		&self.aux_channels
	}

	#[must_use]
	pub fn total_points(&self) -> usize {
		self.stages.iter().map(|stage| stage.num_points).sum()
	}

	#[must_use]
	pub fn num_channels(&self) -> usize {
		3 + self.aux_channels.len()
	}
}
