use crate::{
	error::Error,
	onnx::{Input, OnnxModel},
};

use pf_mesh::{PointCloud, VoxelGrid};

use std::{
	borrow::Cow,
	path::Path,
	sync::atomic::{AtomicBool, Ordering},
};

use ndarray::{Array3, ArrayD};
use tracing::debug;

/// Signed distance field conditioned on a point cloud, positive inside the surface.
pub trait SdfModel: Send + Sync {
	/// Sample the field at every point of `grid`, in flat index order. Gives up with
	/// [`Error::Cancelled`] as soon as `cancel` is set.
	fn sdf_volume(
		&self,
		cloud: &PointCloud,
		grid: &VoxelGrid,
		cancel: &AtomicBool,
	) -> Result<Vec<f32>, Error>;
}

/// Encoder turning `point_clouds` `[1, 3, N]` into `latents`, and a decoder answering `query`
/// `[1, 3, M]` with `sdf` `[1, M]` given those latents.
#[derive(Debug)]
pub struct OnnxSdfModel {
	encoder: OnnxModel,
	decoder: OnnxModel,
	batch_size: usize,
}

impl OnnxSdfModel {
	pub const DEFAULT_BATCH_SIZE: usize = 4096;

	pub fn load(encoder: impl AsRef<Path>, decoder: impl AsRef<Path>) -> Result<Self, Error> {
		Ok(Self {
			encoder: OnnxModel::load("sdf_encoder", encoder)?,
			decoder: OnnxModel::load("sdf_decoder", decoder)?,
			batch_size: Self::DEFAULT_BATCH_SIZE,
		})
	}

	#[must_use]
	pub fn with_batch_size(mut self, batch_size: usize) -> Self {
		self.batch_size = batch_size.max(1);
		self
	}

	fn encode(&self, cloud: &PointCloud) -> Result<ArrayD<f32>, Error> {
		self.encoder.run(
			vec![(
				Cow::Borrowed("point_clouds"),
				Input::F32(channels_first(cloud.coords()).into_dyn()),
			)],
			"latents",
		)
	}
}

impl SdfModel for OnnxSdfModel {
	fn sdf_volume(
		&self,
		cloud: &PointCloud,
		grid: &VoxelGrid,
		cancel: &AtomicBool,
	) -> Result<Vec<f32>, Error> {
		if cloud.is_empty() {
			return Err(pf_mesh::Error::EmptyPointCloud.into());
		}

		let latents = self.encode(cloud)?;
		let mut volume = Vec::with_capacity(grid.len());

		for batch in grid.batches(self.batch_size) {
			if cancel.load(Ordering::Relaxed) {
				return Err(Error::Cancelled);
			}

			let sdf = self.decoder.run(
				vec![
					(
						Cow::Borrowed("query"),
						Input::F32(channels_first(&batch).into_dyn()),
					),
					(Cow::Borrowed("latents"), Input::F32(latents.clone())),
				],
				"sdf",
			)?;

			if sdf.len() != batch.len() {
				return Err(Error::InvalidInput(format!(
					"'{}' answered {} queries with {} values",
					self.decoder.name(),
					batch.len(),
					sdf.len()
				)));
			}

			volume.extend(sdf.iter().copied());
		}

		debug!(
			samples = volume.len(),
			resolution = grid.resolution(),
			"Evaluated SDF volume"
		);

		Ok(volume)
	}
}

/// `[1, 3, N]` layout the point cloud networks expect
fn channels_first(points: &[[f32; 3]]) -> Array3<f32> {
	Array3::from_shape_fn((1, 3, points.len()), |(_, axis, i)| points[i][axis])
}
