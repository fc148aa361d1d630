use crate::{
	error::Error,
	sampler::{PointCloudGenerator, Progress},
	sdf::SdfModel,
};

use pf_mesh::{
	center_constant_volume, save_colored_obj, IsosurfaceExtractor, ObjSummary, PointCloud,
	SurfaceNets, VoxelGrid,
};

use std::{
	ops::ControlFlow,
	path::Path,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use image::RgbImage;
use tracing::{debug, trace};

/// Image in, colored mesh file out.
///
/// The point cloud is generated first, then its SDF is sampled on `grid`, the zero level set
/// extracted and every vertex colored from the nearest point of the cloud.
pub struct ImageToMesh {
	generator: Arc<dyn PointCloudGenerator>,
	sdf: Arc<dyn SdfModel>,
	extractor: Arc<dyn IsosurfaceExtractor>,
	grid: VoxelGrid,
}

impl ImageToMesh {
	#[must_use]
	pub fn new(generator: Arc<dyn PointCloudGenerator>, sdf: Arc<dyn SdfModel>, grid: VoxelGrid) -> Self {
		Self {
			generator,
			sdf,
			extractor: Arc::new(SurfaceNets),
			grid,
		}
	}

	#[must_use]
	pub const fn grid(&self) -> &VoxelGrid {
		&self.grid
	}

	/// Run the whole pipeline for `image`, writing the mesh to `output`.
	///
	/// Checks `cancel` between steps and stops with [`Error::Cancelled`] once it is set, nothing
	/// is written in that case.
	pub fn run(&self, image: &RgbImage, output: &Path, cancel: &AtomicBool) -> Result<ObjSummary, Error> {
		let cloud = self.generator.generate(image, &mut |progress: Progress<'_>| {
			if cancel.load(Ordering::Relaxed) {
				return ControlFlow::Break(());
			}

			trace!(
				stage = progress.stage + 1,
				stages = progress.stages,
				step = progress.step,
				steps = progress.steps,
				sigma = progress.sigma,
				"Sampling"
			);

			ControlFlow::Continue(())
		})?;

		self.point_cloud_to_mesh_file(&cloud, output, cancel)
	}

	/// Second half of [`Self::run`], for an already generated cloud.
	///
	/// A cloud without all of its color channels is rejected before any model runs or any file
	/// is touched.
	pub fn point_cloud_to_mesh_file(
		&self,
		cloud: &PointCloud,
		output: &Path,
		cancel: &AtomicBool,
	) -> Result<ObjSummary, Error> {
		cloud.colors()?;

		let mut volume = self.sdf.sdf_volume(cloud, &self.grid, cancel)?;
		if center_constant_volume(&mut volume) {
			debug!("Centered a single signed SDF volume");
		}

		if cancel.load(Ordering::Relaxed) {
			return Err(Error::Cancelled);
		}

		let mesh = self.extractor.extract(&volume, &self.grid, 0.0)?;

		if cancel.load(Ordering::Relaxed) {
			return Err(Error::Cancelled);
		}

		save_colored_obj(output, &mesh, cloud, cancel).map_err(|e| match e {
			pf_mesh::Error::Cancelled => Error::Cancelled,
			e => e.into(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::{
		collections::BTreeMap,
		fs,
		sync::atomic::{AtomicUsize, Ordering},
	};

	/// Points on a sphere of radius 0.3, red on top and blue below, in 8-bit color
	struct SphereCloud {
		channels: &'static [&'static str],
	}

	impl PointCloudGenerator for SphereCloud {
		fn generate(
			&self,
			_image: &RgbImage,
			on_progress: &mut dyn FnMut(Progress<'_>) -> ControlFlow<()>,
		) -> Result<PointCloud, Error> {
			let samples = ndarray::Array3::zeros((1, 6, 1));
			if on_progress(Progress {
				stage: 0,
				stages: 1,
				step: 0,
				steps: 1,
				sigma: 1.0,
				pred_xstart: samples.view(),
			})
			.is_break()
			{
				return Err(Error::Cancelled);
			}

			let coords = (0..200)
				.map(|i| {
					let (theta, phi) = (i as f32 * 0.7, (i as f32 / 200.0).mul_add(2.0, -1.0).acos());
					[
						0.3 * phi.sin() * theta.cos(),
						0.3 * phi.sin() * theta.sin(),
						0.3 * phi.cos(),
					]
				})
				.collect::<Vec<_>>();

			let channels = self
				.channels
				.iter()
				.map(|&name| {
					let values = coords
						.iter()
						.map(|[_, _, z]| match name {
							"R" if *z > 0.0 => 255.0,
							"B" if *z <= 0.0 => 255.0,
							_ => 0.0,
						})
						.collect();
					(name.to_string(), values)
				})
				.collect::<BTreeMap<_, _>>();

			Ok(PointCloud::new(coords, channels)?)
		}
	}

	/// Exact SDF of the same sphere, counting how often it is evaluated
	#[derive(Default)]
	struct SphereSdf {
		calls: AtomicUsize,
	}

	impl SdfModel for SphereSdf {
		fn sdf_volume(
			&self,
			_cloud: &PointCloud,
			grid: &VoxelGrid,
			_cancel: &AtomicBool,
		) -> Result<Vec<f32>, Error> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Ok((0..grid.len())
				.map(|i| {
					let [x, y, z] = grid.point(i);
					0.3 - z.mul_add(z, x.mul_add(x, y * y)).sqrt()
				})
				.collect())
		}
	}

	fn pipeline(channels: &'static [&'static str], sdf: &Arc<SphereSdf>) -> ImageToMesh {
		ImageToMesh::new(
			Arc::new(SphereCloud { channels }),
			Arc::clone(sdf) as Arc<dyn SdfModel>,
			VoxelGrid::with_resolution(20).unwrap(),
		)
	}

	#[test]
	fn writes_a_colored_mesh() {
		let dir = tempfile::tempdir().unwrap();
		let output = dir.path().join("sphere.obj");
		let sdf = Arc::new(SphereSdf::default());

		let summary = pipeline(&["R", "G", "B"], &sdf)
			.run(&RgbImage::new(8, 8), &output, &AtomicBool::new(false))
			.unwrap();

		assert!(summary.vertices > 0 && summary.faces > 0);

		let contents = fs::read_to_string(&output).unwrap();
		for line in contents.lines().filter(|line| line.starts_with("v ")) {
			let fields = line
				.split_whitespace()
				.skip(1)
				.map(|field| field.parse::<f32>().unwrap())
				.collect::<Vec<_>>();
			assert_eq!(fields.len(), 6);

			// Colors were normalized and follow the nearest point
			let (z, [r, g, b]) = (fields[2], [fields[3], fields[4], fields[5]]);
			assert_eq!(g, 0.0);
			if z > 0.1 {
				assert_eq!((r, b), (1.0, 0.0));
			} else if z < -0.1 {
				assert_eq!((r, b), (0.0, 1.0));
			}
		}
	}

	#[test]
	fn missing_blue_aborts_before_anything_runs() {
		let dir = tempfile::tempdir().unwrap();
		let output = dir.path().join("sphere.obj");
		let sdf = Arc::new(SphereSdf::default());

		let err = pipeline(&["R", "G"], &sdf)
			.run(&RgbImage::new(8, 8), &output, &AtomicBool::new(false))
			.unwrap_err();

		assert!(err.is_missing_colors());
		assert_eq!(sdf.calls.load(Ordering::SeqCst), 0);
		assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
	}

	#[test]
	fn cancellation_writes_nothing() {
		let dir = tempfile::tempdir().unwrap();
		let output = dir.path().join("sphere.obj");
		let sdf = Arc::new(SphereSdf::default());

		let err = pipeline(&["R", "G", "B"], &sdf)
			.run(&RgbImage::new(8, 8), &output, &AtomicBool::new(true))
			.unwrap_err();

		assert!(matches!(err, Error::Cancelled));
		assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
	}
}
